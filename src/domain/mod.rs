//! Domain layer: models, ports, and the error taxonomy.

pub mod error;
pub mod models;
pub mod ports;

pub use error::{SwarmError, SwarmResult};
