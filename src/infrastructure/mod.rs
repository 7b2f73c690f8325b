//! Infrastructure: concrete implementations of the domain ports plus
//! configuration and persistence.

pub mod anthropic;
pub mod config;
pub mod fs;
pub mod git;
pub mod persistence;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
pub use config::{ConfigLoader, SwarmConfig};
pub use fs::LocalFileAccess;
pub use git::GitVcs;
pub use persistence::{SessionPersistence, SessionSnapshot};
