//! Hivemind - swarm orchestration core.
//!
//! Decomposes a natural-language task into a DAG of subtasks, schedules
//! them onto a bounded pool of role-specialised model agents, mediates
//! inter-agent messaging, tracks token cost and quota, and optionally
//! isolates each worker in its own git worktree.

pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::error::{SwarmError, SwarmResult};
pub use infrastructure::config::SwarmConfig;
pub use services::event_bus::{EventBus, SwarmEvent};
pub use services::orchestrator::Orchestrator;
pub use services::session_store::SessionStore;
