//! Error taxonomy for the swarm orchestration core.
//!
//! All public service operations return [`SwarmResult`]. Infrastructure
//! adapters map their underlying failures into these variants at the
//! boundary.

use thiserror::Error;
use uuid::Uuid;

/// Convenience alias used by every service operation.
pub type SwarmResult<T> = Result<T, SwarmError>;

/// Unified error type covering sessions, tasks, agents, messaging, quota,
/// model access, and worktree management.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SwarmError {
    /// Session with the given ID was not found
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    /// Creating a session would exceed the configured concurrent-session cap
    #[error("Session limit exceeded: {current} of {max} sessions in use")]
    SessionLimitExceeded { current: usize, max: usize },

    /// Requested lifecycle transition is not in the legal transition table
    #[error("Invalid session state: cannot go from {from} to {to}")]
    SessionInvalidState { from: String, to: String },

    /// Task with the given ID was not found on the board
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// Adding the dependency would create a cycle in the task graph
    #[error("Task dependency cycle: {task} -> {depends_on}")]
    TaskDependencyCycle { task: Uuid, depends_on: Uuid },

    /// Task already has an assigned agent
    #[error("Task {0} is already assigned")]
    TaskAlreadyAssigned(Uuid),

    /// Creating a task would exceed the per-session board cap
    #[error("Task limit exceeded: board holds {current} of {max} tasks")]
    TaskLimitExceeded { current: usize, max: usize },

    /// Agent with the given ID was not found in the pool
    #[error("Agent not found: {0}")]
    AgentNotFound(Uuid),

    /// Spawning would exceed the session-wide or per-role agent cap
    #[error("Agent limit exceeded: {reason}")]
    AgentLimitExceeded { reason: String },

    /// Agent exceeded its allotted execution time
    #[error("Agent {0} timed out")]
    AgentTimeout(Uuid),

    /// Message with the given ID was not found
    #[error("Message not found: {0}")]
    MessageNotFound(Uuid),

    /// Token budget (quota or free tier) is exhausted
    #[error("Token budget exceeded: {0}")]
    TokenBudgetExceeded(String),

    /// Conversation transcript no longer fits the model context window
    #[error("Context overflow: {tokens} tokens exceeds window of {window}")]
    ContextOverflow { tokens: u64, window: u64 },

    /// No usable model or key is available for the request
    #[error("Model not available: {0}")]
    ModelNotAvailable(String),

    /// The model provider reported a rate limit
    #[error("Model rate limited, retry after {retry_after_secs}s")]
    ModelRateLimited { retry_after_secs: u64 },

    /// The model provider returned an error
    #[error("Model API error: {0}")]
    ModelApiError(String),

    /// Worktree creation failed
    #[error("Worktree create failed: {0}")]
    WorktreeCreateFailed(String),

    /// Merge produced conflicting files
    #[error("Merge conflict in {} file(s)", conflicts.len())]
    MergeConflict { conflicts: Vec<String> },

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Input failed validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl SwarmError {
    /// Transient errors may succeed on retry via the board's retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ModelRateLimited { .. } | Self::ModelApiError(_) | Self::AgentTimeout(_)
        )
    }

    /// Permanent errors must not be retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::TaskDependencyCycle { .. }
                | Self::SessionInvalidState { .. }
                | Self::TokenBudgetExceeded(_)
                | Self::ConfigurationError(_)
                | Self::ValidationError(_)
        )
    }

    /// Short machine-readable code for event payloads and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionLimitExceeded { .. } => "session_limit_exceeded",
            Self::SessionInvalidState { .. } => "session_invalid_state",
            Self::TaskNotFound(_) => "task_not_found",
            Self::TaskDependencyCycle { .. } => "task_dependency_cycle",
            Self::TaskAlreadyAssigned(_) => "task_already_assigned",
            Self::TaskLimitExceeded { .. } => "task_limit_exceeded",
            Self::AgentNotFound(_) => "agent_not_found",
            Self::AgentLimitExceeded { .. } => "agent_limit_exceeded",
            Self::AgentTimeout(_) => "agent_timeout",
            Self::MessageNotFound(_) => "message_not_found",
            Self::TokenBudgetExceeded(_) => "token_budget_exceeded",
            Self::ContextOverflow { .. } => "context_overflow",
            Self::ModelNotAvailable(_) => "model_not_available",
            Self::ModelRateLimited { .. } => "model_rate_limited",
            Self::ModelApiError(_) => "model_api_error",
            Self::WorktreeCreateFailed(_) => "worktree_create_failed",
            Self::MergeConflict { .. } => "merge_conflict",
            Self::ConfigurationError(_) => "configuration_error",
            Self::ValidationError(_) => "validation_error",
            Self::InternalError(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_session_invalid_state() {
        let err = SwarmError::SessionInvalidState {
            from: "complete".to_string(),
            to: "executing".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid session state: cannot go from complete to executing"
        );
    }

    #[test]
    fn test_display_merge_conflict_counts_files() {
        let err = SwarmError::MergeConflict {
            conflicts: vec!["a.txt".to_string(), "b.txt".to_string()],
        };
        assert_eq!(err.to_string(), "Merge conflict in 2 file(s)");
    }

    #[test]
    fn test_transient_classification() {
        assert!(SwarmError::ModelRateLimited { retry_after_secs: 30 }.is_transient());
        assert!(SwarmError::ModelApiError("503".to_string()).is_transient());
        assert!(!SwarmError::ValidationError("bad".to_string()).is_transient());
    }

    #[test]
    fn test_permanent_classification() {
        let cycle = SwarmError::TaskDependencyCycle {
            task: Uuid::new_v4(),
            depends_on: Uuid::new_v4(),
        };
        assert!(cycle.is_permanent());
        assert!(!cycle.is_transient());
        assert!(!SwarmError::AgentTimeout(Uuid::new_v4()).is_permanent());
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(SwarmError::SessionNotFound(Uuid::new_v4()).code(), "session_not_found");
        assert_eq!(
            SwarmError::TaskLimitExceeded { current: 5, max: 5 }.code(),
            "task_limit_exceeded"
        );
    }
}
