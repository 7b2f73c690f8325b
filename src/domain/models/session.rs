//! Session domain model.
//!
//! A session is one user-submitted work item plus everything derived from
//! it. Its lifecycle is a closed state machine; only the transitions listed
//! in [`SessionStatus::valid_transitions`] are legal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, nothing scheduled yet
    Initializing,
    /// Decomposing the original task into subtasks
    Planning,
    /// Matching ready tasks to idle agents
    Delegating,
    /// Agents are executing tasks
    Executing,
    /// Review tasks are being handled
    Reviewing,
    /// Producing the final summary and shutting agents down
    Synthesizing,
    /// Temporarily halted, resumable
    Paused,
    /// Finished successfully
    Complete,
    /// Finished unsuccessfully
    Failed,
    /// Aborted by the user
    Cancelled,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Initializing
    }
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Planning => "planning",
            Self::Delegating => "delegating",
            Self::Executing => "executing",
            Self::Reviewing => "reviewing",
            Self::Synthesizing => "synthesizing",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "initializing" => Some(Self::Initializing),
            "planning" => Some(Self::Planning),
            "delegating" => Some(Self::Delegating),
            "executing" => Some(Self::Executing),
            "reviewing" => Some(Self::Reviewing),
            "synthesizing" => Some(Self::Synthesizing),
            "paused" => Some(Self::Paused),
            "complete" | "completed" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [SessionStatus] {
        match self {
            Self::Initializing => &[Self::Planning, Self::Cancelled, Self::Failed],
            Self::Planning => &[Self::Delegating, Self::Paused, Self::Cancelled, Self::Failed],
            Self::Delegating => &[Self::Executing, Self::Paused, Self::Cancelled, Self::Failed],
            Self::Executing => &[
                Self::Reviewing,
                Self::Synthesizing,
                Self::Paused,
                Self::Cancelled,
                Self::Failed,
            ],
            Self::Reviewing => &[
                Self::Executing,
                Self::Synthesizing,
                Self::Paused,
                Self::Cancelled,
                Self::Failed,
            ],
            Self::Synthesizing => &[Self::Complete, Self::Paused, Self::Cancelled, Self::Failed],
            Self::Paused => &[
                Self::Planning,
                Self::Delegating,
                Self::Executing,
                Self::Reviewing,
                Self::Synthesizing,
                Self::Cancelled,
            ],
            Self::Complete | Self::Failed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: Self) -> bool {
        self.valid_transitions().contains(&target)
    }
}

/// Aggregated counters for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub tasks_created: u32,
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    pub agents_spawned: u32,
    pub messages_sent: u32,
    /// Set on the first transition out of Initializing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set on entering a terminal state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in seconds, set together with `ended_at`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
}

/// Lead-agent configuration for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadConfig {
    /// Model used for planning and synthesis
    pub model: String,
    /// Cap on agents this session may run concurrently
    pub max_concurrent_agents: usize,
}

impl Default for LeadConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_string(),
            max_concurrent_agents: 5,
        }
    }
}

/// A single user-submitted work item and all derived state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier
    pub id: Uuid,
    /// Human-readable name
    pub name: String,
    /// The original natural-language task
    pub original_task: String,
    /// Current lifecycle status
    pub status: SessionStatus,
    /// Lead-agent configuration
    pub lead: LeadConfig,
    /// Aggregated counters
    pub metrics: SessionMetrics,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new session in Initializing.
    pub fn new(original_task: impl Into<String>, name: Option<String>) -> Self {
        let original_task = original_task.into();
        let name = name.unwrap_or_else(|| generate_name(&original_task));
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            original_task,
            status: SessionStatus::default(),
            lead: LeadConfig::default(),
            metrics: SessionMetrics::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Attempt a lifecycle transition, keeping metrics timestamps in sync.
    ///
    /// Returns the `(from, to)` pair on success so callers can publish it.
    pub fn transition(
        &mut self,
        target: SessionStatus,
    ) -> Result<(SessionStatus, SessionStatus), (SessionStatus, SessionStatus)> {
        let from = self.status;
        if !from.can_transition_to(target) {
            return Err((from, target));
        }

        self.status = target;
        self.updated_at = Utc::now();

        if from == SessionStatus::Initializing && self.metrics.started_at.is_none() {
            self.metrics.started_at = Some(Utc::now());
        }
        if target.is_terminal() {
            let ended = Utc::now();
            self.metrics.ended_at = Some(ended);
            self.metrics.duration_secs = self
                .metrics
                .started_at
                .map(|s| (ended - s).num_seconds());
        }

        Ok((from, target))
    }

    /// Check if session is in an absorbing state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Sessions may only be deleted before work starts or after it ends.
    pub fn is_deletable(&self) -> bool {
        self.status == SessionStatus::Initializing || self.is_terminal()
    }
}

/// Generate a short session name from the task text.
/// Takes the first line, truncated at ~60 chars on a word boundary.
fn generate_name(task: &str) -> String {
    let first_line = task.lines().next().unwrap_or(task).trim();
    if first_line.is_empty() {
        return "Untitled session".to_string();
    }
    let max_len = 60;
    if first_line.len() <= max_len {
        return first_line.to_string();
    }
    match first_line[..max_len].rfind(' ') {
        Some(pos) => format!("{}...", &first_line[..pos]),
        None => format!("{}...", &first_line[..max_len]),
    }
}
