//! Task domain model.
//!
//! Tasks are discrete units of work that agents execute.
//! They form a DAG via the `blocked_by` / `blocks` inverse relation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::agent::AgentRole;

/// Status of a task in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is defined but dependencies not met
    Pending,
    /// All dependencies complete, task can be scheduled
    Ready,
    /// Task handed to an agent, not yet started
    Assigned,
    /// Agent is actively executing the task
    InProgress,
    /// Execution finished, awaiting review
    Review,
    /// Review requested changes, agent is revising
    Revision,
    /// Task is blocked by failed dependencies
    Blocked,
    /// Task completed successfully
    Complete,
    /// Task failed after exhausting retries
    Failed,
    /// Task was cancelled
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Revision => "revision",
            Self::Blocked => "blocked",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "assigned" => Some(Self::Assigned),
            "in_progress" => Some(Self::InProgress),
            "review" => Some(Self::Review),
            "revision" => Some(Self::Revision),
            "blocked" => Some(Self::Blocked),
            "complete" | "completed" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// States in which a task may carry an `assigned_agent_id`.
    pub fn holds_assignment(&self) -> bool {
        matches!(
            self,
            Self::Assigned | Self::InProgress | Self::Review | Self::Revision
        )
    }

    /// Position in the progress order Pending < Ready < Assigned <
    /// InProgress < Review < Complete. States outside the order map to the
    /// nearest equivalent rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending | Self::Blocked => 0,
            Self::Ready => 1,
            Self::Assigned => 2,
            Self::InProgress | Self::Revision => 3,
            Self::Review => 4,
            Self::Complete | Self::Failed | Self::Cancelled => 5,
        }
    }
}

/// Board column a task is displayed in; a pure projection of status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardColumn {
    Backlog,
    Ready,
    InProgress,
    Review,
    Done,
    Failed,
}

impl BoardColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Column for a given status.
    pub fn for_status(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Pending | TaskStatus::Blocked => Self::Backlog,
            TaskStatus::Ready => Self::Ready,
            TaskStatus::Assigned | TaskStatus::InProgress | TaskStatus::Revision => {
                Self::InProgress
            }
            TaskStatus::Review => Self::Review,
            TaskStatus::Complete => Self::Done,
            TaskStatus::Failed | TaskStatus::Cancelled => Self::Failed,
        }
    }
}

/// What kind of work this task represents. Drives default role selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Design,
    Implementation,
    Refactoring,
    Testing,
    Review,
    Documentation,
    Configuration,
    Research,
    Integration,
}

impl Default for TaskType {
    fn default() -> Self {
        Self::Implementation
    }
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Design => "design",
            Self::Implementation => "implementation",
            Self::Refactoring => "refactoring",
            Self::Testing => "testing",
            Self::Review => "review",
            Self::Documentation => "documentation",
            Self::Configuration => "configuration",
            Self::Research => "research",
            Self::Integration => "integration",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "design" => Some(Self::Design),
            "implementation" => Some(Self::Implementation),
            "refactoring" => Some(Self::Refactoring),
            "testing" => Some(Self::Testing),
            "review" => Some(Self::Review),
            "documentation" => Some(Self::Documentation),
            "configuration" => Some(Self::Configuration),
            "research" => Some(Self::Research),
            "integration" => Some(Self::Integration),
            _ => None,
        }
    }
}

/// Priority level for tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "normal" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Complexity classification for routing and token estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
}

impl Default for Complexity {
    fn default() -> Self {
        Self::Moderate
    }
}

/// Kind of file mutation recorded by the tool host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeChangeKind {
    Create,
    Modify,
    Delete,
}

/// A file mutation performed while executing a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeChange {
    /// Workspace-relative or absolute path
    pub path: String,
    /// Create, modify, or delete
    pub kind: CodeChangeKind,
    /// Full new content (write_file)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_content: Option<String>,
    /// Unified-style before/after fragment (edit_file)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// Outcome of executing a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Whether the task succeeded
    pub success: bool,
    /// Short human-readable summary
    pub summary: String,
    /// File mutations performed during execution
    #[serde(default)]
    pub code_changes: Vec<CodeChange>,
    /// Artifact IDs produced
    #[serde(default)]
    pub artifacts: Vec<Uuid>,
    /// Problems encountered (non-fatal)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues: Option<Vec<String>>,
    /// Reviewer feedback, when the task was a review
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_comments: Option<Vec<String>>,
}

impl TaskResult {
    /// Successful result with a summary and no side-effects.
    pub fn ok(summary: impl Into<String>) -> Self {
        Self {
            success: true,
            summary: summary.into(),
            ..Self::default()
        }
    }

    /// Failed result with a reason and no side-effects.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            summary: reason.into(),
            ..Self::default()
        }
    }
}

/// A discrete unit of work executed by a single agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: Uuid,
    /// Human-readable title
    pub title: String,
    /// Detailed description/prompt
    pub description: String,
    /// Ordered acceptance criteria
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// What kind of work this is
    pub task_type: TaskType,
    /// Priority
    pub priority: TaskPriority,
    /// Estimated complexity
    pub complexity: Complexity,
    /// Current status
    pub status: TaskStatus,
    /// Board column (projection of status)
    pub column: BoardColumn,
    /// Task IDs this task waits on
    #[serde(default)]
    pub blocked_by: BTreeSet<Uuid>,
    /// Task IDs waiting on this task (inverse of `blocked_by`)
    #[serde(default)]
    pub blocks: BTreeSet<Uuid>,
    /// Role this task should be executed by
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_role: Option<AgentRole>,
    /// Agent currently holding the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent_id: Option<Uuid>,
    /// Execution attempts so far
    pub attempts: u32,
    /// Maximum execution attempts
    pub max_attempts: u32,
    /// Final result (set on completion or exhaustion)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    /// Files the agent should read for context
    #[serde(default)]
    pub context_files: Vec<String>,
    /// Tools the task needs beyond the role defaults
    #[serde(default)]
    pub required_tools: Vec<String>,
    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form notes
    #[serde(default)]
    pub notes: Vec<String>,
    /// Rough token estimate for quota planning
    pub estimated_tokens: u64,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
    /// When execution started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When execution completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new task with a title and description.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            acceptance_criteria: Vec::new(),
            task_type: TaskType::default(),
            priority: TaskPriority::default(),
            complexity: Complexity::default(),
            status: TaskStatus::default(),
            column: BoardColumn::Backlog,
            blocked_by: BTreeSet::new(),
            blocks: BTreeSet::new(),
            assigned_role: None,
            assigned_agent_id: None,
            attempts: 0,
            max_attempts: 3,
            result: None,
            context_files: Vec::new(),
            required_tools: Vec::new(),
            tags: Vec::new(),
            notes: Vec::new(),
            estimated_tokens: 3000,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Set the task type.
    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the preferred role.
    pub fn with_role(mut self, role: AgentRole) -> Self {
        self.assigned_role = Some(role);
        self
    }

    /// Add acceptance criteria.
    pub fn with_criteria(mut self, criteria: Vec<String>) -> Self {
        self.acceptance_criteria = criteria;
        self
    }

    /// Set the retry budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Change status and keep the column projection and timestamps in sync.
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.column = BoardColumn::for_status(status);
        self.updated_at = Utc::now();
        match status {
            TaskStatus::InProgress if self.started_at.is_none() => {
                self.started_at = Some(Utc::now());
            }
            TaskStatus::Complete | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }
    }

    /// Check if task is terminal.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the task has a retry left after a failure.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Validate structural constraints before insertion.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Task title cannot be empty".to_string());
        }
        if self.description.trim().is_empty() {
            return Err("Task description cannot be empty".to_string());
        }
        if self.blocked_by.contains(&self.id) {
            return Err("Task cannot depend on itself".to_string());
        }
        if self.max_attempts == 0 {
            return Err("Task must allow at least one attempt".to_string());
        }
        Ok(())
    }
}
