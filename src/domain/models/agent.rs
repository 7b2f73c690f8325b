//! Agent domain model.
//!
//! Agents are role-specialised workers bound to a single model. The role
//! profile controls the system prompt, tool allow-list, and concurrency cap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskType;

/// Named capability profile of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Architect,
    SeniorDev,
    Developer,
    JuniorDev,
    Reviewer,
    Security,
    Tester,
    Documenter,
    DevOps,
    Generalist,
}

impl Default for AgentRole {
    fn default() -> Self {
        Self::Generalist
    }
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Architect => "architect",
            Self::SeniorDev => "senior_dev",
            Self::Developer => "developer",
            Self::JuniorDev => "junior_dev",
            Self::Reviewer => "reviewer",
            Self::Security => "security",
            Self::Tester => "tester",
            Self::Documenter => "documenter",
            Self::DevOps => "devops",
            Self::Generalist => "generalist",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "architect" => Some(Self::Architect),
            "senior_dev" | "senior-dev" | "senior" => Some(Self::SeniorDev),
            "developer" | "dev" => Some(Self::Developer),
            "junior_dev" | "junior-dev" | "junior" => Some(Self::JuniorDev),
            "reviewer" => Some(Self::Reviewer),
            "security" => Some(Self::Security),
            "tester" => Some(Self::Tester),
            "documenter" | "docs" => Some(Self::Documenter),
            "devops" => Some(Self::DevOps),
            "generalist" => Some(Self::Generalist),
            _ => None,
        }
    }

    /// Default role for a task type, used when the planner leaves the role
    /// unset.
    pub fn for_task_type(task_type: TaskType) -> Self {
        match task_type {
            TaskType::Design => Self::Architect,
            TaskType::Implementation => Self::Developer,
            TaskType::Refactoring => Self::SeniorDev,
            TaskType::Testing => Self::Tester,
            TaskType::Review => Self::Reviewer,
            TaskType::Documentation => Self::Documenter,
            TaskType::Configuration => Self::DevOps,
            TaskType::Research | TaskType::Integration => Self::Generalist,
        }
    }

    /// Capability profile for this role.
    pub fn profile(&self) -> RoleProfile {
        match self {
            Self::Architect => RoleProfile {
                role: *self,
                prompt_template: "You are a software architect. Produce designs, interfaces, and \
                                  decomposition plans. Favour small, testable components."
                    .to_string(),
                allowed_tools: vec!["read_file", "glob", "grep", "task_complete"],
                model: "claude-opus-4-6".to_string(),
                max_concurrent_tasks: 2,
            },
            Self::SeniorDev => RoleProfile {
                role: *self,
                prompt_template: "You are a senior developer. Implement and refactor code with \
                                  attention to invariants and edge cases."
                    .to_string(),
                allowed_tools: vec![
                    "read_file",
                    "write_file",
                    "edit_file",
                    "glob",
                    "grep",
                    "bash",
                    "task_complete",
                ],
                model: "claude-sonnet-4-5".to_string(),
                max_concurrent_tasks: 3,
            },
            Self::Developer => RoleProfile {
                role: *self,
                prompt_template: "You are a developer. Implement the task exactly as described \
                                  and verify against the acceptance criteria."
                    .to_string(),
                allowed_tools: vec![
                    "read_file",
                    "write_file",
                    "edit_file",
                    "glob",
                    "grep",
                    "bash",
                    "task_complete",
                ],
                model: "claude-sonnet-4-5".to_string(),
                max_concurrent_tasks: 5,
            },
            Self::JuniorDev => RoleProfile {
                role: *self,
                prompt_template: "You are a junior developer. Handle small, well-scoped changes. \
                                  Ask for review when uncertain."
                    .to_string(),
                allowed_tools: vec![
                    "read_file",
                    "write_file",
                    "edit_file",
                    "glob",
                    "grep",
                    "task_complete",
                ],
                model: "claude-haiku-4-5".to_string(),
                max_concurrent_tasks: 5,
            },
            Self::Reviewer => RoleProfile {
                role: *self,
                prompt_template: "You are a code reviewer. Inspect changes for correctness, \
                                  style, and missed edge cases. Do not modify files."
                    .to_string(),
                allowed_tools: vec!["read_file", "glob", "grep", "task_complete"],
                model: "claude-sonnet-4-5".to_string(),
                max_concurrent_tasks: 3,
            },
            Self::Security => RoleProfile {
                role: *self,
                prompt_template: "You are a security engineer. Audit code paths for injection, \
                                  secret leakage, and unsafe subprocess use."
                    .to_string(),
                allowed_tools: vec!["read_file", "glob", "grep", "task_complete"],
                model: "claude-sonnet-4-5".to_string(),
                max_concurrent_tasks: 2,
            },
            Self::Tester => RoleProfile {
                role: *self,
                prompt_template: "You are a test engineer. Write and run tests covering the \
                                  acceptance criteria and failure paths."
                    .to_string(),
                allowed_tools: vec![
                    "read_file",
                    "write_file",
                    "edit_file",
                    "glob",
                    "grep",
                    "bash",
                    "task_complete",
                ],
                model: "claude-sonnet-4-5".to_string(),
                max_concurrent_tasks: 3,
            },
            Self::Documenter => RoleProfile {
                role: *self,
                prompt_template: "You are a technical writer. Produce accurate, concise \
                                  documentation for the completed work."
                    .to_string(),
                allowed_tools: vec!["read_file", "write_file", "glob", "grep", "task_complete"],
                model: "claude-haiku-4-5".to_string(),
                max_concurrent_tasks: 2,
            },
            Self::DevOps => RoleProfile {
                role: *self,
                prompt_template: "You are a devops engineer. Handle configuration, build, and \
                                  tooling tasks."
                    .to_string(),
                allowed_tools: vec![
                    "read_file",
                    "write_file",
                    "edit_file",
                    "glob",
                    "grep",
                    "bash",
                    "task_complete",
                ],
                model: "claude-sonnet-4-5".to_string(),
                max_concurrent_tasks: 2,
            },
            Self::Generalist => RoleProfile {
                role: *self,
                prompt_template: "You are a generalist engineer. Research, integrate, and solve \
                                  tasks that span specialties."
                    .to_string(),
                allowed_tools: vec![
                    "read_file",
                    "write_file",
                    "edit_file",
                    "glob",
                    "grep",
                    "bash",
                    "task_complete",
                ],
                model: "claude-sonnet-4-5".to_string(),
                max_concurrent_tasks: 5,
            },
        }
    }
}

/// Materialised capability profile for a role. Derived from the role at
/// spawn time, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleProfile {
    /// The role this profile belongs to
    pub role: AgentRole,
    /// System prompt template
    pub prompt_template: String,
    /// Tools this role may invoke
    pub allowed_tools: Vec<&'static str>,
    /// Default model for this role
    pub model: String,
    /// How many agents of this role a session may run at once
    pub max_concurrent_tasks: usize,
}

/// Status of a worker agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Spawning, prompt not yet materialised
    Initializing,
    /// Ready for assignment
    Idle,
    /// Executing a task
    Working,
    /// No activity past the idle threshold
    Waiting,
    /// Waiting on an external dependency
    Blocked,
    /// Finished all work, kept for bookkeeping
    Completed,
    /// Crashed or errored out
    Failed,
    /// Removed from the pool
    Terminated,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Initializing
    }
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Waiting => "waiting",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        }
    }

    /// Agents count toward the session cap until terminated.
    pub fn counts_toward_cap(&self) -> bool {
        *self != Self::Terminated
    }
}

/// A role-specialised worker bound to a single model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInstance {
    /// Unique identifier
    pub id: Uuid,
    /// Owning session
    pub session_id: Uuid,
    /// Capability profile
    pub role: AgentRole,
    /// Model this agent calls
    pub model: String,
    /// Materialised system prompt
    pub system_prompt: String,
    /// Current status
    pub status: AgentStatus,
    /// Task currently being executed, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<Uuid>,
    /// Tasks this agent completed
    #[serde(default)]
    pub completed_tasks: Vec<Uuid>,
    /// Tasks this agent failed
    #[serde(default)]
    pub failed_tasks: Vec<Uuid>,
    /// Context tokens consumed so far
    pub context_tokens: u64,
    /// Total input tokens across calls
    pub input_tokens: u64,
    /// Total output tokens across calls
    pub output_tokens: u64,
    /// Model calls issued
    pub model_calls: u64,
    /// Worktree this agent is isolated in, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_id: Option<Uuid>,
    /// When spawned
    pub created_at: DateTime<Utc>,
    /// Last observed activity (assignment, tool call, completion)
    pub last_activity_at: DateTime<Utc>,
}

impl AgentInstance {
    /// Spawn a new agent for a session, materialising the role prompt.
    pub fn new(session_id: Uuid, role: AgentRole) -> Self {
        let profile = role.profile();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_id,
            role,
            model: profile.model,
            system_prompt: profile.prompt_template,
            status: AgentStatus::Initializing,
            current_task_id: None,
            completed_tasks: Vec::new(),
            failed_tasks: Vec::new(),
            context_tokens: 0,
            input_tokens: 0,
            output_tokens: 0,
            model_calls: 0,
            worktree_id: None,
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Mark ready for assignment.
    pub fn activate(&mut self) {
        self.status = AgentStatus::Idle;
        self.touch();
    }

    /// Take on a task. Only valid from Idle or Waiting.
    pub fn assign(&mut self, task_id: Uuid) -> Result<(), String> {
        if !matches!(self.status, AgentStatus::Idle | AgentStatus::Waiting) {
            return Err(format!(
                "Agent {} cannot accept work while {}",
                self.id,
                self.status.as_str()
            ));
        }
        self.current_task_id = Some(task_id);
        self.status = AgentStatus::Working;
        self.touch();
        Ok(())
    }

    /// Record a finished assignment and return to Idle.
    pub fn finish_assignment(&mut self, succeeded: bool) -> Option<Uuid> {
        let task_id = self.current_task_id.take();
        if let Some(id) = task_id {
            if succeeded {
                self.completed_tasks.push(id);
            } else {
                self.failed_tasks.push(id);
            }
        }
        self.status = AgentStatus::Idle;
        self.touch();
        task_id
    }

    /// Record activity for idle detection.
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Whether this agent can pick up a task right now.
    pub fn is_available(&self) -> bool {
        matches!(self.status, AgentStatus::Idle | AgentStatus::Waiting)
            && self.current_task_id.is_none()
    }

    /// Short id used in branch names and log lines.
    pub fn short_id(&self) -> String {
        self.id.to_string()[..8].to_string()
    }
}
