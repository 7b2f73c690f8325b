//! Application services for the swarm orchestration core.

pub mod agent_pool;
pub mod agent_runner;
pub mod cost_ledger;
pub mod event_bus;
pub mod key_vault;
pub mod mailbox;
pub mod orchestrator;
pub mod session_store;
pub mod task_board;
pub mod tool_host;
pub mod worktree_manager;

pub use agent_pool::AgentPool;
pub use agent_runner::{AgentRunner, AgentRunnerConfig, RunnerOutcome};
pub use cost_ledger::{calculate_cost, model_pricing, CostLedger, ModelPricing};
pub use event_bus::{EventBus, EventBusConfig, EventEnvelope, EventSeverity, EventSubscription, SwarmEvent};
pub use key_vault::{
    FreeTierCheck, KeyOptions, KeyUsageEntry, KeyVault, QuotaCheck, RateLimitCheck, SelectOptions,
};
pub use mailbox::{Mailbox, MessageFilter};
pub use orchestrator::{extract_json_from_response, Orchestrator, OrchestratorConfig};
pub use session_store::{SessionEntry, SessionLimits, SessionPatch, SessionStore};
pub use task_board::{TaskBoard, TaskPatch};
pub use tool_host::{ContentPart, TaskCompletion, ToolCallResult, ToolHost, ToolHostConfig};
pub use worktree_manager::{WorktreeConfig, WorktreeManager};
