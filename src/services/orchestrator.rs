//! Orchestrator: drives a session through its phases.
//!
//! Each session gets a driver task that ticks on a fixed interval. A tick
//! inspects the session status and performs one phase step: planning
//! decomposes the original task via the model provider (with a fixed
//! fallback plan), delegating matches ready tasks to idle agents
//! (spawning under the cap), executing watches runners and reaps stuck
//! tasks, reviewing routes review-status tasks to reviewer agents, and
//! synthesizing merges worktrees, broadcasts the outcome, and terminates
//! the roster. Ticks for one session never overlap; pausing stops the
//! timer and resuming re-arms it.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::error::{SwarmError, SwarmResult};
use crate::domain::models::agent::{AgentInstance, AgentRole, AgentStatus};
use crate::domain::models::artifact::{Artifact, ArtifactType};
use crate::domain::models::message::{
    AgentMessage, BroadcastImportance, MessagePriority, MessageType, RECIPIENT_LEAD,
};
use crate::domain::models::session::SessionStatus;
use crate::domain::models::task::{Task, TaskPriority, TaskStatus, TaskType};
use crate::domain::ports::cancellation::CancellationSource;
use crate::domain::ports::clock::Clock;
use crate::domain::ports::file_access::FileAccess;
use crate::domain::ports::model_provider::{
    ModelMessage, ModelProvider, ModelRequest, ResponseFormat,
};
use crate::services::agent_runner::{AgentRunner, AgentRunnerConfig};
use crate::services::cost_ledger::CostLedger;
use crate::services::event_bus::{EventBus, SwarmEvent};
use crate::services::session_store::SessionStore;
use crate::services::tool_host::ToolHost;
use crate::services::worktree_manager::WorktreeManager;

/// Timing and behaviour knobs for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Delay between phase steps for one session.
    pub tick_interval: Duration,
    /// A task running longer than this is reaped and requeued.
    pub task_timeout: Duration,
    /// An agent idle longer than this moves to Waiting.
    pub agent_idle_timeout: Duration,
    /// A session running longer than this fails.
    pub session_timeout: Duration,
    /// Completed implementation work goes through a review pass.
    pub review_required: bool,
    /// Isolate each worker in its own worktree when the workspace is a
    /// repository.
    pub use_worktrees: bool,
    /// Consecutive tick errors tolerated before the session fails.
    pub max_tick_errors: u32,
    /// Runner limits.
    pub runner: AgentRunnerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            task_timeout: Duration::from_secs(300),
            agent_idle_timeout: Duration::from_secs(120),
            session_timeout: Duration::from_secs(3600),
            review_required: false,
            use_worktrees: false,
            max_tick_errors: 3,
            runner: AgentRunnerConfig::default(),
        }
    }
}

/// Decomposition returned by the planning prompt.
#[derive(Debug, Deserialize)]
struct PlanSpec {
    tasks: Vec<PlannedTask>,
}

#[derive(Debug, Deserialize)]
struct PlannedTask {
    title: String,
    description: String,
    #[serde(rename = "type")]
    task_type: Option<String>,
    priority: Option<String>,
    role: Option<String>,
    #[serde(default)]
    acceptance_criteria: Vec<String>,
    /// Symbolic indices `task_0..task_n` into this plan.
    #[serde(default)]
    depends_on: Vec<String>,
    estimated_tokens: Option<u64>,
}

/// Extract a JSON object from LLM text output.
///
/// Handles markdown code blocks (```json...```) and JSON embedded in
/// prose text.
pub fn extract_json_from_response(response: &str) -> String {
    let trimmed = response.trim();

    if trimmed.starts_with("```json") {
        if let Some(end) = trimmed.rfind("```") {
            if end > 7 {
                return trimmed[7..end].trim().to_string();
            }
        }
    }
    if trimmed.starts_with("```") {
        if let Some(end) = trimmed.rfind("```") {
            let start = if trimmed.starts_with("```\n") { 4 } else { 3 };
            if end > start {
                return trimmed[start..end].trim().to_string();
            }
        }
    }
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return trimmed.to_string();
    }
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                return trimmed[start..=end].to_string();
            }
        }
    }
    trimmed.to_string()
}

struct SessionDriver {
    cancel: CancellationSource,
    /// Cancellation handles for in-flight task runners.
    runners: Arc<Mutex<HashMap<Uuid, CancellationSource>>>,
}

/// Drives sessions from Planning through Complete.
pub struct Orchestrator {
    store: Arc<SessionStore>,
    provider: Arc<dyn ModelProvider>,
    fs: Arc<dyn FileAccess>,
    worktrees: Arc<WorktreeManager>,
    ledger: Arc<CostLedger>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    workspace_root: PathBuf,
    config: OrchestratorConfig,
    drivers: Mutex<HashMap<Uuid, SessionDriver>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SessionStore>,
        provider: Arc<dyn ModelProvider>,
        fs: Arc<dyn FileAccess>,
        worktrees: Arc<WorktreeManager>,
        ledger: Arc<CostLedger>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        workspace_root: impl Into<PathBuf>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            provider,
            fs,
            worktrees,
            ledger,
            bus,
            clock,
            workspace_root: workspace_root.into(),
            config,
            drivers: Mutex::new(HashMap::new()),
        }
    }

    /// Begin driving a session: Initializing -> Planning, then tick until
    /// it reaches a terminal state or is paused.
    pub async fn start(self: &Arc<Self>, session_id: Uuid) -> SwarmResult<()> {
        self.store
            .transition(session_id, SessionStatus::Planning)
            .await?;
        self.spawn_driver(session_id).await;
        Ok(())
    }

    async fn spawn_driver(self: &Arc<Self>, session_id: Uuid) {
        let cancel = CancellationSource::new();
        let signal = cancel.signal();
        let runners = Arc::new(Mutex::new(HashMap::new()));
        let driver = SessionDriver { cancel, runners: Arc::clone(&runners) };
        self.drivers.lock().await.insert(session_id, driver);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut consecutive_errors = 0u32;
            let mut interval = tokio::time::interval(this.config.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if signal.is_cancelled() {
                    break;
                }
                let status = match this.store.get(session_id).await {
                    Ok(session) => session.status,
                    Err(_) => break,
                };
                if status.is_terminal() || status == SessionStatus::Paused {
                    break;
                }

                match this.tick(session_id, status, &runners).await {
                    Ok(finished) => {
                        consecutive_errors = 0;
                        if finished {
                            break;
                        }
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        tracing::error!(
                            session_id = %session_id,
                            error = %e,
                            consecutive = consecutive_errors,
                            "orchestration tick failed"
                        );
                        this.bus
                            .publish(SwarmEvent::OrchestrationError {
                                session_id,
                                error: e.to_string(),
                            })
                            .await;
                        if consecutive_errors >= this.config.max_tick_errors {
                            let _ = this
                                .store
                                .transition(session_id, SessionStatus::Failed)
                                .await;
                            break;
                        }
                    }
                }
            }
        });
    }

    /// One phase step. Returns true when the session reached a terminal
    /// state.
    async fn tick(
        self: &Arc<Self>,
        session_id: Uuid,
        status: SessionStatus,
        runners: &Arc<Mutex<HashMap<Uuid, CancellationSource>>>,
    ) -> SwarmResult<bool> {
        // Session-wide runtime budget.
        let session = self.store.get(session_id).await?;
        if let Some(started) = session.metrics.started_at {
            let elapsed = (self.clock.now() - started)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if elapsed > self.config.session_timeout {
                self.bus
                    .publish(SwarmEvent::OrchestrationError {
                        session_id,
                        error: "session timed out".to_string(),
                    })
                    .await;
                self.cancel_runners(runners).await;
                self.store
                    .transition(session_id, SessionStatus::Failed)
                    .await?;
                return Ok(true);
            }
        }

        self.bus
            .publish(SwarmEvent::OrchestrationStep {
                session_id,
                phase: status,
                detail: String::new(),
            })
            .await;

        match status {
            SessionStatus::Planning => {
                self.plan(session_id).await?;
                self.store
                    .transition(session_id, SessionStatus::Delegating)
                    .await?;
                Ok(false)
            }
            SessionStatus::Delegating => {
                self.delegate(session_id, runners).await?;
                self.store
                    .transition(session_id, SessionStatus::Executing)
                    .await?;
                Ok(false)
            }
            SessionStatus::Executing => self.executing_step(session_id, runners).await,
            SessionStatus::Reviewing => {
                self.reviewing_step(session_id, runners).await?;
                Ok(false)
            }
            SessionStatus::Synthesizing => {
                self.synthesize(session_id).await?;
                self.store
                    .transition(session_id, SessionStatus::Complete)
                    .await?;
                Ok(true)
            }
            // Terminal or paused states never reach here; treat anything
            // else as finished defensively.
            _ => Ok(true),
        }
    }

    // ── planning ─────────────────────────────────────────────────────────

    async fn plan(self: &Arc<Self>, session_id: Uuid) -> SwarmResult<()> {
        let already_planned = self
            .store
            .with_entry(session_id, |entry| Ok(!entry.board.is_empty()))
            .await?;
        if already_planned {
            return Ok(());
        }

        let session = self.store.get(session_id).await?;
        let plan = match self.request_plan(&session.original_task, session_id, &session.lead.model).await {
            Ok(plan) if !plan.tasks.is_empty() => plan,
            Ok(_) | Err(_) => {
                tracing::warn!(session_id = %session_id, "planner unavailable, using fallback decomposition");
                fallback_plan(&session.original_task)
            }
        };

        self.store
            .with_entry(session_id, |entry| {
                let mut ids: Vec<Uuid> = Vec::with_capacity(plan.tasks.len());
                for planned in &plan.tasks {
                    let task_type = planned
                        .task_type
                        .as_deref()
                        .and_then(TaskType::from_str)
                        .unwrap_or_default();
                    let priority = planned
                        .priority
                        .as_deref()
                        .and_then(TaskPriority::from_str)
                        .unwrap_or_default();
                    let role = planned
                        .role
                        .as_deref()
                        .and_then(AgentRole::from_str)
                        .unwrap_or_else(|| AgentRole::for_task_type(task_type));

                    let mut task = Task::new(&planned.title, &planned.description)
                        .with_type(task_type)
                        .with_priority(priority)
                        .with_role(role)
                        .with_criteria(planned.acceptance_criteria.clone());
                    task.estimated_tokens = planned.estimated_tokens.unwrap_or(3000);
                    ids.push(entry.board.create_task(task)?);
                }

                // Map symbolic indices (task_0..task_n) onto real ids.
                for (position, planned) in plan.tasks.iter().enumerate() {
                    for dep in &planned.depends_on {
                        let Some(index) = parse_symbolic_index(dep) else { continue };
                        if index < ids.len() && index != position {
                            entry.board.add_dependency(ids[position], ids[index])?;
                        }
                    }
                }
                entry.session.metrics.tasks_created += ids.len() as u32;
                Ok(())
            })
            .await
    }

    async fn request_plan(
        &self,
        original_task: &str,
        session_id: Uuid,
        model: &str,
    ) -> SwarmResult<PlanSpec> {
        let system = "Decompose the user's task into subtasks. Respond with a JSON object \
                      {\"tasks\": [{\"title\", \"description\", \"type\", \"priority\", \
                      \"role\", \"acceptance_criteria\", \"depends_on\", \"estimated_tokens\"}]} \
                      where depends_on holds symbolic indices task_0..task_n.";
        let request = ModelRequest::new(
            session_id,
            model,
            vec![
                ModelMessage::system(system),
                ModelMessage::user(original_task),
            ],
        )
        .with_response_format(ResponseFormat::JsonObject);

        let response = self
            .provider
            .complete(request, crate::domain::ports::cancellation::CancellationSignal::never())
            .await?;
        self.ledger
            .record_usage(
                session_id,
                crate::domain::models::usage::TokenUsage::new(
                    &response.model,
                    response.input_tokens,
                    response.output_tokens,
                ),
                "planning",
                None,
                None,
                None,
            )
            .await;

        let json = extract_json_from_response(&response.content);
        serde_json::from_str(&json)
            .map_err(|e| SwarmError::ModelApiError(format!("unparseable plan: {e}")))
    }

    // ── delegating ───────────────────────────────────────────────────────

    async fn delegate(
        self: &Arc<Self>,
        session_id: Uuid,
        runners: &Arc<Mutex<HashMap<Uuid, CancellationSource>>>,
    ) -> SwarmResult<()> {
        // Assignments decided under the session lock, runners spawned
        // after it is released.
        let assignments: Vec<(Task, AgentInstance)> = self
            .store
            .with_entry(session_id, |entry| {
                let ready: Vec<(Uuid, Option<AgentRole>, TaskType, TaskPriority)> = entry
                    .board
                    .ready_tasks()
                    .iter()
                    .filter(|t| t.assigned_agent_id.is_none())
                    .map(|t| (t.id, t.assigned_role, t.task_type, t.priority))
                    .collect();

                let mut assignments = Vec::new();
                for (task_id, wanted_role, task_type, priority) in ready {
                    let role = wanted_role.unwrap_or_else(|| AgentRole::for_task_type(task_type));
                    let idle = entry.pool.find_idle_by_role(role).map(|a| a.id);
                    let agent_id = match idle {
                        Some(id) => id,
                        None => match entry.pool.spawn(role) {
                            Ok(id) => {
                                entry.session.metrics.agents_spawned += 1;
                                id
                            }
                            // Pool is full: leave the task for a later
                            // delegation round.
                            Err(SwarmError::AgentLimitExceeded { .. }) => continue,
                            Err(e) => return Err(e),
                        },
                    };

                    entry.board.assign_task(task_id, agent_id)?;
                    entry.pool.assign(agent_id, task_id)?;
                    let (title, description) = {
                        let task = entry.board.get(task_id)?;
                        (task.title.clone(), task.description.clone())
                    };
                    entry.mailbox.send(
                        AgentMessage::new(
                            RECIPIENT_LEAD,
                            agent_id.to_string(),
                            MessageType::TaskAssignment,
                            format!("Task assigned: {title}"),
                            description,
                        )
                        .with_priority(MessagePriority::for_task_priority(priority)),
                    );
                    entry.session.metrics.messages_sent += 1;

                    let task = entry.board.get(task_id)?.clone();
                    let agent = entry.pool.get(agent_id)?.clone();
                    assignments.push((task, agent));
                }
                Ok(assignments)
            })
            .await?;

        for (task, mut agent) in assignments {
            // Optional isolation: one worktree per agent.
            if self.config.use_worktrees
                && agent.worktree_id.is_none()
                && self.worktrees.is_repo(&self.workspace_root).await
            {
                match self
                    .worktrees
                    .create(session_id, agent.id, &self.workspace_root)
                    .await
                {
                    Ok(worktree) => {
                        let worktree_id = worktree.id;
                        agent.worktree_id = Some(worktree_id);
                        self.store
                            .with_entry(session_id, |entry| {
                                entry.pool.get_mut(agent.id)?.worktree_id = Some(worktree_id);
                                Ok(())
                            })
                            .await?;
                    }
                    Err(e) => {
                        tracing::warn!(agent_id = %agent.id, error = %e, "worktree creation failed, running unisolated");
                    }
                }
            }
            self.spawn_runner(session_id, agent, task, runners).await;
        }
        Ok(())
    }

    async fn spawn_runner(
        self: &Arc<Self>,
        session_id: Uuid,
        agent: AgentInstance,
        task: Task,
        runners: &Arc<Mutex<HashMap<Uuid, CancellationSource>>>,
    ) {
        let cancel = CancellationSource::new();
        let signal = cancel.signal();
        runners.lock().await.insert(task.id, cancel);

        let workspace = match agent.worktree_id {
            Some(worktree_id) => match self.worktrees.get(worktree_id).await {
                Ok(worktree) => PathBuf::from(worktree.path),
                Err(_) => self.workspace_root.clone(),
            },
            None => self.workspace_root.clone(),
        };
        let tools = Arc::new(ToolHost::new(Arc::clone(&self.fs), workspace));
        let runner = AgentRunner::new(
            Arc::clone(&self.provider),
            tools,
            Arc::clone(&self.bus),
        )
        .with_config(self.config.runner.clone());

        let this = Arc::clone(self);
        let runners = Arc::clone(runners);
        tokio::spawn(async move {
            let task_id = task.id;
            let agent_id = agent.id;
            // Mark the task as actively executing.
            let _ = this
                .store
                .with_entry(session_id, |entry| entry.board.start_task(task_id))
                .await;

            let outcome = runner.run(&agent, &task, signal).await;
            runners.lock().await.remove(&task_id);
            this.finish_task(session_id, agent_id, task_id, task.task_type, outcome)
                .await;
        });
    }

    async fn finish_task(
        self: &Arc<Self>,
        session_id: Uuid,
        agent_id: Uuid,
        task_id: Uuid,
        task_type: TaskType,
        outcome: crate::services::agent_runner::RunnerOutcome,
    ) {
        let role = self
            .store
            .with_entry(session_id, |entry| Ok(entry.pool.get(agent_id).ok().map(|a| a.role)))
            .await
            .ok()
            .flatten();
        for usage in &outcome.usage {
            self.ledger
                .record_usage(
                    session_id,
                    usage.clone(),
                    "execution",
                    Some(agent_id),
                    role,
                    Some(task_id),
                )
                .await;
        }

        let mut result = outcome.result;
        let review_pass = self.config.review_required
            && result.success
            && !matches!(task_type, TaskType::Review);

        let artifact_event = self
            .store
            .with_entry(session_id, |entry| {
                // A reaped or cancelled task no longer belongs to this
                // runner; its outcome is stale and must not touch state.
                let still_held = entry
                    .board
                    .get(task_id)
                    .map(|t| t.assigned_agent_id == Some(agent_id) && t.status.holds_assignment())
                    .unwrap_or(false);
                if !still_held {
                    return Ok(None);
                }
                // While paused no task may advance; outcomes arriving now
                // requeue the task for after resume.
                if entry.session.status == SessionStatus::Paused {
                    entry.board.unassign_task(task_id)?;
                    entry.pool.fail_assignment(agent_id)?;
                    return Ok(None);
                }

                // Token counters on the agent itself.
                if let Ok(agent) = entry.pool.get_mut(agent_id) {
                    for usage in &outcome.usage {
                        agent.input_tokens += usage.input_tokens;
                        agent.output_tokens += usage.output_tokens;
                        agent.model_calls += 1;
                    }
                }
                for usage in &outcome.usage {
                    entry.session.metrics.total_input_tokens += usage.input_tokens;
                    entry.session.metrics.total_output_tokens += usage.output_tokens;
                }

                if result.success {
                    let artifact = Artifact::new(
                        ArtifactType::Summary,
                        format!("task summary: {task_id}"),
                        result.summary.clone(),
                    )
                    .with_task(task_id);
                    let artifact_id = artifact.id;
                    let artifact_name = artifact.name.clone();
                    entry.add_artifact(artifact);
                    result.artifacts.push(artifact_id);

                    if review_pass {
                        entry.board.move_to_review(task_id)?;
                        entry.pool.complete_assignment(agent_id)?;
                    } else {
                        entry.board.complete_task(task_id, result.clone())?;
                        entry.pool.complete_assignment(agent_id)?;
                        entry.session.metrics.tasks_completed += 1;
                    }
                    Ok(Some((artifact_id, artifact_name)))
                } else if result.summary == "cancelled" {
                    // Pause or shutdown: requeue without burning an attempt.
                    entry.board.unassign_task(task_id)?;
                    entry.pool.fail_assignment(agent_id)?;
                    Ok(None)
                } else {
                    let exhausted = entry.board.fail_task(task_id, result.summary.clone())?;
                    entry.pool.fail_assignment(agent_id)?;
                    if exhausted {
                        entry.session.metrics.tasks_failed += 1;
                    }
                    Ok(None)
                }
            })
            .await;

        match artifact_event {
            Ok(Some((artifact_id, name))) => {
                self.bus
                    .publish(SwarmEvent::ArtifactCreated {
                        session_id,
                        artifact_id,
                        name,
                    })
                    .await;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    task_id = %task_id,
                    error = %e,
                    "failed to record task outcome"
                );
            }
        }
    }

    // ── executing ────────────────────────────────────────────────────────

    async fn executing_step(
        self: &Arc<Self>,
        session_id: Uuid,
        runners: &Arc<Mutex<HashMap<Uuid, CancellationSource>>>,
    ) -> SwarmResult<bool> {
        // Reap tasks that ran past the budget; their runners get
        // cancelled and the retry policy decides what happens next.
        let task_timeout = self.config.task_timeout;
        let idle_timeout = self.config.agent_idle_timeout;
        let now = self.clock.now();
        let stuck: Vec<(Uuid, Option<Uuid>)> = self
            .store
            .with_entry(session_id, |entry| {
                let stuck = entry
                    .board
                    .by_status(TaskStatus::InProgress)
                    .iter()
                    .filter(|t| {
                        t.started_at.is_some_and(|s| {
                            (now - s).to_std().unwrap_or(Duration::ZERO) > task_timeout
                        })
                    })
                    .map(|t| (t.id, t.assigned_agent_id))
                    .collect();

                // Idle-watch: a quiet agent flips to Waiting.
                let waiting: Vec<Uuid> = entry
                    .pool
                    .list()
                    .iter()
                    .filter(|a| {
                        a.status == AgentStatus::Idle
                            && (now - a.last_activity_at).to_std().unwrap_or(Duration::ZERO)
                                > idle_timeout
                    })
                    .map(|a| a.id)
                    .collect();
                for agent_id in waiting {
                    entry.pool.set_status(agent_id, AgentStatus::Waiting)?;
                }
                Ok(stuck)
            })
            .await?;

        for (task_id, agent_id) in stuck {
            if let Some(cancel) = runners.lock().await.remove(&task_id) {
                cancel.cancel();
            }
            self.store
                .with_entry(session_id, |entry| {
                    entry.board.fail_task(task_id, "task execution timed out")?;
                    if let Some(agent_id) = agent_id {
                        entry.pool.fail_assignment(agent_id)?;
                    }
                    Ok(())
                })
                .await?;
        }

        let (unassigned_ready, any_review, all_terminal) = self
            .store
            .with_entry(session_id, |entry| {
                let unassigned = entry
                    .board
                    .ready_tasks()
                    .iter()
                    .any(|t| t.assigned_agent_id.is_none());
                let review = !entry.board.by_status(TaskStatus::Review).is_empty();
                Ok((unassigned, review, entry.board.all_terminal()))
            })
            .await?;

        if all_terminal {
            self.store
                .transition(session_id, SessionStatus::Synthesizing)
                .await?;
        } else if any_review {
            self.store
                .transition(session_id, SessionStatus::Reviewing)
                .await?;
        } else if unassigned_ready {
            self.store
                .transition(session_id, SessionStatus::Delegating)
                .await?;
        }
        Ok(false)
    }

    // ── reviewing ────────────────────────────────────────────────────────

    async fn reviewing_step(
        self: &Arc<Self>,
        session_id: Uuid,
        runners: &Arc<Mutex<HashMap<Uuid, CancellationSource>>>,
    ) -> SwarmResult<()> {
        let in_flight: Vec<Uuid> = runners.lock().await.keys().copied().collect();
        let reviews: Vec<(Task, AgentInstance)> = self
            .store
            .with_entry(session_id, |entry| {
                let pending: Vec<Uuid> = entry
                    .board
                    .by_status(TaskStatus::Review)
                    .iter()
                    .map(|t| t.id)
                    .filter(|id| !in_flight.contains(id))
                    .collect();

                let mut reviews = Vec::new();
                for task_id in pending {
                    let idle = entry.pool.find_idle_by_role(AgentRole::Reviewer).map(|a| a.id);
                    let reviewer_id = match idle {
                        Some(id) => id,
                        None => match entry.pool.spawn(AgentRole::Reviewer) {
                            Ok(id) => {
                                entry.session.metrics.agents_spawned += 1;
                                id
                            }
                            Err(SwarmError::AgentLimitExceeded { .. }) => continue,
                            Err(e) => return Err(e),
                        },
                    };
                    entry.pool.assign(reviewer_id, task_id)?;
                    let (title, description) = {
                        let task = entry.board.get(task_id)?;
                        (task.title.clone(), task.description.clone())
                    };
                    entry.mailbox.send(
                        AgentMessage::new(
                            RECIPIENT_LEAD,
                            reviewer_id.to_string(),
                            MessageType::CodeReviewRequest,
                            format!("Review requested: {title}"),
                            description,
                        )
                        .with_priority(MessagePriority::High),
                    );
                    entry.session.metrics.messages_sent += 1;

                    let task = entry.board.get(task_id)?.clone();
                    let agent = entry.pool.get(reviewer_id)?.clone();
                    reviews.push((task, agent));
                }
                Ok(reviews)
            })
            .await?;

        for (task, agent) in reviews {
            self.spawn_review_runner(session_id, agent, task, runners).await;
        }

        let none_left = self
            .store
            .with_entry(session_id, |entry| {
                Ok(entry.board.by_status(TaskStatus::Review).is_empty())
            })
            .await?;
        if none_left {
            self.store
                .transition(session_id, SessionStatus::Executing)
                .await?;
        }
        Ok(())
    }

    async fn spawn_review_runner(
        self: &Arc<Self>,
        session_id: Uuid,
        agent: AgentInstance,
        task: Task,
        runners: &Arc<Mutex<HashMap<Uuid, CancellationSource>>>,
    ) {
        let cancel = CancellationSource::new();
        let signal = cancel.signal();
        runners.lock().await.insert(task.id, cancel);

        let tools = Arc::new(ToolHost::new(
            Arc::clone(&self.fs),
            self.workspace_root.clone(),
        ));
        let runner = AgentRunner::new(
            Arc::clone(&self.provider),
            tools,
            Arc::clone(&self.bus),
        )
        .with_config(self.config.runner.clone());

        let this = Arc::clone(self);
        let runners = Arc::clone(runners);
        tokio::spawn(async move {
            let task_id = task.id;
            let reviewer_id = agent.id;
            let outcome = runner.run(&agent, &task, signal).await;
            runners.lock().await.remove(&task_id);

            for usage in &outcome.usage {
                this.ledger
                    .record_usage(
                        session_id,
                        usage.clone(),
                        "review",
                        Some(reviewer_id),
                        Some(AgentRole::Reviewer),
                        Some(task_id),
                    )
                    .await;
            }

            let mut result = outcome.result;
            result.review_comments = Some(vec![result.summary.clone()]);
            let _ = this
                .store
                .with_entry(session_id, |entry| {
                    let still_review = entry
                        .board
                        .get(task_id)
                        .map(|t| t.status == TaskStatus::Review)
                        .unwrap_or(false);
                    if !still_review {
                        return Ok(());
                    }
                    if result.success {
                        entry.board.complete_task(task_id, result.clone())?;
                        entry.session.metrics.tasks_completed += 1;
                    } else {
                        entry.board.fail_task(task_id, result.summary.clone())?;
                    }
                    entry.pool.complete_assignment(reviewer_id)?;
                    Ok(())
                })
                .await;
        });
    }

    // ── synthesizing ─────────────────────────────────────────────────────

    async fn synthesize(self: &Arc<Self>, session_id: Uuid) -> SwarmResult<()> {
        // Merge any worktrees still holding work. A conflict keeps the
        // session going: the lead gets an urgent message instead.
        for worktree in self.worktrees.for_session(session_id).await {
            if worktree.status != crate::domain::models::worktree::WorktreeStatus::Active {
                continue;
            }
            match self
                .worktrees
                .merge(worktree.id, &self.workspace_root, None)
                .await
            {
                Ok(outcome) if !outcome.success => {
                    let conflicts = outcome.conflicts.join(", ");
                    self.store
                        .with_entry(session_id, |entry| {
                            entry.mailbox.send(
                                AgentMessage::new(
                                    worktree.agent_id.to_string(),
                                    RECIPIENT_LEAD,
                                    MessageType::Error,
                                    "Merge conflict",
                                    format!("Conflicting files: {conflicts}"),
                                )
                                .with_priority(MessagePriority::Urgent),
                            );
                            entry.session.metrics.messages_sent += 1;
                            Ok(())
                        })
                        .await?;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(worktree_id = %worktree.id, error = %e, "worktree merge failed");
                }
            }
        }

        self.store
            .with_entry(session_id, |entry| {
                let completed = entry.session.metrics.tasks_completed;
                let failed = entry.session.metrics.tasks_failed;
                entry.mailbox.broadcast(
                    RECIPIENT_LEAD,
                    format!("Session finished: {completed} task(s) completed, {failed} failed"),
                    if failed > 0 {
                        BroadcastImportance::Warning
                    } else {
                        BroadcastImportance::Info
                    },
                );
                entry.pool.terminate_all();
                Ok(())
            })
            .await
    }

    // ── control surface ──────────────────────────────────────────────────

    /// Pause a session. The driver stops ticking and runners are signalled
    /// to stop: an in-flight subprocess finishes, but no fresh iteration
    /// dispatches tools. Cancelled tasks return to Ready without an
    /// attempt penalty.
    pub async fn pause(&self, session_id: Uuid) -> SwarmResult<()> {
        self.store
            .transition(session_id, SessionStatus::Paused)
            .await?;
        // The driver observes Paused on its next tick and exits.
        if let Some(driver) = self.drivers.lock().await.get(&session_id) {
            self.cancel_runners(&driver.runners).await;
        }
        Ok(())
    }

    /// Resume a paused session. Targets Executing iff work is still in
    /// flight (any task InProgress or Review); otherwise Planning.
    pub async fn resume(self: &Arc<Self>, session_id: Uuid) -> SwarmResult<()> {
        let session = self.store.get(session_id).await?;
        if session.status != SessionStatus::Paused {
            return Err(SwarmError::SessionInvalidState {
                from: session.status.as_str().to_string(),
                to: "resumed".to_string(),
            });
        }
        let has_inflight = self
            .store
            .with_entry(session_id, |entry| {
                Ok(!entry.board.by_status(TaskStatus::InProgress).is_empty()
                    || !entry.board.by_status(TaskStatus::Review).is_empty())
            })
            .await?;
        let target = if has_inflight {
            SessionStatus::Executing
        } else {
            SessionStatus::Planning
        };
        self.store.transition(session_id, target).await?;
        self.spawn_driver(session_id).await;
        Ok(())
    }

    /// Cancel a session: abort runners, cancel remaining tasks, terminate
    /// agents, and move the session to Cancelled.
    pub async fn cancel(self: &Arc<Self>, session_id: Uuid) -> SwarmResult<()> {
        if let Some(driver) = self.drivers.lock().await.remove(&session_id) {
            driver.cancel.cancel();
            self.cancel_runners(&driver.runners).await;
        }
        self.store
            .with_entry(session_id, |entry| {
                entry.board.cancel_active();
                entry.pool.terminate_all();
                Ok(())
            })
            .await?;
        self.store
            .transition(session_id, SessionStatus::Cancelled)
            .await?;
        Ok(())
    }

    /// Stop driving a session without changing its state.
    pub async fn stop(&self, session_id: Uuid) {
        if let Some(driver) = self.drivers.lock().await.remove(&session_id) {
            driver.cancel.cancel();
        }
    }

    async fn cancel_runners(&self, runners: &Arc<Mutex<HashMap<Uuid, CancellationSource>>>) {
        for (_, cancel) in runners.lock().await.drain() {
            cancel.cancel();
        }
    }
}

/// Parse `task_3` into `3`.
fn parse_symbolic_index(symbol: &str) -> Option<usize> {
    symbol.strip_prefix("task_")?.parse().ok()
}

/// Fixed decomposition used when the planner is unavailable.
fn fallback_plan(original_task: &str) -> PlanSpec {
    let stages = [
        ("Research", TaskType::Research, "Research the problem space for"),
        ("Design", TaskType::Design, "Design the solution for"),
        ("Implementation", TaskType::Implementation, "Implement"),
        ("Test", TaskType::Testing, "Write and run tests for"),
        ("Review", TaskType::Review, "Review the completed work for"),
    ];
    let tasks = stages
        .iter()
        .enumerate()
        .map(|(i, (title, task_type, verb))| PlannedTask {
            title: (*title).to_string(),
            description: format!("{verb}: {original_task}"),
            task_type: Some(task_type.as_str().to_string()),
            priority: None,
            role: None,
            acceptance_criteria: vec![],
            depends_on: if i == 0 { vec![] } else { vec![format!("task_{}", i - 1)] },
            estimated_tokens: None,
        })
        .collect();
    PlanSpec { tasks }
}
