//! End-to-end orchestration: a session planned by a scripted provider
//! runs through delegation and execution to completion, costs line up
//! with the recorded usage, and pausing freezes task progress.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hivemind::domain::error::{SwarmError, SwarmResult};
use hivemind::domain::models::agent::AgentStatus;
use hivemind::domain::models::session::SessionStatus;
use hivemind::domain::models::task::TaskStatus;
use hivemind::domain::ports::cancellation::CancellationSignal;
use hivemind::domain::ports::clock::SystemClock;
use hivemind::domain::ports::file_access::{ExecOutput, FileAccess, FileStat};
use hivemind::domain::ports::model_provider::{
    ModelProvider, ModelRequest, ModelResponse, PartStream, StreamPart,
};
use hivemind::domain::ports::vcs::Vcs;
use hivemind::infrastructure::git::GitVcs;
use hivemind::services::cost_ledger::CostLedger;
use hivemind::services::event_bus::{EventBus, SwarmEvent};
use hivemind::services::orchestrator::{Orchestrator, OrchestratorConfig};
use hivemind::services::session_store::{SessionLimits, SessionStore};
use hivemind::services::worktree_manager::{WorktreeConfig, WorktreeManager};

/// Provider whose planner emits a fixed decomposition and whose workers
/// answer with plain text after an optional delay.
struct ScriptedProvider {
    plan_json: Option<String>,
    work_delay: Duration,
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(
        &self,
        request: ModelRequest,
        _cancel: CancellationSignal,
    ) -> SwarmResult<ModelResponse> {
        match &self.plan_json {
            Some(plan) => Ok(ModelResponse {
                content: plan.clone(),
                model: request.model,
                input_tokens: 200,
                output_tokens: 80,
            }),
            None => Err(SwarmError::ModelApiError("planner offline".to_string())),
        }
    }

    async fn stream(
        &self,
        _request: ModelRequest,
        _cancel: CancellationSignal,
    ) -> SwarmResult<PartStream> {
        let delay = self.work_delay;
        let parts = vec![
            Ok(StreamPart::Text { content: "work finished".to_string() }),
            Ok(StreamPart::Usage { input_tokens: 50, output_tokens: 20 }),
        ];
        let stream = futures::stream::iter(parts).then(move |part| async move {
            tokio::time::sleep(delay).await;
            part
        });
        Ok(stream.boxed())
    }
}

struct NullFs;

#[async_trait]
impl FileAccess for NullFs {
    async fn read(&self, path: &Path) -> SwarmResult<Vec<u8>> {
        Err(SwarmError::ValidationError(format!("no such file: {path:?}")))
    }
    async fn write(&self, _path: &Path, _contents: &[u8]) -> SwarmResult<()> {
        Ok(())
    }
    async fn stat(&self, _path: &Path) -> SwarmResult<FileStat> {
        Ok(FileStat { exists: false, is_dir: false, size: 0 })
    }
    async fn mkdir_all(&self, _path: &Path) -> SwarmResult<()> {
        Ok(())
    }
    async fn glob(&self, _pattern: &str, _cwd: &Path) -> SwarmResult<Vec<PathBuf>> {
        Ok(vec![])
    }
    async fn exec(&self, _c: &str, _cwd: &Path, _t: Duration) -> SwarmResult<ExecOutput> {
        Ok(ExecOutput { stdout: String::new(), stderr: String::new(), exit_code: 0 })
    }
}

struct Harness {
    store: Arc<SessionStore>,
    bus: Arc<EventBus>,
    ledger: Arc<CostLedger>,
    orchestrator: Arc<Orchestrator>,
}

fn harness(plan_json: Option<String>, work_delay: Duration) -> Harness {
    let bus = Arc::new(EventBus::default());
    let store = Arc::new(SessionStore::new(Arc::clone(&bus), SessionLimits::default()));
    let ledger = Arc::new(CostLedger::new(Arc::clone(&bus)));
    let clock = Arc::new(SystemClock);
    let worktrees = Arc::new(WorktreeManager::new(
        Arc::new(GitVcs::new()) as Arc<dyn Vcs>,
        clock.clone(),
        WorktreeConfig::default(),
    ));
    let config = OrchestratorConfig {
        tick_interval: Duration::from_millis(20),
        ..OrchestratorConfig::default()
    };
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        Arc::new(ScriptedProvider { plan_json, work_delay }),
        Arc::new(NullFs),
        worktrees,
        Arc::clone(&ledger),
        Arc::clone(&bus),
        clock,
        "/tmp/hivemind-test-workspace",
        config,
    ));
    Harness { store, bus, ledger, orchestrator }
}

async fn wait_for_status(
    sub: &mut hivemind::services::event_bus::EventSubscription,
    session_id: uuid::Uuid,
    wanted: SessionStatus,
) {
    let deadline = Duration::from_secs(15);
    tokio::time::timeout(deadline, async {
        while let Some(envelope) = sub.recv().await {
            if let SwarmEvent::SessionUpdated { session_id: sid, status } = envelope.payload {
                if sid == session_id && status == wanted {
                    return;
                }
            }
        }
        panic!("event stream ended before {wanted:?}");
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {wanted:?}"));
}

#[tokio::test]
async fn planned_session_runs_to_completion() {
    let plan = r#"{
        "tasks": [
            {"title": "Design", "description": "design it", "type": "design",
             "priority": "high", "acceptance_criteria": ["has a diagram"]},
            {"title": "Build", "description": "build it", "type": "implementation",
             "depends_on": ["task_0"], "estimated_tokens": 5000}
        ]
    }"#;
    let h = harness(Some(plan.to_string()), Duration::from_millis(5));
    let mut sub = h.bus.subscribe_bounded(4096).await;

    let session = h.store.create("design and build the thing", None).await.unwrap();
    h.orchestrator.start(session.id).await.unwrap();
    wait_for_status(&mut sub, session.id, SessionStatus::Complete).await;

    let finished = h.store.get(session.id).await.unwrap();
    assert_eq!(finished.status, SessionStatus::Complete);
    assert_eq!(finished.metrics.tasks_created, 2);
    assert_eq!(finished.metrics.tasks_completed, 2);
    assert_eq!(finished.metrics.tasks_failed, 0);
    assert!(finished.metrics.agents_spawned >= 1);
    assert!(finished.metrics.ended_at.is_some());

    h.store
        .with_entry(session.id, |entry| {
            assert!(entry.board.all_terminal());
            assert!(!entry.board.any_failed());
            // Roster shut down during synthesis.
            for agent in entry.pool.list() {
                assert_eq!(agent.status, AgentStatus::Terminated);
            }
            // Completion broadcast went out.
            assert_eq!(entry.mailbox.broadcasts().len(), 1);
            // One summary artifact per completed task.
            assert_eq!(entry.artifacts.len(), 2);
            Ok(())
        })
        .await
        .unwrap();

    // Cost linearity: the summary equals the sum over all records.
    let summary = h.ledger.summary(session.id).await;
    let records = h.ledger.records(session.id).await;
    assert!(!records.is_empty());
    let total: f64 = records.iter().map(|r| r.cost_usd).sum();
    assert!((summary.total_cost_usd - total).abs() < 1e-12);
    // Planning plus one execution call per task.
    assert!(summary.by_request_type.contains_key("planning"));
    assert!(summary.by_request_type.contains_key("execution"));
}

#[tokio::test]
async fn planner_failure_falls_back_to_default_decomposition() {
    let h = harness(None, Duration::from_millis(2));
    let mut sub = h.bus.subscribe_bounded(4096).await;

    let session = h.store.create("mystery work", None).await.unwrap();
    h.orchestrator.start(session.id).await.unwrap();
    wait_for_status(&mut sub, session.id, SessionStatus::Complete).await;

    let finished = h.store.get(session.id).await.unwrap();
    // Research -> Design -> Implementation -> Test -> Review
    assert_eq!(finished.metrics.tasks_created, 5);
    assert_eq!(finished.metrics.tasks_completed, 5);

    h.store
        .with_entry(session.id, |entry| {
            let order = entry.board.execution_order()?;
            assert_eq!(order.len(), 5);
            Ok(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn paused_session_freezes_task_progress() {
    let plan = r#"{
        "tasks": [{"title": "Slow", "description": "slow work", "type": "implementation"}]
    }"#;
    // Workers take long enough that the pause lands mid-execution.
    let h = harness(Some(plan.to_string()), Duration::from_millis(400));
    let mut sub = h.bus.subscribe_bounded(4096).await;

    let session = h.store.create("slow session", None).await.unwrap();
    h.orchestrator.start(session.id).await.unwrap();
    wait_for_status(&mut sub, session.id, SessionStatus::Executing).await;

    h.orchestrator.pause(session.id).await.unwrap();
    assert_eq!(
        h.store.get(session.id).await.unwrap().status,
        SessionStatus::Paused
    );

    let rank_at_pause = h
        .store
        .with_entry(session.id, |entry| {
            Ok(entry.board.list().iter().map(|t| t.status.rank()).collect::<Vec<_>>())
        })
        .await
        .unwrap();

    // Give the in-flight runner ample time to surface its outcome.
    tokio::time::sleep(Duration::from_millis(800)).await;

    let (ranks, statuses) = h
        .store
        .with_entry(session.id, |entry| {
            let tasks = entry.board.list();
            Ok((
                tasks.iter().map(|t| t.status.rank()).collect::<Vec<_>>(),
                tasks.iter().map(|t| t.status).collect::<Vec<_>>(),
            ))
        })
        .await
        .unwrap();

    // No task advanced while paused.
    for (before, after) in rank_at_pause.iter().zip(&ranks) {
        assert!(
            after <= before,
            "task advanced while paused: {before} -> {after} ({statuses:?})"
        );
    }
    assert_eq!(
        h.store.get(session.id).await.unwrap().status,
        SessionStatus::Paused
    );

    // Resume finishes the job. Nothing is mid-flight, so the session
    // re-enters via Planning and the existing board is reused.
    h.orchestrator.resume(session.id).await.unwrap();
    wait_for_status(&mut sub, session.id, SessionStatus::Complete).await;
    let finished = h.store.get(session.id).await.unwrap();
    assert_eq!(finished.metrics.tasks_created, 1);
    assert_eq!(finished.metrics.tasks_completed, 1);
}

#[tokio::test]
async fn cancelled_session_terminates_everything() {
    let plan = r#"{
        "tasks": [{"title": "Slow", "description": "slow work"}]
    }"#;
    let h = harness(Some(plan.to_string()), Duration::from_millis(400));
    let mut sub = h.bus.subscribe_bounded(4096).await;

    let session = h.store.create("doomed session", None).await.unwrap();
    h.orchestrator.start(session.id).await.unwrap();
    wait_for_status(&mut sub, session.id, SessionStatus::Executing).await;

    h.orchestrator.cancel(session.id).await.unwrap();
    let cancelled = h.store.get(session.id).await.unwrap();
    assert_eq!(cancelled.status, SessionStatus::Cancelled);

    h.store
        .with_entry(session.id, |entry| {
            assert!(entry.board.all_terminal());
            for agent in entry.pool.list() {
                assert_eq!(agent.status, AgentStatus::Terminated);
            }
            Ok(())
        })
        .await
        .unwrap();

    // Cancelled is absorbing.
    let err = h
        .store
        .transition(session.id, SessionStatus::Planning)
        .await
        .unwrap_err();
    assert!(matches!(err, SwarmError::SessionInvalidState { .. }));
}

#[tokio::test]
async fn resume_rule_targets_planning_when_nothing_in_flight() {
    let plan = r#"{
        "tasks": [{"title": "Quick", "description": "quick work"}]
    }"#;
    let h = harness(Some(plan.to_string()), Duration::from_millis(1));
    let session = h.store.create("resume probe", None).await.unwrap();

    // Pause straight out of Planning: no task is in flight.
    h.store.transition(session.id, SessionStatus::Planning).await.unwrap();
    h.store.transition(session.id, SessionStatus::Paused).await.unwrap();

    h.orchestrator.resume(session.id).await.unwrap();
    // Resume decided Planning (no InProgress/Review task existed). The
    // driver may have advanced beyond it already, so assert on history:
    // the session must not still be paused and must be making progress.
    let status = h.store.get(session.id).await.unwrap().status;
    assert_ne!(status, SessionStatus::Paused);
    h.orchestrator.stop(session.id).await;
}

#[tokio::test]
async fn resume_requires_paused() {
    let h = harness(None, Duration::from_millis(1));
    let session = h.store.create("not paused", None).await.unwrap();
    let err = h.orchestrator.resume(session.id).await.unwrap_err();
    assert!(matches!(err, SwarmError::SessionInvalidState { .. }));

    let tasks_with_review = h
        .store
        .with_entry(session.id, |entry| {
            Ok(entry.board.by_status(TaskStatus::Review).len())
        })
        .await
        .unwrap();
    assert_eq!(tasks_with_review, 0);
}
