//! Session store: registry plus lifecycle state machine.
//!
//! Each session entry bundles the session record with the state it
//! exclusively owns (task board, agent roster, mailbox, artifacts) behind
//! one mutex, so board, pool, and mailbox operations on the same session
//! are linearisable while different sessions proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::domain::error::{SwarmError, SwarmResult};
use crate::domain::models::artifact::Artifact;
use crate::domain::models::session::{Session, SessionStatus};
use crate::services::agent_pool::AgentPool;
use crate::services::event_bus::{EventBus, SwarmEvent};
use crate::services::mailbox::Mailbox;
use crate::services::task_board::TaskBoard;

/// Limits applied when creating sessions.
#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub max_concurrent_sessions: usize,
    pub max_tasks_per_session: usize,
    pub max_agents_per_session: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 10,
            max_tasks_per_session: 100,
            max_agents_per_session: 5,
        }
    }
}

/// Everything a session exclusively owns.
#[derive(Debug)]
pub struct SessionEntry {
    pub session: Session,
    pub board: TaskBoard,
    pub pool: AgentPool,
    pub mailbox: Mailbox,
    pub artifacts: Vec<Artifact>,
}

impl SessionEntry {
    fn new(session: Session, limits: &SessionLimits) -> Self {
        let id = session.id;
        let max_agents = session.lead.max_concurrent_agents;
        Self {
            session,
            board: TaskBoard::new(id, limits.max_tasks_per_session),
            pool: AgentPool::new(id, max_agents),
            mailbox: Mailbox::new(id),
            artifacts: Vec::new(),
        }
    }

    /// Register an artifact, returning its id.
    pub fn add_artifact(&mut self, artifact: Artifact) -> Uuid {
        let id = artifact.id;
        self.artifacts.push(artifact);
        id
    }

    fn drain_events(&mut self) -> Vec<SwarmEvent> {
        let mut events = self.board.drain_events();
        events.extend(self.pool.drain_events());
        events.extend(self.mailbox.drain_events());
        events
    }
}

/// Partial update applied by [`SessionStore::update`].
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub name: Option<String>,
}

/// Registry of sessions with the legal-transition state machine.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<SessionEntry>>>>,
    bus: Arc<EventBus>,
    limits: SessionLimits,
}

impl SessionStore {
    pub fn new(bus: Arc<EventBus>, limits: SessionLimits) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            bus,
            limits,
        }
    }

    /// Create a session in Initializing.
    pub async fn create(
        &self,
        task: impl Into<String>,
        name: Option<String>,
    ) -> SwarmResult<Session> {
        let active = self.active_count().await;
        if active >= self.limits.max_concurrent_sessions {
            return Err(SwarmError::SessionLimitExceeded {
                current: active,
                max: self.limits.max_concurrent_sessions,
            });
        }

        let session = Session::new(task, name);
        let snapshot = session.clone();
        let entry = SessionEntry::new(session, &self.limits);
        self.sessions
            .write()
            .await
            .insert(snapshot.id, Arc::new(Mutex::new(entry)));

        self.bus
            .publish(SwarmEvent::SessionUpdated {
                session_id: snapshot.id,
                status: snapshot.status,
            })
            .await;
        tracing::info!(session_id = %snapshot.id, "session created");
        Ok(snapshot)
    }

    /// Snapshot of a session record.
    pub async fn get(&self, id: Uuid) -> SwarmResult<Session> {
        let entry = self.entry(id).await?;
        let guard = entry.lock().await;
        Ok(guard.session.clone())
    }

    /// Handle to a session's owned state.
    pub async fn entry(&self, id: Uuid) -> SwarmResult<Arc<Mutex<SessionEntry>>> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SwarmError::SessionNotFound(id))
    }

    /// Snapshots of all sessions, in no particular order.
    pub async fn list(&self) -> Vec<Session> {
        let handles: Vec<Arc<Mutex<SessionEntry>>> =
            self.sessions.read().await.values().cloned().collect();
        let mut sessions = Vec::with_capacity(handles.len());
        for handle in handles {
            sessions.push(handle.lock().await.session.clone());
        }
        sessions
    }

    /// Apply a partial update.
    pub async fn update(&self, id: Uuid, patch: SessionPatch) -> SwarmResult<Session> {
        let entry = self.entry(id).await?;
        let mut guard = entry.lock().await;
        if let Some(name) = patch.name {
            guard.session.name = name;
        }
        guard.session.updated_at = chrono::Utc::now();
        Ok(guard.session.clone())
    }

    /// Delete a session. Admissible only in Initializing or a terminal
    /// state.
    pub async fn delete(&self, id: Uuid) -> SwarmResult<bool> {
        let entry = self.entry(id).await?;
        {
            let guard = entry.lock().await;
            if !guard.session.is_deletable() {
                return Err(SwarmError::SessionInvalidState {
                    from: guard.session.status.as_str().to_string(),
                    to: "deleted".to_string(),
                });
            }
        }
        let removed = self.sessions.write().await.remove(&id).is_some();
        Ok(removed)
    }

    /// Attempt a lifecycle transition, publishing `SessionUpdated` on
    /// success. On failure the stored state is unchanged.
    pub async fn transition(&self, id: Uuid, target: SessionStatus) -> SwarmResult<Session> {
        let entry = self.entry(id).await?;
        let snapshot = {
            let mut guard = entry.lock().await;
            match guard.session.transition(target) {
                Ok(_) => guard.session.clone(),
                Err((from, to)) => {
                    return Err(SwarmError::SessionInvalidState {
                        from: from.as_str().to_string(),
                        to: to.as_str().to_string(),
                    })
                }
            }
        };
        self.bus
            .publish(SwarmEvent::SessionUpdated {
                session_id: id,
                status: snapshot.status,
            })
            .await;
        tracing::info!(session_id = %id, status = snapshot.status.as_str(), "session transitioned");
        Ok(snapshot)
    }

    /// Run a closure against a session's owned state under its mutex,
    /// then publish every event the mutation produced, in order.
    pub async fn with_entry<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut SessionEntry) -> SwarmResult<R>,
    ) -> SwarmResult<R> {
        let entry = self.entry(id).await?;
        let (result, events) = {
            let mut guard = entry.lock().await;
            let result = f(&mut guard);
            let events = guard.drain_events();
            (result, events)
        };
        for event in events {
            self.bus.publish(event).await;
        }
        result
    }

    /// Sessions not yet in a terminal state.
    pub async fn active_count(&self) -> usize {
        let handles: Vec<Arc<Mutex<SessionEntry>>> =
            self.sessions.read().await.values().cloned().collect();
        let mut count = 0;
        for handle in handles {
            if !handle.lock().await.session.is_terminal() {
                count += 1;
            }
        }
        count
    }

    /// Event bus this store publishes to.
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// Configured limits.
    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::task::Task;

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(EventBus::default()), SessionLimits::default())
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = store();
        let session = store.create("build a thing", None).await.unwrap();
        let fetched = store.get(session.id).await.unwrap();
        assert_eq!(fetched.id, session.id);
        assert_eq!(fetched.status, SessionStatus::Initializing);
    }

    #[tokio::test]
    async fn test_session_limit() {
        let store = SessionStore::new(
            Arc::new(EventBus::default()),
            SessionLimits { max_concurrent_sessions: 1, ..Default::default() },
        );
        store.create("one", None).await.unwrap();
        let err = store.create("two", None).await.unwrap_err();
        assert!(matches!(err, SwarmError::SessionLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn test_terminal_sessions_free_slots() {
        let store = SessionStore::new(
            Arc::new(EventBus::default()),
            SessionLimits { max_concurrent_sessions: 1, ..Default::default() },
        );
        let s = store.create("one", None).await.unwrap();
        store.transition(s.id, SessionStatus::Cancelled).await.unwrap();
        store.create("two", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_illegal_transition_leaves_state_unchanged() {
        let store = store();
        let s = store.create("t", None).await.unwrap();
        store.transition(s.id, SessionStatus::Planning).await.unwrap();
        store.transition(s.id, SessionStatus::Delegating).await.unwrap();
        store.transition(s.id, SessionStatus::Executing).await.unwrap();
        store.transition(s.id, SessionStatus::Synthesizing).await.unwrap();
        store.transition(s.id, SessionStatus::Complete).await.unwrap();

        let err = store
            .transition(s.id, SessionStatus::Executing)
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::SessionInvalidState { .. }));
        assert_eq!(
            store.get(s.id).await.unwrap().status,
            SessionStatus::Complete
        );
    }

    #[tokio::test]
    async fn test_delete_rules() {
        let store = store();
        let s = store.create("t", None).await.unwrap();
        // Deletable while Initializing.
        assert!(store.delete(s.id).await.unwrap());

        let s = store.create("t2", None).await.unwrap();
        store.transition(s.id, SessionStatus::Planning).await.unwrap();
        let err = store.delete(s.id).await.unwrap_err();
        assert!(matches!(err, SwarmError::SessionInvalidState { .. }));

        store.transition(s.id, SessionStatus::Failed).await.unwrap();
        assert!(store.delete(s.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let store = store();
        assert!(matches!(
            store.get(Uuid::new_v4()).await,
            Err(SwarmError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_with_entry_publishes_component_events() {
        let bus = Arc::new(EventBus::default());
        let store = SessionStore::new(Arc::clone(&bus), SessionLimits::default());
        let mut sub = bus.subscribe().await;
        let s = store.create("t", None).await.unwrap();
        // consume SessionUpdated
        sub.recv().await.unwrap();

        store
            .with_entry(s.id, |entry| {
                entry.board.create_task(Task::new("t1", "d1")).map(|_| ())
            })
            .await
            .unwrap();

        let created = sub.recv().await.unwrap();
        assert!(matches!(created.payload, SwarmEvent::TaskCreated { .. }));
        let ready = sub.recv().await.unwrap();
        assert!(matches!(
            ready.payload,
            SwarmEvent::TaskUpdated { status: crate::domain::models::task::TaskStatus::Ready, .. }
        ));
    }

    #[tokio::test]
    async fn test_transition_publishes_event() {
        let bus = Arc::new(EventBus::default());
        let store = SessionStore::new(Arc::clone(&bus), SessionLimits::default());
        let mut sub = bus.subscribe().await;
        let s = store.create("t", None).await.unwrap();
        sub.recv().await.unwrap();

        store.transition(s.id, SessionStatus::Planning).await.unwrap();
        let event = sub.recv().await.unwrap();
        assert!(matches!(
            event.payload,
            SwarmEvent::SessionUpdated { status: SessionStatus::Planning, .. }
        ));
    }
}
