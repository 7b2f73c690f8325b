//! Session lifecycle: the transition table is the single source of truth,
//! rejected transitions never mutate the store, and terminal states
//! absorb everything.

use std::sync::Arc;

use hivemind::domain::error::SwarmError;
use hivemind::domain::models::session::SessionStatus;
use hivemind::services::event_bus::EventBus;
use hivemind::services::session_store::{SessionLimits, SessionStore};

fn store() -> SessionStore {
    SessionStore::new(Arc::new(EventBus::default()), SessionLimits::default())
}

const ALL_STATUSES: [SessionStatus; 10] = [
    SessionStatus::Initializing,
    SessionStatus::Planning,
    SessionStatus::Delegating,
    SessionStatus::Executing,
    SessionStatus::Reviewing,
    SessionStatus::Synthesizing,
    SessionStatus::Paused,
    SessionStatus::Complete,
    SessionStatus::Failed,
    SessionStatus::Cancelled,
];

#[tokio::test]
async fn illegal_transition_from_complete_is_rejected() {
    let store = store();
    let s = store.create("task", None).await.unwrap();
    for status in [
        SessionStatus::Planning,
        SessionStatus::Delegating,
        SessionStatus::Executing,
        SessionStatus::Synthesizing,
        SessionStatus::Complete,
    ] {
        store.transition(s.id, status).await.unwrap();
    }

    let err = store.transition(s.id, SessionStatus::Executing).await.unwrap_err();
    assert!(matches!(err, SwarmError::SessionInvalidState { .. }));
    assert_eq!(store.get(s.id).await.unwrap().status, SessionStatus::Complete);
}

#[tokio::test]
async fn every_transition_agrees_with_the_table() {
    // For every (from, to) pair, the store accepts exactly the pairs the
    // table allows, and a rejection leaves the stored status untouched.
    for from in ALL_STATUSES {
        for to in ALL_STATUSES {
            let store = store();
            let s = store.create("matrix", None).await.unwrap();

            // Walk the session into the `from` state. All states are
            // reachable along legal edges.
            let path: &[SessionStatus] = match from {
                SessionStatus::Initializing => &[],
                SessionStatus::Planning => &[SessionStatus::Planning],
                SessionStatus::Delegating => {
                    &[SessionStatus::Planning, SessionStatus::Delegating]
                }
                SessionStatus::Executing => &[
                    SessionStatus::Planning,
                    SessionStatus::Delegating,
                    SessionStatus::Executing,
                ],
                SessionStatus::Reviewing => &[
                    SessionStatus::Planning,
                    SessionStatus::Delegating,
                    SessionStatus::Executing,
                    SessionStatus::Reviewing,
                ],
                SessionStatus::Synthesizing => &[
                    SessionStatus::Planning,
                    SessionStatus::Delegating,
                    SessionStatus::Executing,
                    SessionStatus::Synthesizing,
                ],
                SessionStatus::Paused => &[SessionStatus::Planning, SessionStatus::Paused],
                SessionStatus::Complete => &[
                    SessionStatus::Planning,
                    SessionStatus::Delegating,
                    SessionStatus::Executing,
                    SessionStatus::Synthesizing,
                    SessionStatus::Complete,
                ],
                SessionStatus::Failed => &[SessionStatus::Failed],
                SessionStatus::Cancelled => &[SessionStatus::Cancelled],
            };
            for step in path {
                store.transition(s.id, *step).await.unwrap();
            }
            assert_eq!(store.get(s.id).await.unwrap().status, from);

            let expected_legal = from.can_transition_to(to);
            let outcome = store.transition(s.id, to).await;
            assert_eq!(
                outcome.is_ok(),
                expected_legal,
                "transition {from:?} -> {to:?} disagreed with the table"
            );
            let after = store.get(s.id).await.unwrap().status;
            if expected_legal {
                assert_eq!(after, to);
            } else {
                assert_eq!(after, from, "rejected transition mutated state");
            }
        }
    }
}

#[tokio::test]
async fn metrics_timestamps_follow_lifecycle() {
    let store = store();
    let s = store.create("timing", None).await.unwrap();
    assert!(store.get(s.id).await.unwrap().metrics.started_at.is_none());

    store.transition(s.id, SessionStatus::Planning).await.unwrap();
    let mid = store.get(s.id).await.unwrap();
    assert!(mid.metrics.started_at.is_some());
    assert!(mid.metrics.ended_at.is_none());

    store.transition(s.id, SessionStatus::Cancelled).await.unwrap();
    let done = store.get(s.id).await.unwrap();
    assert!(done.metrics.ended_at.is_some());
    assert!(done.metrics.duration_secs.is_some());
}
