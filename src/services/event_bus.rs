//! EventBus for unified event streaming and distribution.
//!
//! Every mutating operation in the core publishes a typed [`SwarmEvent`].
//! Events are wrapped in a sequence-numbered envelope and fanned out to
//! subscribers. The default delivery policy is back-pressure: a slow
//! subscriber slows the publisher. A subscriber may instead declare a
//! bounded buffer, in which case events for that subscriber alone are
//! dropped when the buffer is full, with a per-subscriber drop counter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::domain::models::agent::{AgentRole, AgentStatus};
use crate::domain::models::message::BroadcastImportance;
use crate::domain::models::session::SessionStatus;
use crate::domain::models::task::TaskStatus;

/// Event severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Typed event payloads exposed by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SwarmEvent {
    SessionUpdated {
        session_id: Uuid,
        status: SessionStatus,
    },
    TaskCreated {
        session_id: Uuid,
        task_id: Uuid,
        title: String,
    },
    TaskUpdated {
        session_id: Uuid,
        task_id: Uuid,
        status: TaskStatus,
    },
    TaskDeleted {
        session_id: Uuid,
        task_id: Uuid,
    },
    AgentSpawned {
        session_id: Uuid,
        agent_id: Uuid,
        role: AgentRole,
    },
    AgentUpdated {
        session_id: Uuid,
        agent_id: Uuid,
        status: AgentStatus,
        /// Task progress percentage, when the agent is mid-execution
        progress: Option<u8>,
    },
    AgentTerminated {
        session_id: Uuid,
        agent_id: Uuid,
    },
    MessageSent {
        session_id: Uuid,
        message_id: Uuid,
        from: String,
        to: String,
    },
    BroadcastSent {
        session_id: Uuid,
        broadcast_id: Uuid,
        importance: BroadcastImportance,
    },
    ArtifactCreated {
        session_id: Uuid,
        artifact_id: Uuid,
        name: String,
    },
    ToolCall {
        session_id: Uuid,
        agent_id: Uuid,
        tool: String,
        success: bool,
    },
    CostUpdate {
        session_id: Uuid,
        cost_usd: f64,
        total_cost_usd: f64,
    },
    KeyUsage {
        user_id: String,
        key_id: Uuid,
        tokens: u64,
    },
    QuotaExceeded {
        user_id: String,
        key_id: Option<Uuid>,
        used: u64,
        quota: u64,
    },
    RateLimitHit {
        key_id: Uuid,
        retry_after_secs: u64,
    },
    OrchestrationStep {
        session_id: Uuid,
        phase: SessionStatus,
        detail: String,
    },
    OrchestrationError {
        session_id: Uuid,
        error: String,
    },
}

impl SwarmEvent {
    /// Discriminant name, for filtering and log lines.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::SessionUpdated { .. } => "SessionUpdated",
            Self::TaskCreated { .. } => "TaskCreated",
            Self::TaskUpdated { .. } => "TaskUpdated",
            Self::TaskDeleted { .. } => "TaskDeleted",
            Self::AgentSpawned { .. } => "AgentSpawned",
            Self::AgentUpdated { .. } => "AgentUpdated",
            Self::AgentTerminated { .. } => "AgentTerminated",
            Self::MessageSent { .. } => "MessageSent",
            Self::BroadcastSent { .. } => "BroadcastSent",
            Self::ArtifactCreated { .. } => "ArtifactCreated",
            Self::ToolCall { .. } => "ToolCall",
            Self::CostUpdate { .. } => "CostUpdate",
            Self::KeyUsage { .. } => "KeyUsage",
            Self::QuotaExceeded { .. } => "QuotaExceeded",
            Self::RateLimitHit { .. } => "RateLimitHit",
            Self::OrchestrationStep { .. } => "OrchestrationStep",
            Self::OrchestrationError { .. } => "OrchestrationError",
        }
    }

    /// Default severity for this event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            Self::TaskUpdated { .. }
            | Self::AgentUpdated { .. }
            | Self::ToolCall { .. }
            | Self::CostUpdate { .. }
            | Self::KeyUsage { .. }
            | Self::MessageSent { .. } => EventSeverity::Debug,
            Self::QuotaExceeded { .. } | Self::RateLimitHit { .. } => EventSeverity::Warning,
            Self::OrchestrationError { .. } => EventSeverity::Error,
            _ => EventSeverity::Info,
        }
    }
}

/// Sequence-numbered envelope delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    /// Monotonically increasing, assigned at publish time
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub severity: EventSeverity,
    pub payload: SwarmEvent,
}

/// Delivery policy for one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryPolicy {
    /// Publisher waits for buffer space (default).
    Backpressure,
    /// Events are dropped when the buffer is full.
    Lossy,
}

struct Subscriber {
    id: Uuid,
    sender: mpsc::Sender<EventEnvelope>,
    policy: DeliveryPolicy,
    dropped: Arc<AtomicU64>,
}

/// Receiving side of a subscription.
pub struct EventSubscription {
    pub id: Uuid,
    receiver: mpsc::Receiver<EventEnvelope>,
    dropped: Arc<AtomicU64>,
}

impl EventSubscription {
    /// Receive the next event; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        self.receiver.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        self.receiver.try_recv().ok()
    }

    /// Events dropped for this subscriber (only nonzero for bounded
    /// subscriptions).
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Configuration for the event bus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Buffer size for back-pressure subscribers.
    pub default_buffer: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { default_buffer: 1024 }
    }
}

/// Central event bus fanning events out to subscribers.
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    sequence: AtomicU64,
    config: EventBusConfig,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            sequence: AtomicU64::new(0),
            config,
        }
    }

    /// Subscribe with the default back-pressure policy.
    pub async fn subscribe(&self) -> EventSubscription {
        self.register(self.config.default_buffer, DeliveryPolicy::Backpressure)
            .await
    }

    /// Subscribe with an explicitly bounded, lossy buffer.
    pub async fn subscribe_bounded(&self, capacity: usize) -> EventSubscription {
        self.register(capacity.max(1), DeliveryPolicy::Lossy).await
    }

    async fn register(&self, capacity: usize, policy: DeliveryPolicy) -> EventSubscription {
        let (sender, receiver) = mpsc::channel(capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let id = Uuid::new_v4();
        self.subscribers.write().await.push(Subscriber {
            id,
            sender,
            policy,
            dropped: Arc::clone(&dropped),
        });
        EventSubscription { id, receiver, dropped }
    }

    /// Publish an event to all subscribers in registration order.
    pub async fn publish(&self, payload: SwarmEvent) {
        let envelope = EventEnvelope {
            id: Uuid::new_v4(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            severity: payload.severity(),
            payload,
        };

        tracing::debug!(
            event = envelope.payload.variant_name(),
            sequence = envelope.sequence,
            "publishing event"
        );

        let mut gone: Vec<Uuid> = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for sub in subscribers.iter() {
                match sub.policy {
                    DeliveryPolicy::Backpressure => {
                        if sub.sender.send(envelope.clone()).await.is_err() {
                            gone.push(sub.id);
                        }
                    }
                    DeliveryPolicy::Lossy => match sub.sender.try_send(envelope.clone()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            sub.dropped.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => gone.push(sub.id),
                    },
                }
            }
        }

        if !gone.is_empty() {
            self.subscribers
                .write()
                .await
                .retain(|s| !gone.contains(&s.id));
        }
    }

    /// Current sequence counter.
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Number of live subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_event(session_id: Uuid) -> SwarmEvent {
        SwarmEvent::SessionUpdated {
            session_id,
            status: SessionStatus::Planning,
        }
    }

    #[tokio::test]
    async fn test_sequence_assignment() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe().await;

        bus.publish(session_event(Uuid::new_v4())).await;
        bus.publish(session_event(Uuid::new_v4())).await;

        assert_eq!(sub.recv().await.unwrap().sequence, 0);
        assert_eq!(sub.recv().await.unwrap().sequence, 1);
        assert_eq!(bus.current_sequence(), 2);
    }

    #[tokio::test]
    async fn test_publish_order_preserved() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe().await;
        let session_id = Uuid::new_v4();
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();

        bus.publish(SwarmEvent::TaskUpdated {
            session_id,
            task_id: t1,
            status: TaskStatus::Complete,
        })
        .await;
        bus.publish(SwarmEvent::TaskUpdated {
            session_id,
            task_id: t2,
            status: TaskStatus::Ready,
        })
        .await;

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert!(matches!(
            first.payload,
            SwarmEvent::TaskUpdated { task_id, status: TaskStatus::Complete, .. } if task_id == t1
        ));
        assert!(matches!(
            second.payload,
            SwarmEvent::TaskUpdated { task_id, status: TaskStatus::Ready, .. } if task_id == t2
        ));
    }

    #[tokio::test]
    async fn test_bounded_subscriber_drops_when_full() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe_bounded(2).await;

        for _ in 0..5 {
            bus.publish(session_event(Uuid::new_v4())).await;
        }

        // Two buffered, three dropped; publisher never blocked.
        assert_eq!(sub.dropped_count(), 3);
        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_dropped_subscriber_pruned() {
        let bus = EventBus::default();
        let sub = bus.subscribe().await;
        assert_eq!(bus.subscriber_count().await, 1);

        drop(sub);
        bus.publish(session_event(Uuid::new_v4())).await;
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[test]
    fn test_severity_mapping() {
        let err = SwarmEvent::OrchestrationError {
            session_id: Uuid::new_v4(),
            error: "boom".to_string(),
        };
        assert_eq!(err.severity(), EventSeverity::Error);

        let quota = SwarmEvent::QuotaExceeded {
            user_id: "u".to_string(),
            key_id: None,
            used: 10,
            quota: 10,
        };
        assert_eq!(quota.severity(), EventSeverity::Warning);
        assert_eq!(quota.variant_name(), "QuotaExceeded");
    }
}
