//! Inter-agent messaging domain models.
//!
//! Point-to-point messages flow through the session mailbox; broadcasts
//! reach every agent and collect acknowledgements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Reserved recipient meaning the session's lead agent.
pub const RECIPIENT_LEAD: &str = "lead";
/// Reserved recipient meaning every agent in the session.
pub const RECIPIENT_ALL: &str = "all";

/// Type of an agent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// A task is being handed to the recipient.
    TaskAssignment,
    /// Progress or state report on a task.
    StatusUpdate,
    /// Ask another agent for information.
    Question,
    /// Answer to a question.
    Answer,
    /// Ask the recipient to review changes.
    CodeReviewRequest,
    /// Reviewer feedback.
    CodeReviewResponse,
    /// Work finished notification.
    Completion,
    /// Error report.
    Error,
    /// Anything else.
    Info,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskAssignment => "task_assignment",
            Self::StatusUpdate => "status_update",
            Self::Question => "question",
            Self::Answer => "answer",
            Self::CodeReviewRequest => "code_review_request",
            Self::CodeReviewResponse => "code_review_response",
            Self::Completion => "completion",
            Self::Error => "error",
            Self::Info => "info",
        }
    }
}

/// Priority of an agent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for MessagePriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl MessagePriority {
    /// Priority for a task-assignment message, derived from task priority.
    pub fn for_task_priority(priority: super::task::TaskPriority) -> Self {
        use super::task::TaskPriority;
        match priority {
            TaskPriority::Critical => Self::Urgent,
            TaskPriority::High => Self::High,
            TaskPriority::Medium | TaskPriority::Low => Self::Normal,
        }
    }
}

/// A point-to-point message between agents (or the lead).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Unique message ID.
    pub id: Uuid,
    /// When sent.
    pub timestamp: DateTime<Utc>,
    /// Sender: agent id or `"lead"`.
    pub from: String,
    /// Recipient: agent id, `"lead"`, or `"all"`.
    pub to: String,
    /// Message type.
    pub message_type: MessageType,
    /// Subject line.
    pub subject: String,
    /// Body.
    pub content: String,
    /// Priority level.
    pub priority: MessagePriority,
    /// Whether the sender expects an answer.
    pub requires_response: bool,
    /// Deadline for the expected answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_deadline: Option<DateTime<Utc>>,
    /// Whether the recipient has read it.
    pub read: bool,
    /// When it was read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    /// Conversation thread. Defaults to a fresh id per message.
    pub thread_id: Uuid,
    /// Message being replied to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
    /// Attached artifact IDs.
    #[serde(default)]
    pub attachments: Vec<Uuid>,
}

impl AgentMessage {
    /// Create a new message. A fresh thread id is allocated.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        message_type: MessageType,
        subject: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            timestamp: Utc::now(),
            from: from.into(),
            to: to.into(),
            message_type,
            subject: subject.into(),
            content: content.into(),
            priority: MessagePriority::default(),
            requires_response: false,
            response_deadline: None,
            read: false,
            read_at: None,
            thread_id: id,
            reply_to: None,
            attachments: Vec::new(),
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Require a response.
    pub fn with_response_required(mut self, deadline: Option<DateTime<Utc>>) -> Self {
        self.requires_response = true;
        self.response_deadline = deadline;
        self
    }

    /// Join an existing thread.
    pub fn in_thread(mut self, thread_id: Uuid) -> Self {
        self.thread_id = thread_id;
        self
    }

    /// Mark as a reply, continuing the original thread.
    pub fn with_reply_to(mut self, original: &AgentMessage) -> Self {
        self.reply_to = Some(original.id);
        self.thread_id = original.thread_id;
        self
    }

    /// Attach artifacts.
    pub fn with_attachments(mut self, attachments: Vec<Uuid>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Mark as read.
    pub fn mark_read(&mut self) {
        if !self.read {
            self.read = true;
            self.read_at = Some(Utc::now());
        }
    }

    /// Whether the recipient is a concrete agent rather than a reserved name.
    pub fn has_concrete_recipient(&self) -> bool {
        self.to != RECIPIENT_LEAD && self.to != RECIPIENT_ALL
    }
}

/// Importance of a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastImportance {
    Info,
    Warning,
    Critical,
}

/// A one-to-all announcement with acknowledgement tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    /// Unique identifier.
    pub id: Uuid,
    /// When sent.
    pub timestamp: DateTime<Utc>,
    /// Sender: agent id or `"lead"`.
    pub from: String,
    /// Body.
    pub content: String,
    /// Importance level.
    pub importance: BroadcastImportance,
    /// Agent ids that acknowledged this broadcast.
    pub acknowledged_by: BTreeSet<String>,
}

impl BroadcastMessage {
    pub fn new(
        from: impl Into<String>,
        content: impl Into<String>,
        importance: BroadcastImportance,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            from: from.into(),
            content: content.into(),
            importance,
            acknowledged_by: BTreeSet::new(),
        }
    }

    /// Record an acknowledgement. Returns false if already acknowledged.
    pub fn acknowledge(&mut self, agent_id: impl Into<String>) -> bool {
        self.acknowledged_by.insert(agent_id.into())
    }
}
