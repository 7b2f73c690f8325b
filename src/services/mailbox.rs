//! Mailbox: point-to-point and broadcast messaging for one session.
//!
//! Every message lands in the session-wide log. Messages addressed to a
//! concrete agent id are additionally tracked against that agent's unread
//! count; the reserved recipients `"lead"` and `"all"` are not.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::error::{SwarmError, SwarmResult};
use crate::domain::models::message::{
    AgentMessage, BroadcastImportance, BroadcastMessage, MessageType,
};
use crate::services::event_bus::SwarmEvent;

/// Conjunctive filter over the message log.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub from: Option<String>,
    pub to: Option<String>,
    pub message_type: Option<MessageType>,
    pub unread_only: bool,
    pub since: Option<DateTime<Utc>>,
    /// Most recent k messages after filtering.
    pub limit: Option<usize>,
}

/// Session-wide message log with per-agent unread tracking.
#[derive(Debug)]
pub struct Mailbox {
    session_id: Uuid,
    /// All messages in send order.
    log: Vec<AgentMessage>,
    index: HashMap<Uuid, usize>,
    unread: HashMap<String, usize>,
    broadcasts: Vec<BroadcastMessage>,
    events: Vec<SwarmEvent>,
}

impl Mailbox {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            log: Vec::new(),
            index: HashMap::new(),
            unread: HashMap::new(),
            broadcasts: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Append a message to the log, updating unread tracking for concrete
    /// recipients.
    pub fn send(&mut self, message: AgentMessage) -> Uuid {
        let id = message.id;
        if message.has_concrete_recipient() {
            *self.unread.entry(message.to.clone()).or_default() += 1;
        }
        self.events.push(SwarmEvent::MessageSent {
            session_id: self.session_id,
            message_id: id,
            from: message.from.clone(),
            to: message.to.clone(),
        });
        self.index.insert(id, self.log.len());
        self.log.push(message);
        id
    }

    /// Fetch messages matching all given filters; `limit` keeps the most
    /// recent k.
    pub fn get(&self, filter: &MessageFilter) -> Vec<&AgentMessage> {
        let matched: Vec<&AgentMessage> = self
            .log
            .iter()
            .filter(|m| filter.from.as_deref().is_none_or(|f| m.from == f))
            .filter(|m| filter.to.as_deref().is_none_or(|t| m.to == t))
            .filter(|m| filter.message_type.is_none_or(|t| m.message_type == t))
            .filter(|m| !filter.unread_only || !m.read)
            .filter(|m| filter.since.is_none_or(|s| m.timestamp >= s))
            .collect();
        match filter.limit {
            Some(k) if matched.len() > k => matched[matched.len() - k..].to_vec(),
            _ => matched,
        }
    }

    /// Mark one message read.
    pub fn mark_as_read(&mut self, message_id: Uuid) -> SwarmResult<()> {
        let idx = *self
            .index
            .get(&message_id)
            .ok_or(SwarmError::MessageNotFound(message_id))?;
        let message = &mut self.log[idx];
        if !message.read {
            message.mark_read();
            if message.has_concrete_recipient() {
                if let Some(count) = self.unread.get_mut(&message.to) {
                    *count = count.saturating_sub(1);
                }
            }
        }
        Ok(())
    }

    /// Mark everything addressed to an agent as read.
    pub fn mark_all_as_read(&mut self, agent_id: &str) {
        for message in self.log.iter_mut().filter(|m| m.to == agent_id && !m.read) {
            message.mark_read();
        }
        self.unread.insert(agent_id.to_string(), 0);
    }

    /// Unread count for a concrete recipient.
    pub fn unread_count(&self, agent_id: &str) -> usize {
        self.unread.get(agent_id).copied().unwrap_or(0)
    }

    /// All messages in a thread, in send order.
    pub fn thread(&self, thread_id: Uuid) -> Vec<&AgentMessage> {
        self.log.iter().filter(|m| m.thread_id == thread_id).collect()
    }

    /// Send a broadcast to every agent.
    pub fn broadcast(
        &mut self,
        from: impl Into<String>,
        content: impl Into<String>,
        importance: BroadcastImportance,
    ) -> Uuid {
        let broadcast = BroadcastMessage::new(from, content, importance);
        let id = broadcast.id;
        self.events.push(SwarmEvent::BroadcastSent {
            session_id: self.session_id,
            broadcast_id: id,
            importance,
        });
        self.broadcasts.push(broadcast);
        id
    }

    /// Record a broadcast acknowledgement.
    pub fn acknowledge(&mut self, broadcast_id: Uuid, agent_id: &str) -> SwarmResult<()> {
        let broadcast = self
            .broadcasts
            .iter_mut()
            .find(|b| b.id == broadcast_id)
            .ok_or(SwarmError::MessageNotFound(broadcast_id))?;
        broadcast.acknowledge(agent_id);
        Ok(())
    }

    pub fn broadcasts(&self) -> &[BroadcastMessage] {
        &self.broadcasts
    }

    /// Number of messages in the log.
    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// All messages, for persistence snapshots.
    pub fn all_messages(&self) -> &[AgentMessage] {
        &self.log
    }

    /// Take the events accumulated since the last drain.
    pub fn drain_events(&mut self) -> Vec<SwarmEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::message::{RECIPIENT_ALL, RECIPIENT_LEAD};

    fn mailbox() -> Mailbox {
        Mailbox::new(Uuid::new_v4())
    }

    fn msg(from: &str, to: &str) -> AgentMessage {
        AgentMessage::new(from, to, MessageType::Info, "subject", "content")
    }

    #[test]
    fn test_send_tracks_unread_for_concrete_recipient() {
        let mut mb = mailbox();
        let agent = Uuid::new_v4().to_string();
        mb.send(msg("lead", &agent));
        mb.send(msg("lead", &agent));
        assert_eq!(mb.unread_count(&agent), 2);
    }

    #[test]
    fn test_reserved_recipients_not_counted() {
        let mut mb = mailbox();
        mb.send(msg("agent-1", RECIPIENT_LEAD));
        mb.send(msg("lead", RECIPIENT_ALL));
        assert_eq!(mb.unread_count(RECIPIENT_LEAD), 0);
        assert_eq!(mb.unread_count(RECIPIENT_ALL), 0);
        assert_eq!(mb.len(), 2);
    }

    #[test]
    fn test_mark_as_read_decrements_once() {
        let mut mb = mailbox();
        let agent = Uuid::new_v4().to_string();
        let id = mb.send(msg("lead", &agent));
        assert_eq!(mb.unread_count(&agent), 1);

        mb.mark_as_read(id).unwrap();
        assert_eq!(mb.unread_count(&agent), 0);
        // Second mark is a no-op.
        mb.mark_as_read(id).unwrap();
        assert_eq!(mb.unread_count(&agent), 0);
    }

    #[test]
    fn test_mark_all_as_read() {
        let mut mb = mailbox();
        let agent = Uuid::new_v4().to_string();
        mb.send(msg("lead", &agent));
        mb.send(msg("lead", &agent));
        mb.mark_all_as_read(&agent);
        assert_eq!(mb.unread_count(&agent), 0);
        assert!(mb.get(&MessageFilter { to: Some(agent), unread_only: true, ..Default::default() }).is_empty());
    }

    #[test]
    fn test_filters_are_conjunctive() {
        let mut mb = mailbox();
        let a = Uuid::new_v4().to_string();
        let b = Uuid::new_v4().to_string();
        mb.send(msg("lead", &a));
        mb.send(msg("lead", &b));
        mb.send(msg(&a, &b));

        let from_lead_to_b = mb.get(&MessageFilter {
            from: Some("lead".to_string()),
            to: Some(b.clone()),
            ..Default::default()
        });
        assert_eq!(from_lead_to_b.len(), 1);
        assert_eq!(from_lead_to_b[0].from, "lead");
        assert_eq!(from_lead_to_b[0].to, b);
    }

    #[test]
    fn test_limit_keeps_most_recent() {
        let mut mb = mailbox();
        let agent = Uuid::new_v4().to_string();
        let _first = mb.send(msg("lead", &agent));
        let second = mb.send(msg("lead", &agent));
        let third = mb.send(msg("lead", &agent));

        let latest = mb.get(&MessageFilter { limit: Some(2), ..Default::default() });
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].id, second);
        assert_eq!(latest[1].id, third);
    }

    #[test]
    fn test_thread_grouping() {
        let mut mb = mailbox();
        let agent = Uuid::new_v4().to_string();
        let question = msg("lead", &agent);
        let thread_id = question.thread_id;
        let reply = AgentMessage::new(&agent, "lead", MessageType::Answer, "re", "answer")
            .with_reply_to(&question);
        mb.send(question);
        mb.send(reply);
        mb.send(msg("lead", &agent)); // unrelated

        let thread = mb.thread(thread_id);
        assert_eq!(thread.len(), 2);
    }

    #[test]
    fn test_broadcast_acknowledgement() {
        let mut mb = mailbox();
        let id = mb.broadcast("lead", "all hands", BroadcastImportance::Critical);
        mb.acknowledge(id, "agent-1").unwrap();
        mb.acknowledge(id, "agent-2").unwrap();
        assert_eq!(mb.broadcasts()[0].acknowledged_by.len(), 2);

        let missing = mb.acknowledge(Uuid::new_v4(), "agent-1");
        assert!(matches!(missing, Err(SwarmError::MessageNotFound(_))));
    }

    #[test]
    fn test_unknown_message_mark_read_fails() {
        let mut mb = mailbox();
        assert!(matches!(
            mb.mark_as_read(Uuid::new_v4()),
            Err(SwarmError::MessageNotFound(_))
        ));
    }
}
