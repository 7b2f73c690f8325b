//! Token usage and cost accounting models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::agent::AgentRole;

/// Token counts for a single model call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input (prompt) tokens
    pub input_tokens: u64,
    /// Output (completion) tokens
    pub output_tokens: u64,
    /// Model that served the call
    pub model: String,
    /// When the call finished
    pub timestamp: DateTime<Utc>,
}

impl TokenUsage {
    pub fn new(model: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            model: model.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One recorded model call with its computed cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Unique identifier
    pub id: Uuid,
    /// Owning session
    pub session_id: Uuid,
    /// Agent that issued the call, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
    /// Role of that agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<AgentRole>,
    /// Task being executed, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    /// What kind of request this was (planning, execution, review, ...)
    pub request_type: String,
    /// Raw token counts
    pub usage: TokenUsage,
    /// Computed cost in USD
    pub cost_usd: f64,
}

/// Aggregated cost view for a session. Always derived from the records,
/// never authored directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    /// Total cost in USD
    pub total_cost_usd: f64,
    /// Total input tokens
    pub total_input_tokens: u64,
    /// Total output tokens
    pub total_output_tokens: u64,
    /// Number of recorded calls
    pub request_count: u64,
    /// Cost breakdown by model id
    #[serde(default)]
    pub by_model: HashMap<String, f64>,
    /// Cost breakdown by agent id
    #[serde(default)]
    pub by_agent: HashMap<Uuid, f64>,
    /// Cost breakdown by request type
    #[serde(default)]
    pub by_request_type: HashMap<String, f64>,
}

impl CostSummary {
    /// Fold one record into the summary.
    pub fn add_record(&mut self, record: &UsageRecord) {
        self.total_cost_usd += record.cost_usd;
        self.total_input_tokens += record.usage.input_tokens;
        self.total_output_tokens += record.usage.output_tokens;
        self.request_count += 1;
        *self.by_model.entry(record.usage.model.clone()).or_default() += record.cost_usd;
        if let Some(agent_id) = record.agent_id {
            *self.by_agent.entry(agent_id).or_default() += record.cost_usd;
        }
        *self
            .by_request_type
            .entry(record.request_type.clone())
            .or_default() += record.cost_usd;
    }
}
