//! Model-aware cost ledger.
//!
//! Holds the per-model pricing table and aggregates usage records into
//! per-session cost summaries. The summary is always derived from the
//! records, so the two can be cross-checked at any time.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::agent::AgentRole;
use crate::domain::models::usage::{CostSummary, TokenUsage, UsageRecord};
use crate::services::event_bus::{EventBus, SwarmEvent};

/// Pricing per million tokens for a specific model.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    /// Cost per million input tokens (USD).
    pub input: f64,
    /// Cost per million output tokens (USD).
    pub output: f64,
}

/// Known model pricing table (costs in USD per million tokens).
const PRICING_TABLE: &[(&str, ModelPricing)] = &[
    ("claude-opus-4-6", ModelPricing { input: 15.0, output: 75.0 }),
    ("opus", ModelPricing { input: 15.0, output: 75.0 }),
    ("claude-sonnet-4-5", ModelPricing { input: 3.0, output: 15.0 }),
    ("sonnet", ModelPricing { input: 3.0, output: 15.0 }),
    ("claude-haiku-4-5", ModelPricing { input: 0.80, output: 4.0 }),
    ("haiku", ModelPricing { input: 0.80, output: 4.0 }),
];

/// Fallback applied to unknown models.
const DEFAULT_PRICING: ModelPricing = ModelPricing { input: 3.0, output: 15.0 };

/// Get pricing for a model by name or alias.
///
/// Matches against known model name substrings (e.g. "opus" matches
/// "claude-opus-4-6-20250616"). Unknown models get the default pricing.
pub fn model_pricing(model: &str) -> ModelPricing {
    let model_lower = model.to_lowercase();
    PRICING_TABLE
        .iter()
        .find(|(name, _)| model_lower.contains(name))
        .map(|(_, pricing)| *pricing)
        .unwrap_or(DEFAULT_PRICING)
}

/// Cost in USD for a set of token counts.
pub fn calculate_cost(usage: &TokenUsage) -> f64 {
    let pricing = model_pricing(&usage.model);
    (usage.input_tokens as f64 * pricing.input + usage.output_tokens as f64 * pricing.output)
        / 1_000_000.0
}

/// Per-session usage records and derived cost summaries.
pub struct CostLedger {
    records: RwLock<HashMap<Uuid, Vec<UsageRecord>>>,
    summaries: RwLock<HashMap<Uuid, CostSummary>>,
    bus: Arc<EventBus>,
}

impl CostLedger {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            summaries: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Record one model call, updating the session summary and publishing
    /// a cost update.
    pub async fn record_usage(
        &self,
        session_id: Uuid,
        usage: TokenUsage,
        request_type: impl Into<String>,
        agent_id: Option<Uuid>,
        role: Option<AgentRole>,
        task_id: Option<Uuid>,
    ) -> UsageRecord {
        let cost_usd = calculate_cost(&usage);
        let record = UsageRecord {
            id: Uuid::new_v4(),
            session_id,
            agent_id,
            role,
            task_id,
            request_type: request_type.into(),
            usage,
            cost_usd,
        };

        let total_cost_usd = {
            let mut summaries = self.summaries.write().await;
            let summary = summaries.entry(session_id).or_default();
            summary.add_record(&record);
            summary.total_cost_usd
        };
        self.records
            .write()
            .await
            .entry(session_id)
            .or_default()
            .push(record.clone());

        self.bus
            .publish(SwarmEvent::CostUpdate {
                session_id,
                cost_usd,
                total_cost_usd,
            })
            .await;
        record
    }

    /// Derived summary for a session.
    pub async fn summary(&self, session_id: Uuid) -> CostSummary {
        self.summaries
            .read()
            .await
            .get(&session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Raw records for a session, in record order.
    pub async fn records(&self, session_id: Uuid) -> Vec<UsageRecord> {
        self.records
            .read()
            .await
            .get(&session_id)
            .cloned()
            .unwrap_or_default()
    }
}
