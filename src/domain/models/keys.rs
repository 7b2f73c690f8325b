//! User, API key, and free-tier accounting models.
//!
//! Plaintext key material only ever exists inside the vault's decrypt
//! path; the stored blob is AEAD ciphertext and is never serialised out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task-type marker for keys usable by any kind of work.
pub const TASK_TYPE_GENERIC: &str = "generic";

/// Free-tier accounting attached to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeTier {
    /// Whether the free tier applies at all
    pub enabled: bool,
    /// Shared tokens granted per calendar month
    pub free_tokens_per_month: u64,
    /// Tokens consumed this month
    pub free_tokens_used: u64,
    /// Month the counter applies to, `YYYY-MM`
    pub free_month: String,
    /// Models the free tier may route to
    #[serde(default)]
    pub free_models: Vec<String>,
    /// Task types eligible for the free tier
    #[serde(default)]
    pub free_task_types: Vec<String>,
}

impl Default for FreeTier {
    fn default() -> Self {
        Self {
            enabled: false,
            free_tokens_per_month: 0,
            free_tokens_used: 0,
            free_month: String::new(),
            free_models: Vec::new(),
            free_task_types: vec![TASK_TYPE_GENERIC.to_string()],
        }
    }
}

impl FreeTier {
    /// Reset the counter if the month rolled over. Must run before any
    /// quota check against this tier.
    pub fn ensure_month(&mut self, current_month: &str) {
        if self.free_month != current_month {
            self.free_month = current_month.to_string();
            self.free_tokens_used = 0;
        }
    }

    /// Tokens still available this month.
    pub fn remaining(&self) -> u64 {
        self.free_tokens_per_month.saturating_sub(self.free_tokens_used)
    }
}

/// A user of the swarm with quota settings and key permissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    /// User identifier (externally assigned)
    pub id: String,
    /// Display name
    pub display_name: String,
    /// Whether the user may register API keys
    pub can_add_keys: bool,
    /// Maximum number of keys the user may hold
    pub max_keys: usize,
    /// Monthly token quota across all keys; 0 = unlimited
    pub total_monthly_quota: u64,
    /// Tokens consumed this month across all keys
    pub tokens_used_this_month: u64,
    /// Month the counter applies to, `YYYY-MM`
    pub quota_month: String,
    /// Administrative user
    pub is_admin: bool,
    /// Free-tier accounting
    pub free_tier: FreeTier,
    /// When created
    pub created_at: DateTime<Utc>,
}

impl UserConfig {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            can_add_keys: true,
            max_keys: 10,
            total_monthly_quota: 0,
            tokens_used_this_month: 0,
            quota_month: String::new(),
            is_admin: false,
            free_tier: FreeTier::default(),
            created_at: Utc::now(),
        }
    }

    /// Reset the month counter on rollover.
    pub fn ensure_month(&mut self, current_month: &str) {
        if self.quota_month != current_month {
            self.quota_month = current_month.to_string();
            self.tokens_used_this_month = 0;
        }
    }
}

/// A stored API key. The key material is AEAD ciphertext; it is never
/// serialised out of the vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    /// Unique identifier
    pub id: Uuid,
    /// Owning user
    pub user_id: String,
    /// Provider this key authenticates against
    pub provider: String,
    /// Base64(nonce || ciphertext); omitted from any serialised view
    #[serde(skip_serializing, default)]
    pub encrypted_key: String,
    /// Task types this key should serve; `generic` matches anything
    #[serde(default)]
    pub task_types: Vec<String>,
    /// Programming languages this key is preferred for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
    /// Models this key may be used with; None = any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_models: Option<Vec<String>>,
    /// Selection priority, ascending (lower = preferred)
    pub priority: u32,
    /// Monthly token quota; 0 = unlimited
    pub monthly_quota: u64,
    /// Tokens consumed this month
    pub tokens_used_this_month: u64,
    /// Month the counter applies to, `YYYY-MM`
    pub quota_month: String,
    /// Requests allowed per minute; 0 = unlimited
    pub rate_limit: u32,
    /// Requests observed in the current minute window
    pub requests_this_minute: u32,
    /// Integer minute (`floor(unix / 60)`) the window applies to
    pub rate_limit_minute: i64,
    /// Whether the key participates in selection
    pub active: bool,
    /// When created
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn new(user_id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            provider: provider.into(),
            encrypted_key: String::new(),
            task_types: vec![TASK_TYPE_GENERIC.to_string()],
            languages: None,
            allowed_models: None,
            priority: 100,
            monthly_quota: 0,
            tokens_used_this_month: 0,
            quota_month: String::new(),
            rate_limit: 0,
            requests_this_minute: 0,
            rate_limit_minute: 0,
            active: true,
            created_at: Utc::now(),
        }
    }

    /// Reset the month counter on rollover. Must run before any quota
    /// check against this key.
    pub fn ensure_month(&mut self, current_month: &str) {
        if self.quota_month != current_month {
            self.quota_month = current_month.to_string();
            self.tokens_used_this_month = 0;
        }
    }

    /// Remaining monthly quota. `u64::MAX` when unlimited.
    pub fn remaining_quota(&self) -> u64 {
        if self.monthly_quota == 0 {
            u64::MAX
        } else {
            self.monthly_quota.saturating_sub(self.tokens_used_this_month)
        }
    }

    /// Whether this key serves the given task type.
    pub fn serves_task_type(&self, task_type: &str) -> bool {
        self.task_types.iter().any(|t| t == task_type)
    }

    /// Whether this key may use the given model.
    pub fn allows_model(&self, model: &str) -> bool {
        match &self.allowed_models {
            Some(models) => models.iter().any(|m| m == model),
            None => true,
        }
    }
}

/// Strategy applied after filtering when more than one key qualifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySelectionStrategy {
    /// First key in ascending priority order
    Priority,
    /// Rotate through qualifying keys per user
    RoundRobin,
    /// Key with the fewest tokens used this month
    LeastUsed,
    /// Arbitrary qualifying key
    Random,
}

impl Default for KeySelectionStrategy {
    fn default() -> Self {
        Self::Priority
    }
}
