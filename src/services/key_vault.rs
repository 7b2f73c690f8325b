//! Key vault and quota book.
//!
//! Stores per-user API keys encrypted with AES-256-GCM (random nonce per
//! encryption, nonce-prefixed ciphertext, base64 on the wire). Plaintext
//! key material exists only for the span of a [`KeyVault::decrypt`] call.
//! The vault also owns free-tier accounting, monthly quotas, and the
//! per-minute rate limiter; all month and minute derivation goes through
//! the injected [`Clock`] so rollover is testable.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use chrono::{DateTime, Datelike, Months, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::error::{SwarmError, SwarmResult};
use crate::domain::models::keys::{
    ApiKey, KeySelectionStrategy, UserConfig, TASK_TYPE_GENERIC,
};
use crate::domain::ports::clock::Clock;
use crate::services::event_bus::{EventBus, SwarmEvent};

const NONCE_LEN: usize = 12;
const USAGE_HISTORY_DAYS: i64 = 30;

/// Options for key creation.
#[derive(Debug, Clone, Default)]
pub struct KeyOptions {
    pub task_types: Option<Vec<String>>,
    pub languages: Option<Vec<String>>,
    pub allowed_models: Option<Vec<String>>,
    pub priority: Option<u32>,
    pub monthly_quota: Option<u64>,
    pub rate_limit: Option<u32>,
}

/// Options for key selection.
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub strategy: Option<KeySelectionStrategy>,
    pub task_type: Option<String>,
    pub language: Option<String>,
}

/// Result of a free-tier check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeTierCheck {
    pub allowed: bool,
    pub remaining: u64,
    pub reason: Option<String>,
}

/// Result of a quota check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

/// Result of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitCheck {
    pub allowed: bool,
    pub retry_after_secs: u64,
}

/// One entry in the rolling usage history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyUsageEntry {
    pub key_id: Uuid,
    pub user_id: String,
    pub tokens: u64,
    pub timestamp: DateTime<Utc>,
}

/// First instant of the month after `now`.
fn next_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let first = now
        .date_naive()
        .with_day(1)
        .expect("day 1 always valid")
        + Months::new(1);
    DateTime::from_naive_utc_and_offset(
        first.and_hms_opt(0, 0, 0).expect("midnight always valid"),
        Utc,
    )
}

/// Encrypted per-user key store with quota accounting.
pub struct KeyVault {
    users: RwLock<HashMap<String, UserConfig>>,
    keys: RwLock<HashMap<Uuid, ApiKey>>,
    round_robin: RwLock<HashMap<String, usize>>,
    usage_history: RwLock<Vec<KeyUsageEntry>>,
    cipher_key: [u8; 32],
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,
}

impl KeyVault {
    /// Build a vault whose cipher key is derived from the configured
    /// process-wide secret.
    pub fn new(secret: &str, clock: Arc<dyn Clock>, bus: Arc<EventBus>) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut cipher_key = [0u8; 32];
        cipher_key.copy_from_slice(&digest);
        Self {
            users: RwLock::new(HashMap::new()),
            keys: RwLock::new(HashMap::new()),
            round_robin: RwLock::new(HashMap::new()),
            usage_history: RwLock::new(Vec::new()),
            cipher_key,
            clock,
            bus,
        }
    }

    // ── users ────────────────────────────────────────────────────────────

    /// Insert or replace a user.
    pub async fn upsert_user(&self, user: UserConfig) {
        self.users.write().await.insert(user.id.clone(), user);
    }

    pub async fn get_user(&self, user_id: &str) -> SwarmResult<UserConfig> {
        self.users
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| SwarmError::ValidationError(format!("unknown user: {user_id}")))
    }

    /// Remove a user and every key they own.
    pub async fn delete_user(&self, user_id: &str) -> bool {
        let removed = self.users.write().await.remove(user_id).is_some();
        if removed {
            self.keys.write().await.retain(|_, k| k.user_id != user_id);
        }
        removed
    }

    pub async fn list_users(&self) -> Vec<UserConfig> {
        self.users.read().await.values().cloned().collect()
    }

    // ── keys ─────────────────────────────────────────────────────────────

    /// Register a key for a user, storing only ciphertext.
    pub async fn add_key(
        &self,
        user_id: &str,
        provider: &str,
        plaintext: &str,
        options: KeyOptions,
    ) -> SwarmResult<ApiKey> {
        let user = self.get_user(user_id).await?;
        if !user.can_add_keys {
            return Err(SwarmError::ValidationError(format!(
                "user {user_id} may not add keys"
            )));
        }
        let owned = self
            .keys
            .read()
            .await
            .values()
            .filter(|k| k.user_id == user_id)
            .count();
        if owned >= user.max_keys {
            return Err(SwarmError::ValidationError(format!(
                "user {user_id} already holds {owned} of {} keys",
                user.max_keys
            )));
        }

        let mut key = ApiKey::new(user_id, provider);
        key.encrypted_key = self.encrypt(plaintext)?;
        key.quota_month = self.clock.month_key();
        if let Some(task_types) = options.task_types {
            key.task_types = task_types;
        }
        key.languages = options.languages;
        key.allowed_models = options.allowed_models;
        if let Some(priority) = options.priority {
            key.priority = priority;
        }
        if let Some(quota) = options.monthly_quota {
            key.monthly_quota = quota;
        }
        if let Some(rate_limit) = options.rate_limit {
            key.rate_limit = rate_limit;
        }

        self.keys.write().await.insert(key.id, key.clone());
        tracing::info!(key_id = %key.id, user_id, provider, "api key registered");
        Ok(key)
    }

    pub async fn get_key(&self, key_id: Uuid) -> SwarmResult<ApiKey> {
        self.keys
            .read()
            .await
            .get(&key_id)
            .cloned()
            .ok_or_else(|| SwarmError::ValidationError(format!("unknown key: {key_id}")))
    }

    /// Rotate the stored secret for a key.
    pub async fn update_key_material(&self, key_id: Uuid, plaintext: &str) -> SwarmResult<()> {
        let encrypted = self.encrypt(plaintext)?;
        let mut keys = self.keys.write().await;
        let key = keys
            .get_mut(&key_id)
            .ok_or_else(|| SwarmError::ValidationError(format!("unknown key: {key_id}")))?;
        key.encrypted_key = encrypted;
        Ok(())
    }

    /// Apply a partial settings update to a key.
    pub async fn update_key(&self, key_id: Uuid, options: KeyOptions) -> SwarmResult<ApiKey> {
        let mut keys = self.keys.write().await;
        let key = keys
            .get_mut(&key_id)
            .ok_or_else(|| SwarmError::ValidationError(format!("unknown key: {key_id}")))?;
        if let Some(task_types) = options.task_types {
            key.task_types = task_types;
        }
        if let Some(languages) = options.languages {
            key.languages = Some(languages);
        }
        if let Some(models) = options.allowed_models {
            key.allowed_models = Some(models);
        }
        if let Some(priority) = options.priority {
            key.priority = priority;
        }
        if let Some(quota) = options.monthly_quota {
            key.monthly_quota = quota;
        }
        if let Some(rate_limit) = options.rate_limit {
            key.rate_limit = rate_limit;
        }
        Ok(key.clone())
    }

    pub async fn set_key_active(&self, key_id: Uuid, active: bool) -> SwarmResult<()> {
        let mut keys = self.keys.write().await;
        let key = keys
            .get_mut(&key_id)
            .ok_or_else(|| SwarmError::ValidationError(format!("unknown key: {key_id}")))?;
        key.active = active;
        Ok(())
    }

    pub async fn delete_key(&self, key_id: Uuid) -> bool {
        self.keys.write().await.remove(&key_id).is_some()
    }

    /// Decrypt a key's material. The only operation that returns
    /// plaintext.
    pub async fn decrypt(&self, key_id: Uuid) -> SwarmResult<String> {
        let encrypted = self.get_key(key_id).await?.encrypted_key;
        self.decrypt_blob(&encrypted)
    }

    fn encrypt(&self, plaintext: &str) -> SwarmResult<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.cipher_key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| SwarmError::InternalError("key encryption failed".to_string()))?;
        let mut blob = nonce.to_vec();
        blob.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(blob))
    }

    fn decrypt_blob(&self, blob: &str) -> SwarmResult<String> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(blob)
            .map_err(|_| SwarmError::ValidationError("malformed key blob".to_string()))?;
        if bytes.len() <= NONCE_LEN {
            return Err(SwarmError::ValidationError("truncated key blob".to_string()));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.cipher_key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SwarmError::ValidationError("key decryption failed".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|_| SwarmError::ValidationError("key is not valid UTF-8".to_string()))
    }

    // ── selection ────────────────────────────────────────────────────────

    /// Pick a usable key for a user.
    pub async fn select_key(
        &self,
        user_id: &str,
        options: SelectOptions,
    ) -> SwarmResult<Option<ApiKey>> {
        let month = self.clock.month_key();
        let minute = self.clock.minute_index();

        let mut candidates: Vec<ApiKey> = {
            let mut keys = self.keys.write().await;
            // Lazy month rollover before any quota filtering.
            for key in keys.values_mut().filter(|k| k.user_id == user_id) {
                key.ensure_month(&month);
            }
            keys.values()
                .filter(|k| k.user_id == user_id && k.active)
                .cloned()
                .collect()
        };
        candidates.sort_by_key(|k| k.priority);

        if let Some(provider) = &options.provider {
            candidates.retain(|k| &k.provider == provider);
        }
        if let Some(model) = &options.model {
            candidates.retain(|k| k.allows_model(model));
        }
        if let Some(task_type) = &options.task_type {
            let matching: Vec<ApiKey> = candidates
                .iter()
                .filter(|k| k.serves_task_type(task_type))
                .cloned()
                .collect();
            candidates = if matching.is_empty() {
                candidates
                    .into_iter()
                    .filter(|k| k.serves_task_type(TASK_TYPE_GENERIC))
                    .collect()
            } else {
                matching
            };
        }
        if let Some(language) = &options.language {
            let matching: Vec<ApiKey> = candidates
                .iter()
                .filter(|k| {
                    k.languages
                        .as_ref()
                        .is_some_and(|langs| langs.iter().any(|l| l == language))
                })
                .cloned()
                .collect();
            if !matching.is_empty() {
                candidates = matching;
            }
        }
        // Quota and rate-limit filters; checks here must not consume a
        // rate-limit slot.
        candidates.retain(|k| k.remaining_quota() > 0);
        candidates.retain(|k| {
            k.rate_limit == 0
                || k.rate_limit_minute != minute
                || k.requests_this_minute < k.rate_limit
        });

        if candidates.is_empty() {
            return Ok(None);
        }

        let strategy = options.strategy.unwrap_or_default();
        let selected = match strategy {
            KeySelectionStrategy::Priority => candidates[0].clone(),
            KeySelectionStrategy::RoundRobin => {
                let mut cursors = self.round_robin.write().await;
                let cursor = cursors.entry(user_id.to_string()).or_insert(0);
                let picked = candidates[*cursor % candidates.len()].clone();
                *cursor = cursor.wrapping_add(1);
                picked
            }
            KeySelectionStrategy::LeastUsed => candidates
                .iter()
                .min_by_key(|k| k.tokens_used_this_month)
                .cloned()
                .expect("candidates nonempty"),
            KeySelectionStrategy::Random => {
                let roll = Uuid::new_v4().as_u128() as usize;
                candidates[roll % candidates.len()].clone()
            }
        };
        Ok(Some(selected))
    }

    /// Task-aware selection: free tier first, then the user's own keys by
    /// priority. Returns `(key, using_free_tier)`.
    pub async fn select_key_for_task(
        &self,
        user_id: &str,
        task_type: &str,
        options: SelectOptions,
    ) -> SwarmResult<(Option<ApiKey>, bool)> {
        let free = self.check_free_tier(user_id, task_type, 0).await?;
        if free.allowed {
            return Ok((None, true));
        }
        let key = self
            .select_key(
                user_id,
                SelectOptions {
                    strategy: Some(KeySelectionStrategy::Priority),
                    task_type: Some(task_type.to_string()),
                    ..options
                },
            )
            .await?;
        Ok((key, false))
    }

    // ── free tier ────────────────────────────────────────────────────────

    /// Check whether the free tier can serve a request.
    pub async fn check_free_tier(
        &self,
        user_id: &str,
        task_type: &str,
        estimated_tokens: u64,
    ) -> SwarmResult<FreeTierCheck> {
        let month = self.clock.month_key();
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| SwarmError::ValidationError(format!("unknown user: {user_id}")))?;

        if !user.free_tier.enabled {
            return Ok(FreeTierCheck {
                allowed: false,
                remaining: 0,
                reason: Some("free tier disabled".to_string()),
            });
        }
        user.free_tier.ensure_month(&month);

        if !user.free_tier.free_task_types.iter().any(|t| t == task_type) {
            return Ok(FreeTierCheck {
                allowed: false,
                remaining: user.free_tier.remaining(),
                reason: Some(format!("task type {task_type} not covered by free tier")),
            });
        }

        let remaining = user.free_tier.remaining();
        if remaining == 0 || estimated_tokens > remaining {
            return Ok(FreeTierCheck {
                allowed: false,
                remaining,
                reason: Some("free tier exhausted for this month".to_string()),
            });
        }
        Ok(FreeTierCheck { allowed: true, remaining, reason: None })
    }

    /// Charge tokens against the free tier.
    pub async fn record_free_tier_usage(&self, user_id: &str, tokens: u64) -> SwarmResult<()> {
        let month = self.clock.month_key();
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| SwarmError::ValidationError(format!("unknown user: {user_id}")))?;
        user.free_tier.ensure_month(&month);
        user.free_tier.free_tokens_used += tokens;
        Ok(())
    }

    // ── quota ────────────────────────────────────────────────────────────

    /// Monthly quota check for a key. A zero quota means unlimited.
    pub async fn check_quota(&self, key_id: Uuid) -> SwarmResult<QuotaCheck> {
        let month = self.clock.month_key();
        let reset_at = next_month_start(self.clock.now());
        let mut keys = self.keys.write().await;
        let key = keys
            .get_mut(&key_id)
            .ok_or_else(|| SwarmError::ValidationError(format!("unknown key: {key_id}")))?;
        key.ensure_month(&month);
        let remaining = key.remaining_quota();
        Ok(QuotaCheck { allowed: remaining > 0, remaining, reset_at })
    }

    /// Monthly quota check across all of a user's usage.
    pub async fn check_user_quota(&self, user_id: &str) -> SwarmResult<QuotaCheck> {
        let month = self.clock.month_key();
        let reset_at = next_month_start(self.clock.now());
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| SwarmError::ValidationError(format!("unknown user: {user_id}")))?;
        user.ensure_month(&month);
        if user.total_monthly_quota == 0 {
            return Ok(QuotaCheck { allowed: true, remaining: u64::MAX, reset_at });
        }
        let remaining = user
            .total_monthly_quota
            .saturating_sub(user.tokens_used_this_month);
        Ok(QuotaCheck { allowed: remaining > 0, remaining, reset_at })
    }

    // ── rate limit ───────────────────────────────────────────────────────

    /// Per-minute rate limit check. Consumes one slot when allowed.
    pub async fn check_rate_limit(&self, key_id: Uuid) -> SwarmResult<RateLimitCheck> {
        let minute = self.clock.minute_index();
        let retry_after_secs = self.clock.seconds_to_next_minute();
        let rejected = {
            let mut keys = self.keys.write().await;
            let key = keys
                .get_mut(&key_id)
                .ok_or_else(|| SwarmError::ValidationError(format!("unknown key: {key_id}")))?;
            if key.rate_limit_minute != minute {
                key.rate_limit_minute = minute;
                key.requests_this_minute = 0;
            }
            if key.rate_limit > 0 && key.requests_this_minute >= key.rate_limit {
                true
            } else {
                key.requests_this_minute += 1;
                false
            }
        };

        if rejected {
            self.bus
                .publish(SwarmEvent::RateLimitHit { key_id, retry_after_secs })
                .await;
            return Ok(RateLimitCheck { allowed: false, retry_after_secs });
        }
        Ok(RateLimitCheck { allowed: true, retry_after_secs: 0 })
    }

    // ── usage recording ──────────────────────────────────────────────────

    /// Record tokens consumed through a key, rolling counters and history.
    pub async fn record_usage(&self, key_id: Uuid, tokens: u64) -> SwarmResult<()> {
        let month = self.clock.month_key();
        let now = self.clock.now();

        let (user_id, over_quota, used, quota) = {
            let mut keys = self.keys.write().await;
            let key = keys
                .get_mut(&key_id)
                .ok_or_else(|| SwarmError::ValidationError(format!("unknown key: {key_id}")))?;
            key.ensure_month(&month);
            key.tokens_used_this_month += tokens;
            (
                key.user_id.clone(),
                key.monthly_quota > 0 && key.tokens_used_this_month >= key.monthly_quota,
                key.tokens_used_this_month,
                key.monthly_quota,
            )
        };

        if let Some(user) = self.users.write().await.get_mut(&user_id) {
            user.ensure_month(&month);
            user.tokens_used_this_month += tokens;
        }

        {
            let mut history = self.usage_history.write().await;
            history.push(KeyUsageEntry {
                key_id,
                user_id: user_id.clone(),
                tokens,
                timestamp: now,
            });
            let cutoff = now - chrono::Duration::days(USAGE_HISTORY_DAYS);
            history.retain(|e| e.timestamp >= cutoff);
        }

        self.bus
            .publish(SwarmEvent::KeyUsage { user_id: user_id.clone(), key_id, tokens })
            .await;
        if over_quota {
            self.bus
                .publish(SwarmEvent::QuotaExceeded {
                    user_id,
                    key_id: Some(key_id),
                    used,
                    quota,
                })
                .await;
        }
        Ok(())
    }

    /// Rolling 30-day usage history.
    pub async fn usage_history(&self) -> Vec<KeyUsageEntry> {
        self.usage_history.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::keys::FreeTier;
    use crate::domain::ports::clock::{ManualClock, SystemClock};

    // 2026-08-01T00:00:30Z
    const BASE_UNIX: i64 = 1_785_456_030;

    fn vault_with_clock(clock: Arc<dyn Clock>) -> KeyVault {
        KeyVault::new("test-secret", clock, Arc::new(EventBus::default()))
    }

    fn vault() -> KeyVault {
        vault_with_clock(Arc::new(SystemClock))
    }

    async fn user(vault: &KeyVault, id: &str) -> UserConfig {
        let user = UserConfig::new(id, id);
        vault.upsert_user(user.clone()).await;
        user
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_round_trip() {
        let v = vault();
        user(&v, "alice").await;
        let key = v
            .add_key("alice", "anthropic", "sk-ant-secret", KeyOptions::default())
            .await
            .unwrap();
        assert_ne!(key.encrypted_key, "sk-ant-secret");
        let plaintext = v.decrypt(key.id).await.unwrap();
        assert_eq!(plaintext, "sk-ant-secret");
    }

    #[tokio::test]
    async fn test_nonce_randomised_per_encryption() {
        let v = vault();
        user(&v, "alice").await;
        let a = v
            .add_key("alice", "anthropic", "same", KeyOptions::default())
            .await
            .unwrap();
        let b = v
            .add_key("alice", "anthropic", "same", KeyOptions::default())
            .await
            .unwrap();
        assert_ne!(a.encrypted_key, b.encrypted_key);
    }

    #[tokio::test]
    async fn test_wrong_secret_fails_decrypt() {
        let bus = Arc::new(EventBus::default());
        let v1 = KeyVault::new("secret-one", Arc::new(SystemClock), Arc::clone(&bus));
        let v2 = KeyVault::new("secret-two", Arc::new(SystemClock), bus);
        user(&v1, "alice").await;
        let key = v1
            .add_key("alice", "anthropic", "material", KeyOptions::default())
            .await
            .unwrap();
        assert!(v2.decrypt_blob(&key.encrypted_key).is_err());
    }

    #[tokio::test]
    async fn test_max_keys_enforced() {
        let v = vault();
        let mut u = UserConfig::new("bob", "bob");
        u.max_keys = 1;
        v.upsert_user(u).await;
        v.add_key("bob", "anthropic", "k1", KeyOptions::default())
            .await
            .unwrap();
        assert!(v
            .add_key("bob", "anthropic", "k2", KeyOptions::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_update_key_applies_partial_settings() {
        let v = vault();
        user(&v, "alice").await;
        let key = v
            .add_key("alice", "anthropic", "k", KeyOptions::default())
            .await
            .unwrap();

        let updated = v
            .update_key(
                key.id,
                KeyOptions {
                    priority: Some(7),
                    rate_limit: Some(12),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.priority, 7);
        assert_eq!(updated.rate_limit, 12);
        // Untouched fields survive.
        assert_eq!(updated.task_types, vec![TASK_TYPE_GENERIC.to_string()]);
        // Key material is unchanged and still decrypts.
        assert_eq!(v.decrypt(key.id).await.unwrap(), "k");
    }

    #[tokio::test]
    async fn test_select_key_priority_order() {
        let v = vault();
        user(&v, "alice").await;
        let _low = v
            .add_key(
                "alice",
                "anthropic",
                "low",
                KeyOptions { priority: Some(200), ..Default::default() },
            )
            .await
            .unwrap();
        let high = v
            .add_key(
                "alice",
                "anthropic",
                "high",
                KeyOptions { priority: Some(1), ..Default::default() },
            )
            .await
            .unwrap();

        let selected = v
            .select_key("alice", SelectOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selected.id, high.id);
    }

    #[tokio::test]
    async fn test_select_key_skips_inactive_and_exhausted() {
        let v = vault();
        user(&v, "alice").await;
        let a = v
            .add_key(
                "alice",
                "anthropic",
                "a",
                KeyOptions { priority: Some(1), monthly_quota: Some(100), ..Default::default() },
            )
            .await
            .unwrap();
        let b = v
            .add_key(
                "alice",
                "anthropic",
                "b",
                KeyOptions { priority: Some(2), ..Default::default() },
            )
            .await
            .unwrap();

        v.record_usage(a.id, 100).await.unwrap();
        let selected = v
            .select_key("alice", SelectOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selected.id, b.id);

        v.set_key_active(b.id, false).await.unwrap();
        assert!(v
            .select_key("alice", SelectOptions::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_select_key_task_type_fallback_to_generic() {
        let v = vault();
        user(&v, "alice").await;
        let generic = v
            .add_key(
                "alice",
                "anthropic",
                "g",
                KeyOptions {
                    task_types: Some(vec![TASK_TYPE_GENERIC.to_string()]),
                    priority: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let coder = v
            .add_key(
                "alice",
                "anthropic",
                "c",
                KeyOptions {
                    task_types: Some(vec!["coder".to_string()]),
                    priority: Some(10),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Exact task-type match wins despite worse priority.
        let selected = v
            .select_key(
                "alice",
                SelectOptions { task_type: Some("coder".to_string()), ..Default::default() },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selected.id, coder.id);

        // No key serves "writer": falls back to the generic key.
        let selected = v
            .select_key(
                "alice",
                SelectOptions { task_type: Some("writer".to_string()), ..Default::default() },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selected.id, generic.id);
    }

    #[tokio::test]
    async fn test_round_robin_rotates() {
        let v = vault();
        user(&v, "alice").await;
        let a = v
            .add_key("alice", "anthropic", "a", KeyOptions { priority: Some(1), ..Default::default() })
            .await
            .unwrap();
        let b = v
            .add_key("alice", "anthropic", "b", KeyOptions { priority: Some(2), ..Default::default() })
            .await
            .unwrap();

        let opts = || SelectOptions {
            strategy: Some(KeySelectionStrategy::RoundRobin),
            ..Default::default()
        };
        let first = v.select_key("alice", opts()).await.unwrap().unwrap();
        let second = v.select_key("alice", opts()).await.unwrap().unwrap();
        let third = v.select_key("alice", opts()).await.unwrap().unwrap();
        assert_eq!(first.id, a.id);
        assert_eq!(second.id, b.id);
        assert_eq!(third.id, a.id);
    }

    #[tokio::test]
    async fn test_least_used_strategy() {
        let v = vault();
        user(&v, "alice").await;
        let a = v
            .add_key("alice", "anthropic", "a", KeyOptions { priority: Some(1), ..Default::default() })
            .await
            .unwrap();
        let b = v
            .add_key("alice", "anthropic", "b", KeyOptions { priority: Some(2), ..Default::default() })
            .await
            .unwrap();
        v.record_usage(a.id, 5000).await.unwrap();

        let selected = v
            .select_key(
                "alice",
                SelectOptions {
                    strategy: Some(KeySelectionStrategy::LeastUsed),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selected.id, b.id);
    }

    #[tokio::test]
    async fn test_free_tier_then_personal_key() {
        // Scenario: free tier serves generic until exhausted, then the
        // personal key takes over; non-covered task types skip the tier.
        let v = vault();
        let mut u = UserConfig::new("alice", "alice");
        u.free_tier = FreeTier {
            enabled: true,
            free_tokens_per_month: 1000,
            free_tokens_used: 0,
            free_month: String::new(),
            free_models: vec![],
            free_task_types: vec![TASK_TYPE_GENERIC.to_string()],
        };
        v.upsert_user(u).await;
        let key = v
            .add_key("alice", "anthropic", "personal", KeyOptions::default())
            .await
            .unwrap();

        let (selected, free) = v
            .select_key_for_task("alice", TASK_TYPE_GENERIC, SelectOptions::default())
            .await
            .unwrap();
        assert!(free);
        assert!(selected.is_none());

        v.record_free_tier_usage("alice", 1000).await.unwrap();

        let (selected, free) = v
            .select_key_for_task("alice", TASK_TYPE_GENERIC, SelectOptions::default())
            .await
            .unwrap();
        assert!(!free);
        assert_eq!(selected.unwrap().id, key.id);

        // "coder" is not in free_task_types: goes straight to the key.
        let (selected, free) = v
            .select_key_for_task("alice", "coder", SelectOptions::default())
            .await
            .unwrap();
        assert!(!free);
        assert_eq!(selected.unwrap().id, key.id);
    }

    #[tokio::test]
    async fn test_free_tier_estimated_tokens_respected() {
        let v = vault();
        let mut u = UserConfig::new("alice", "alice");
        u.free_tier = FreeTier {
            enabled: true,
            free_tokens_per_month: 1000,
            free_tokens_used: 800,
            free_month: String::new(),
            free_models: vec![],
            free_task_types: vec![TASK_TYPE_GENERIC.to_string()],
        };
        v.upsert_user(u).await;

        let fits = v.check_free_tier("alice", TASK_TYPE_GENERIC, 100).await.unwrap();
        assert!(fits.allowed);

        let too_big = v.check_free_tier("alice", TASK_TYPE_GENERIC, 500).await.unwrap();
        assert!(!too_big.allowed);
        assert_eq!(too_big.remaining, 200);
    }

    #[tokio::test]
    async fn test_free_tier_month_rollover() {
        let clock = Arc::new(ManualClock::at_unix(BASE_UNIX));
        let v = vault_with_clock(clock.clone());
        let mut u = UserConfig::new("alice", "alice");
        u.free_tier = FreeTier {
            enabled: true,
            free_tokens_per_month: 1000,
            free_tokens_used: 0,
            free_month: String::new(),
            free_models: vec![],
            free_task_types: vec![TASK_TYPE_GENERIC.to_string()],
        };
        v.upsert_user(u).await;
        v.record_free_tier_usage("alice", 1000).await.unwrap();
        assert!(!v.check_free_tier("alice", TASK_TYPE_GENERIC, 0).await.unwrap().allowed);

        // Next month: counter resets lazily on the first check.
        clock.advance_secs(32 * 24 * 3600);
        let check = v.check_free_tier("alice", TASK_TYPE_GENERIC, 0).await.unwrap();
        assert!(check.allowed);
        assert_eq!(check.remaining, 1000);
    }

    #[tokio::test]
    async fn test_quota_reset_at_next_month() {
        let clock = Arc::new(ManualClock::at_unix(BASE_UNIX));
        let v = vault_with_clock(clock.clone());
        user(&v, "alice").await;
        let key = v
            .add_key(
                "alice",
                "anthropic",
                "k",
                KeyOptions { monthly_quota: Some(100), ..Default::default() },
            )
            .await
            .unwrap();

        let check = v.check_quota(key.id).await.unwrap();
        assert!(check.allowed);
        assert_eq!(check.remaining, 100);
        assert_eq!(check.reset_at.day(), 1);
        assert!(check.reset_at > Utc::now() - chrono::Duration::days(365 * 10));
    }

    #[tokio::test]
    async fn test_rate_limit_window() {
        let clock = Arc::new(ManualClock::at_unix(BASE_UNIX));
        let v = vault_with_clock(clock.clone());
        user(&v, "alice").await;
        let key = v
            .add_key(
                "alice",
                "anthropic",
                "k",
                KeyOptions { rate_limit: Some(2), ..Default::default() },
            )
            .await
            .unwrap();

        assert!(v.check_rate_limit(key.id).await.unwrap().allowed);
        assert!(v.check_rate_limit(key.id).await.unwrap().allowed);

        // Third call in the same minute is rejected, and stays rejected
        // for the rest of the window.
        let rejected = v.check_rate_limit(key.id).await.unwrap();
        assert!(!rejected.allowed);
        assert_eq!(rejected.retry_after_secs, 30);
        assert!(!v.check_rate_limit(key.id).await.unwrap().allowed);

        // Window rolls over: allowed again.
        clock.advance_secs(30);
        assert!(v.check_rate_limit(key.id).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_zero_rate_limit_is_unlimited() {
        let v = vault();
        user(&v, "alice").await;
        let key = v
            .add_key("alice", "anthropic", "k", KeyOptions::default())
            .await
            .unwrap();
        for _ in 0..100 {
            assert!(v.check_rate_limit(key.id).await.unwrap().allowed);
        }
    }

    #[tokio::test]
    async fn test_usage_recording_emits_quota_exceeded() {
        let bus = Arc::new(EventBus::default());
        let v = KeyVault::new("s", Arc::new(SystemClock), Arc::clone(&bus));
        user(&v, "alice").await;
        let key = v
            .add_key(
                "alice",
                "anthropic",
                "k",
                KeyOptions { monthly_quota: Some(100), ..Default::default() },
            )
            .await
            .unwrap();
        let mut sub = bus.subscribe().await;

        v.record_usage(key.id, 60).await.unwrap();
        let first = sub.recv().await.unwrap();
        assert!(matches!(first.payload, SwarmEvent::KeyUsage { tokens: 60, .. }));

        v.record_usage(key.id, 60).await.unwrap();
        let second = sub.recv().await.unwrap();
        assert!(matches!(second.payload, SwarmEvent::KeyUsage { .. }));
        let third = sub.recv().await.unwrap();
        assert!(matches!(
            third.payload,
            SwarmEvent::QuotaExceeded { used: 120, quota: 100, .. }
        ));

        // User-level counter also advanced.
        let user = v.get_user("alice").await.unwrap();
        assert_eq!(user.tokens_used_this_month, 120);
    }

    #[tokio::test]
    async fn test_usage_history_prunes_old_entries() {
        let clock = Arc::new(ManualClock::at_unix(BASE_UNIX));
        let v = vault_with_clock(clock.clone());
        user(&v, "alice").await;
        let key = v
            .add_key("alice", "anthropic", "k", KeyOptions::default())
            .await
            .unwrap();

        v.record_usage(key.id, 10).await.unwrap();
        clock.advance_secs(31 * 24 * 3600);
        v.record_usage(key.id, 20).await.unwrap();

        let history = v.usage_history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].tokens, 20);
    }

    #[tokio::test]
    async fn test_delete_user_removes_keys() {
        let v = vault();
        user(&v, "alice").await;
        let key = v
            .add_key("alice", "anthropic", "k", KeyOptions::default())
            .await
            .unwrap();
        assert!(v.delete_user("alice").await);
        assert!(v.get_key(key.id).await.is_err());
    }
}
