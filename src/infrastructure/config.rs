//! Configuration model and hierarchical loader.
//!
//! Precedence (lowest to highest): programmatic defaults, the project
//! config at `.hivemind/config.yaml`, local overrides at
//! `.hivemind/local.yaml`, and `HIVEMIND_*` environment variables.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::services::agent_runner::AgentRunnerConfig;
use crate::services::orchestrator::OrchestratorConfig;
use crate::services::session_store::SessionLimits;
use crate::services::worktree_manager::WorktreeConfig;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrent_agents: {0}. Must be between 1 and 100")]
    InvalidMaxAgents(usize),

    #[error("Invalid max_concurrent_sessions: {0}. Must be at least 1")]
    InvalidMaxSessions(usize),

    #[error("Invalid max_tasks_per_session: {0}. Must be at least 1")]
    InvalidMaxTasks(usize),

    #[error("Invalid tick_interval_ms: {0}. Must be positive")]
    InvalidTickInterval(u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("encryption_secret must not be empty")]
    EmptyEncryptionSecret,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Model provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub base_url: String,
    pub default_model: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            default_model: "claude-sonnet-4-5".to_string(),
            request_timeout_secs: 120,
            max_retries: 3,
        }
    }
}

/// Worktree settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeSettings {
    pub branch_prefix: String,
    pub base_dir: String,
    pub auto_commit_on_merge: bool,
    pub max_worktree_age_hours: i64,
}

impl Default for WorktreeSettings {
    fn default() -> Self {
        Self {
            branch_prefix: "swarm".to_string(),
            base_dir: ".hivemind/worktrees".to_string(),
            auto_commit_on_merge: true,
            max_worktree_age_hours: 24,
        }
    }
}

/// Snapshot persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub max_sessions: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { enabled: false, max_sessions: 50 }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    pub workspace_root: String,
    pub max_concurrent_sessions: usize,
    pub max_tasks_per_session: usize,
    pub max_concurrent_agents: usize,
    pub tick_interval_ms: u64,
    pub task_timeout_secs: u64,
    pub agent_idle_timeout_secs: u64,
    pub session_timeout_secs: u64,
    pub review_required: bool,
    pub use_worktrees: bool,
    /// Process-wide secret the key vault derives its cipher key from.
    pub encryption_secret: String,
    pub logging: LoggingConfig,
    pub model: ModelConfig,
    pub worktree: WorktreeSettings,
    pub persistence: PersistenceConfig,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            workspace_root: ".".to_string(),
            max_concurrent_sessions: 10,
            max_tasks_per_session: 100,
            max_concurrent_agents: 5,
            tick_interval_ms: 1000,
            task_timeout_secs: 300,
            agent_idle_timeout_secs: 120,
            session_timeout_secs: 3600,
            review_required: false,
            use_worktrees: false,
            encryption_secret: "hivemind-dev-secret".to_string(),
            logging: LoggingConfig::default(),
            model: ModelConfig::default(),
            worktree: WorktreeSettings::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl SwarmConfig {
    /// Session-store limits derived from this config.
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            max_concurrent_sessions: self.max_concurrent_sessions,
            max_tasks_per_session: self.max_tasks_per_session,
            max_agents_per_session: self.max_concurrent_agents,
        }
    }

    /// Orchestrator settings derived from this config.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            task_timeout: Duration::from_secs(self.task_timeout_secs),
            agent_idle_timeout: Duration::from_secs(self.agent_idle_timeout_secs),
            session_timeout: Duration::from_secs(self.session_timeout_secs),
            review_required: self.review_required,
            use_worktrees: self.use_worktrees,
            max_tick_errors: 3,
            runner: AgentRunnerConfig::default(),
        }
    }

    /// Worktree-manager settings derived from this config.
    pub fn worktree_config(&self) -> WorktreeConfig {
        WorktreeConfig {
            branch_prefix: self.worktree.branch_prefix.clone(),
            base_dir: self.worktree.base_dir.clone(),
            auto_commit_on_merge: self.worktree.auto_commit_on_merge,
            max_worktree_age: chrono::Duration::hours(self.worktree.max_worktree_age_hours),
        }
    }
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Configuration is always project-local (`pwd/.hivemind/`) so multiple
    /// swarms per machine can point at different projects.
    pub fn load() -> Result<SwarmConfig> {
        let config: SwarmConfig = Figment::new()
            .merge(Serialized::defaults(SwarmConfig::default()))
            .merge(Yaml::file(".hivemind/config.yaml"))
            .merge(Yaml::file(".hivemind/local.yaml"))
            .merge(Env::prefixed("HIVEMIND_").split("__"))
            .extract()
            .context("Failed to extract configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<SwarmConfig> {
        let config: SwarmConfig = Figment::new()
            .merge(Serialized::defaults(SwarmConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &SwarmConfig) -> Result<(), ConfigError> {
        if config.max_concurrent_agents == 0 || config.max_concurrent_agents > 100 {
            return Err(ConfigError::InvalidMaxAgents(config.max_concurrent_agents));
        }
        if config.max_concurrent_sessions == 0 {
            return Err(ConfigError::InvalidMaxSessions(config.max_concurrent_sessions));
        }
        if config.max_tasks_per_session == 0 {
            return Err(ConfigError::InvalidMaxTasks(config.max_tasks_per_session));
        }
        if config.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidTickInterval(config.tick_interval_ms));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.encryption_secret.is_empty() {
            return Err(ConfigError::EmptyEncryptionSecret);
        }
        Ok(())
    }
}
