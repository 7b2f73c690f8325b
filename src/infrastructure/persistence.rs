//! Session snapshot persistence.
//!
//! Snapshots are versioned JSON files under `{workspace}/.swarm-sessions/`.
//! File names are derived from the session id with every character outside
//! `[A-Za-z0-9_-]` replaced by `_`, which doubles as path-traversal
//! defence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::error::{SwarmError, SwarmResult};
use crate::domain::models::agent::AgentInstance;
use crate::domain::models::message::AgentMessage;
use crate::domain::models::session::Session;
use crate::domain::models::task::Task;
use crate::domain::models::usage::{CostSummary, UsageRecord};

const SNAPSHOT_VERSION: &str = "1.0.0";
const SNAPSHOT_DIR: &str = ".swarm-sessions";

/// Everything needed to restore a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: String,
    pub saved_at: DateTime<Utc>,
    pub session: Session,
    pub tasks: Vec<Task>,
    pub agents: Vec<AgentInstance>,
    pub messages: Vec<AgentMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_summary: Option<CostSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_records: Option<Vec<UsageRecord>>,
}

impl SessionSnapshot {
    pub fn new(
        session: Session,
        tasks: Vec<Task>,
        agents: Vec<AgentInstance>,
        messages: Vec<AgentMessage>,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            saved_at: Utc::now(),
            session,
            tasks,
            agents,
            messages,
            cost_summary: None,
            usage_records: None,
        }
    }

    pub fn with_costs(mut self, summary: CostSummary, records: Vec<UsageRecord>) -> Self {
        self.cost_summary = Some(summary);
        self.usage_records = Some(records);
        self
    }
}

/// Replace any character outside `[A-Za-z0-9_-]` with `_`.
fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Disk store for session snapshots.
pub struct SessionPersistence {
    dir: PathBuf,
    /// Number of snapshots kept by [`cleanup`](Self::cleanup).
    pub max_sessions: usize,
}

impl SessionPersistence {
    /// Ensure the snapshot directory exists under the workspace.
    pub async fn initialize(workspace: &Path, max_sessions: usize) -> SwarmResult<Self> {
        let dir = workspace.join(SNAPSHOT_DIR);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SwarmError::InternalError(format!("create {}: {e}", dir.display())))?;
        Ok(Self { dir, max_sessions })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_id(id)))
    }

    /// Write a snapshot, overwriting any previous save of the session.
    pub async fn save(&self, snapshot: &SessionSnapshot) -> SwarmResult<()> {
        let path = self.path_for(&snapshot.session.id.to_string());
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| SwarmError::InternalError(format!("serialize snapshot: {e}")))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| SwarmError::InternalError(format!("write {}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "session snapshot saved");
        Ok(())
    }

    /// Load a snapshot by session id.
    pub async fn load(&self, id: &str) -> SwarmResult<SessionSnapshot> {
        let path = self.path_for(id);
        let json = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| SwarmError::InternalError(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&json)
            .map_err(|e| SwarmError::InternalError(format!("parse {}: {e}", path.display())))
    }

    /// Whether a snapshot exists for the id.
    pub async fn exists(&self, id: &str) -> bool {
        tokio::fs::metadata(self.path_for(id)).await.is_ok()
    }

    /// Delete a snapshot. Returns whether one existed.
    pub async fn delete(&self, id: &str) -> SwarmResult<bool> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SwarmError::InternalError(format!(
                "delete {}: {e}",
                path.display()
            ))),
        }
    }

    /// Ids of all stored snapshots (file stems), newest first.
    pub async fn list(&self) -> SwarmResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| SwarmError::InternalError(format!("list {}: {e}", self.dir.display())))?;
        let mut found: Vec<(std::time::SystemTime, String)> = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            found.push((modified, stem.to_string()));
        }
        found.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(found.into_iter().map(|(_, stem)| stem).collect())
    }

    /// Import an external snapshot. On id collision the stored id gets an
    /// `-imported-{ts}` suffix. Returns the id it was stored under.
    pub async fn import(&self, snapshot: &SessionSnapshot) -> SwarmResult<String> {
        let base_id = snapshot.session.id.to_string();
        let stored_id = if self.exists(&base_id).await {
            format!("{base_id}-imported-{}", Utc::now().timestamp_millis())
        } else {
            base_id
        };
        let path = self.path_for(&stored_id);
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| SwarmError::InternalError(format!("serialize snapshot: {e}")))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| SwarmError::InternalError(format!("write {}: {e}", path.display())))?;
        Ok(stored_id)
    }

    /// Export a snapshot as pretty JSON.
    pub async fn export(&self, id: &str) -> SwarmResult<String> {
        let snapshot = self.load(id).await?;
        serde_json::to_string_pretty(&snapshot)
            .map_err(|e| SwarmError::InternalError(format!("serialize snapshot: {e}")))
    }

    /// Remove the oldest snapshots past `max_sessions`. Returns how many
    /// were deleted.
    pub async fn cleanup(&self) -> SwarmResult<usize> {
        let ids = self.list().await?;
        let mut removed = 0;
        for id in ids.iter().skip(self.max_sessions) {
            if self.delete(id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
