//! Worktree domain model.
//!
//! Worktrees give each agent an isolated on-disk checkout on its own
//! branch so parallel work never touches the main working tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a worktree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeStatus {
    /// Checked out and in use
    Active,
    /// Successfully merged back into the base branch
    Merged,
    /// Given up without merging
    Abandoned,
    /// Directory and branch removed
    Deleted,
}

impl WorktreeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Merged => "merged",
            Self::Abandoned => "abandoned",
            Self::Deleted => "deleted",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "merged" => Some(Self::Merged),
            "abandoned" => Some(Self::Abandoned),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Outcome of a merge attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// Whether the merge landed
    pub success: bool,
    /// Files merged into the base branch (on success)
    #[serde(default)]
    pub merged_files: Vec<String>,
    /// Conflicting paths (on failure)
    #[serde(default)]
    pub conflicts: Vec<String>,
}

impl MergeOutcome {
    pub fn merged(files: Vec<String>) -> Self {
        Self {
            success: true,
            merged_files: files,
            conflicts: Vec::new(),
        }
    }

    pub fn conflicted(conflicts: Vec<String>) -> Self {
        Self {
            success: false,
            merged_files: Vec::new(),
            conflicts,
        }
    }
}

/// An on-disk checkout of a session/agent-private branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worktree {
    /// Unique identifier
    pub id: Uuid,
    /// Owning session
    pub session_id: Uuid,
    /// Agent working inside this tree
    pub agent_id: Uuid,
    /// Branch the worktree is on
    pub branch: String,
    /// Filesystem path of the checkout
    pub path: String,
    /// Branch the worktree was created from
    pub base_branch: String,
    /// Current status
    pub status: WorktreeStatus,
    /// Commits made on the branch
    pub commit_count: u32,
    /// When created
    pub created_at: DateTime<Utc>,
}

impl Worktree {
    pub fn new(
        session_id: Uuid,
        agent_id: Uuid,
        branch: impl Into<String>,
        path: impl Into<String>,
        base_branch: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            agent_id,
            branch: branch.into(),
            path: path.into(),
            base_branch: base_branch.into(),
            status: WorktreeStatus::Active,
            commit_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Whether cleanup may remove this worktree.
    pub fn is_cleanable(&self) -> bool {
        matches!(self.status, WorktreeStatus::Merged | WorktreeStatus::Abandoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worktree_starts_active() {
        let wt = Worktree::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "swarm/abcd1234/ef567890-1",
            "/repo/.hivemind/worktrees/ef567890-1",
            "main",
        );
        assert_eq!(wt.status, WorktreeStatus::Active);
        assert_eq!(wt.commit_count, 0);
        assert!(!wt.is_cleanable());
    }

    #[test]
    fn test_cleanable_states() {
        let mut wt = Worktree::new(Uuid::new_v4(), Uuid::new_v4(), "b", "/p", "main");
        wt.status = WorktreeStatus::Merged;
        assert!(wt.is_cleanable());
        wt.status = WorktreeStatus::Abandoned;
        assert!(wt.is_cleanable());
        wt.status = WorktreeStatus::Deleted;
        assert!(!wt.is_cleanable());
    }

    #[test]
    fn test_merge_outcome_constructors() {
        let ok = MergeOutcome::merged(vec!["a.rs".to_string()]);
        assert!(ok.success);
        assert!(ok.conflicts.is_empty());

        let bad = MergeOutcome::conflicted(vec!["a.rs".to_string()]);
        assert!(!bad.success);
        assert_eq!(bad.conflicts, vec!["a.rs".to_string()]);
    }
}
