//! Worktree manager: isolated per-agent checkouts and their merges.
//!
//! Each agent that opts into isolation gets its own branch and worktree
//! directory. Merging goes through the main repository: check out the
//! base branch, merge no-fast-forward, and on conflicts abort cleanly and
//! report the conflicting paths. Operations touching the same repository
//! are serialised through a per-repository lock.

use chrono::Duration as ChronoDuration;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::domain::error::{SwarmError, SwarmResult};
use crate::domain::models::worktree::{MergeOutcome, Worktree, WorktreeStatus};
use crate::domain::ports::clock::Clock;
use crate::domain::ports::vcs::Vcs;

/// Worktree naming and retention settings.
#[derive(Debug, Clone)]
pub struct WorktreeConfig {
    /// Prefix for generated branch names.
    pub branch_prefix: String,
    /// Directory (relative to the workspace) holding the checkouts.
    pub base_dir: String,
    /// Commit uncommitted changes automatically before merging.
    pub auto_commit_on_merge: bool,
    /// Age past which merged/abandoned worktrees are removed by cleanup.
    pub max_worktree_age: ChronoDuration,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            branch_prefix: "swarm".to_string(),
            base_dir: ".hivemind/worktrees".to_string(),
            auto_commit_on_merge: true,
            max_worktree_age: ChronoDuration::hours(24),
        }
    }
}

/// Create/merge/cleanup lifecycle for agent worktrees.
pub struct WorktreeManager {
    vcs: Arc<dyn Vcs>,
    clock: Arc<dyn Clock>,
    worktrees: RwLock<HashMap<Uuid, Worktree>>,
    repo_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    config: WorktreeConfig,
}

impl WorktreeManager {
    pub fn new(vcs: Arc<dyn Vcs>, clock: Arc<dyn Clock>, config: WorktreeConfig) -> Self {
        Self {
            vcs,
            clock,
            worktrees: RwLock::new(HashMap::new()),
            repo_locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    async fn repo_lock(&self, workspace: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.repo_locks.lock().await;
        Arc::clone(
            locks
                .entry(workspace.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Whether the workspace is a VCS repository.
    pub async fn is_repo(&self, path: &Path) -> bool {
        self.vcs.is_repo(path).await
    }

    /// Create a worktree for an agent: a fresh branch off the current
    /// branch, checked out under the configured base directory.
    pub async fn create(
        &self,
        session_id: Uuid,
        agent_id: Uuid,
        workspace: &Path,
    ) -> SwarmResult<Worktree> {
        let lock = self.repo_lock(workspace).await;
        let _guard = lock.lock().await;

        if !self.vcs.is_repo(workspace).await {
            return Err(SwarmError::WorktreeCreateFailed(format!(
                "{} is not a repository",
                workspace.display()
            )));
        }
        let base_branch = self.vcs.current_branch(workspace).await?;

        let short_session = &session_id.to_string()[..8];
        let short_agent = &agent_id.to_string()[..8];
        let stamp = self.clock.now().timestamp_millis();
        let branch = format!(
            "{}/{short_session}/{short_agent}-{stamp}",
            self.config.branch_prefix
        );
        let dir = workspace
            .join(&self.config.base_dir)
            .join(format!("{short_agent}-{stamp}"));

        self.vcs
            .worktree_add_new_branch(workspace, &branch, &dir)
            .await
            .map_err(|e| SwarmError::WorktreeCreateFailed(e.to_string()))?;

        let mut worktree = Worktree::new(
            session_id,
            agent_id,
            branch,
            dir.to_string_lossy().into_owned(),
            base_branch,
        );
        worktree.created_at = self.clock.now();
        self.worktrees
            .write()
            .await
            .insert(worktree.id, worktree.clone());
        tracing::info!(
            worktree_id = %worktree.id,
            branch = %worktree.branch,
            "worktree created"
        );
        Ok(worktree)
    }

    pub async fn get(&self, id: Uuid) -> SwarmResult<Worktree> {
        self.worktrees
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| SwarmError::ValidationError(format!("unknown worktree: {id}")))
    }

    pub async fn for_session(&self, session_id: Uuid) -> Vec<Worktree> {
        self.worktrees
            .read()
            .await
            .values()
            .filter(|w| w.session_id == session_id)
            .cloned()
            .collect()
    }

    pub async fn for_agent(&self, agent_id: Uuid) -> Option<Worktree> {
        self.worktrees
            .read()
            .await
            .values()
            .find(|w| w.agent_id == agent_id && w.status == WorktreeStatus::Active)
            .cloned()
    }

    /// Merge a worktree's branch back into its base branch.
    ///
    /// Conflicts are not an error: the merge is aborted, the repository is
    /// left on the pre-merge base-branch HEAD, and the conflicting paths
    /// come back in the outcome.
    pub async fn merge(
        &self,
        id: Uuid,
        workspace: &Path,
        message: Option<&str>,
    ) -> SwarmResult<MergeOutcome> {
        let worktree = self.get(id).await?;
        if worktree.status != WorktreeStatus::Active {
            return Err(SwarmError::ValidationError(format!(
                "worktree {id} is {} and cannot be merged",
                worktree.status.as_str()
            )));
        }

        let lock = self.repo_lock(workspace).await;
        let _guard = lock.lock().await;

        let worktree_path = Path::new(&worktree.path);
        let dirty = !self
            .vcs
            .status_porcelain(worktree_path)
            .await?
            .trim()
            .is_empty();
        if dirty && self.config.auto_commit_on_merge {
            let short_agent = &worktree.agent_id.to_string()[..8];
            let commit_message = message
                .map(str::to_string)
                .unwrap_or_else(|| format!("[swarm] Auto-commit from agent {short_agent}"));
            self.vcs.add_all(worktree_path).await?;
            self.vcs.commit(worktree_path, &commit_message).await?;
            if let Some(w) = self.worktrees.write().await.get_mut(&id) {
                w.commit_count += 1;
            }
        }

        let range = format!("{}..{}", worktree.base_branch, worktree.branch);
        let changed = self.vcs.diff_name_only(workspace, &range).await?;

        self.vcs.checkout(workspace, &worktree.base_branch).await?;
        let merge_message = message
            .map(str::to_string)
            .unwrap_or_else(|| format!("Merge {}", worktree.branch));
        match self
            .vcs
            .merge_no_ff(workspace, &worktree.branch, &merge_message)
            .await
        {
            Ok(()) => {
                if let Some(w) = self.worktrees.write().await.get_mut(&id) {
                    w.status = WorktreeStatus::Merged;
                }
                tracing::info!(worktree_id = %id, files = changed.len(), "worktree merged");
                Ok(MergeOutcome::merged(changed))
            }
            Err(merge_error) => {
                let conflicts = self.vcs.diff_unmerged(workspace).await.unwrap_or_default();
                self.vcs.merge_abort(workspace).await?;
                tracing::warn!(
                    worktree_id = %id,
                    conflicts = conflicts.len(),
                    error = %merge_error,
                    "merge aborted on conflicts"
                );
                Ok(MergeOutcome::conflicted(conflicts))
            }
        }
    }

    /// Give up on a worktree without merging.
    pub async fn abandon(&self, id: Uuid) -> SwarmResult<()> {
        let mut worktrees = self.worktrees.write().await;
        let worktree = worktrees
            .get_mut(&id)
            .ok_or_else(|| SwarmError::ValidationError(format!("unknown worktree: {id}")))?;
        if worktree.status != WorktreeStatus::Active {
            return Err(SwarmError::ValidationError(format!(
                "worktree {id} is {} and cannot be abandoned",
                worktree.status.as_str()
            )));
        }
        worktree.status = WorktreeStatus::Abandoned;
        Ok(())
    }

    /// Remove a worktree's directory and (unless merged) its branch.
    /// Deleting an Active worktree is forbidden; abandon it first.
    pub async fn delete(&self, id: Uuid, workspace: &Path) -> SwarmResult<()> {
        let worktree = self.get(id).await?;
        if worktree.status == WorktreeStatus::Active {
            return Err(SwarmError::ValidationError(format!(
                "worktree {id} is active; abandon it before deleting"
            )));
        }
        if worktree.status == WorktreeStatus::Deleted {
            return Ok(());
        }

        let lock = self.repo_lock(workspace).await;
        let _guard = lock.lock().await;

        self.vcs
            .worktree_remove_force(workspace, Path::new(&worktree.path))
            .await?;
        if worktree.status != WorktreeStatus::Merged {
            self.vcs
                .branch_delete_force(workspace, &worktree.branch)
                .await?;
        }
        if let Some(w) = self.worktrees.write().await.get_mut(&id) {
            w.status = WorktreeStatus::Deleted;
        }
        Ok(())
    }

    /// Delete merged/abandoned worktrees older than the configured age,
    /// then prune stale VCS records.
    pub async fn cleanup(&self, workspace: &Path) -> SwarmResult<usize> {
        let cutoff = self.clock.now() - self.config.max_worktree_age;
        let expired: Vec<Uuid> = self
            .worktrees
            .read()
            .await
            .values()
            .filter(|w| w.is_cleanable() && w.created_at < cutoff)
            .map(|w| w.id)
            .collect();

        let mut removed = 0;
        for id in expired {
            match self.delete(id, workspace).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(worktree_id = %id, error = %e, "cleanup failed for worktree");
                }
            }
        }

        let lock = self.repo_lock(workspace).await;
        let _guard = lock.lock().await;
        self.vcs.worktree_prune(workspace).await?;
        Ok(removed)
    }

    /// Files changed on the worktree branch relative to its base.
    pub async fn changed_files(&self, id: Uuid, workspace: &Path) -> SwarmResult<Vec<String>> {
        let worktree = self.get(id).await?;
        let range = format!("{}..{}", worktree.base_branch, worktree.branch);
        self.vcs.diff_name_only(workspace, &range).await
    }

    /// Full diff of the worktree branch relative to its base.
    pub async fn diff(&self, id: Uuid, workspace: &Path) -> SwarmResult<String> {
        let worktree = self.get(id).await?;
        let range = format!("{}..{}", worktree.base_branch, worktree.branch);
        self.vcs.diff(workspace, &range).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::clock::ManualClock;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MockVcs {
        calls: StdMutex<Vec<String>>,
        /// When set, merge_no_ff fails and these paths are unmerged.
        conflicts: StdMutex<Vec<String>>,
        dirty: StdMutex<bool>,
    }

    impl MockVcs {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Vcs for MockVcs {
        async fn is_repo(&self, _path: &Path) -> bool {
            true
        }
        async fn current_branch(&self, _repo: &Path) -> SwarmResult<String> {
            Ok("main".to_string())
        }
        async fn worktree_add_new_branch(
            &self,
            _repo: &Path,
            branch: &str,
            _dir: &Path,
        ) -> SwarmResult<()> {
            self.record(format!("worktree_add {branch}"));
            Ok(())
        }
        async fn worktree_remove_force(&self, _repo: &Path, dir: &Path) -> SwarmResult<()> {
            self.record(format!("worktree_remove {}", dir.display()));
            Ok(())
        }
        async fn branch_delete_force(&self, _repo: &Path, branch: &str) -> SwarmResult<()> {
            self.record(format!("branch_delete {branch}"));
            Ok(())
        }
        async fn status_porcelain(&self, _repo: &Path) -> SwarmResult<String> {
            Ok(if *self.dirty.lock().unwrap() { " M a.txt".to_string() } else { String::new() })
        }
        async fn add_all(&self, _repo: &Path) -> SwarmResult<()> {
            self.record("add_all");
            Ok(())
        }
        async fn commit(&self, _repo: &Path, message: &str) -> SwarmResult<()> {
            self.record(format!("commit {message}"));
            Ok(())
        }
        async fn diff_name_only(&self, _repo: &Path, _range: &str) -> SwarmResult<Vec<String>> {
            Ok(vec!["a.txt".to_string()])
        }
        async fn diff_unmerged(&self, _repo: &Path) -> SwarmResult<Vec<String>> {
            Ok(self.conflicts.lock().unwrap().clone())
        }
        async fn diff(&self, _repo: &Path, _range: &str) -> SwarmResult<String> {
            Ok("diff --git a/a.txt b/a.txt".to_string())
        }
        async fn checkout(&self, _repo: &Path, branch: &str) -> SwarmResult<()> {
            self.record(format!("checkout {branch}"));
            Ok(())
        }
        async fn merge_no_ff(&self, _repo: &Path, branch: &str, _m: &str) -> SwarmResult<()> {
            self.record(format!("merge {branch}"));
            if self.conflicts.lock().unwrap().is_empty() {
                Ok(())
            } else {
                Err(SwarmError::MergeConflict { conflicts: vec![] })
            }
        }
        async fn merge_abort(&self, _repo: &Path) -> SwarmResult<()> {
            self.record("merge_abort");
            Ok(())
        }
        async fn worktree_prune(&self, _repo: &Path) -> SwarmResult<()> {
            self.record("prune");
            Ok(())
        }
        async fn head_commit(&self, _repo: &Path) -> SwarmResult<String> {
            Ok("abc123".to_string())
        }
    }

    fn manager(vcs: Arc<MockVcs>) -> WorktreeManager {
        WorktreeManager::new(
            vcs,
            Arc::new(ManualClock::at_unix(1_785_456_030)),
            WorktreeConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_create_names_branch_from_ids() {
        let vcs = Arc::new(MockVcs::default());
        let mgr = manager(Arc::clone(&vcs));
        let session_id = Uuid::new_v4();
        let agent_id = Uuid::new_v4();

        let wt = mgr
            .create(session_id, agent_id, Path::new("/repo"))
            .await
            .unwrap();
        assert!(wt.branch.starts_with("swarm/"));
        assert!(wt.branch.contains(&session_id.to_string()[..8]));
        assert!(wt.branch.contains(&agent_id.to_string()[..8]));
        assert_eq!(wt.base_branch, "main");
        assert_eq!(wt.status, WorktreeStatus::Active);
        assert!(wt.path.contains(".hivemind/worktrees"));
    }

    #[tokio::test]
    async fn test_merge_success_marks_merged() {
        let vcs = Arc::new(MockVcs::default());
        let mgr = manager(Arc::clone(&vcs));
        let wt = mgr
            .create(Uuid::new_v4(), Uuid::new_v4(), Path::new("/repo"))
            .await
            .unwrap();

        let outcome = mgr.merge(wt.id, Path::new("/repo"), None).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.merged_files, vec!["a.txt".to_string()]);
        assert_eq!(mgr.get(wt.id).await.unwrap().status, WorktreeStatus::Merged);

        let calls = vcs.calls();
        assert!(calls.iter().any(|c| c == "checkout main"));
        assert!(calls.iter().any(|c| c.starts_with("merge swarm/")));
    }

    #[tokio::test]
    async fn test_merge_conflict_aborts_and_reports() {
        let vcs = Arc::new(MockVcs::default());
        *vcs.conflicts.lock().unwrap() = vec!["a.txt".to_string()];
        let mgr = manager(Arc::clone(&vcs));
        let wt = mgr
            .create(Uuid::new_v4(), Uuid::new_v4(), Path::new("/repo"))
            .await
            .unwrap();

        let outcome = mgr.merge(wt.id, Path::new("/repo"), None).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.conflicts, vec!["a.txt".to_string()]);
        // Merge was aborted, worktree stays active for another attempt.
        assert!(vcs.calls().iter().any(|c| c == "merge_abort"));
        assert_eq!(mgr.get(wt.id).await.unwrap().status, WorktreeStatus::Active);
    }

    #[tokio::test]
    async fn test_dirty_worktree_auto_commits() {
        let vcs = Arc::new(MockVcs::default());
        *vcs.dirty.lock().unwrap() = true;
        let mgr = manager(Arc::clone(&vcs));
        let wt = mgr
            .create(Uuid::new_v4(), Uuid::new_v4(), Path::new("/repo"))
            .await
            .unwrap();

        mgr.merge(wt.id, Path::new("/repo"), None).await.unwrap();
        let calls = vcs.calls();
        assert!(calls.iter().any(|c| c == "add_all"));
        assert!(calls
            .iter()
            .any(|c| c.starts_with("commit [swarm] Auto-commit from agent ")));
        assert_eq!(mgr.get(wt.id).await.unwrap().commit_count, 1);
    }

    #[tokio::test]
    async fn test_merge_requires_active() {
        let vcs = Arc::new(MockVcs::default());
        let mgr = manager(vcs);
        let wt = mgr
            .create(Uuid::new_v4(), Uuid::new_v4(), Path::new("/repo"))
            .await
            .unwrap();
        mgr.abandon(wt.id).await.unwrap();
        assert!(mgr.merge(wt.id, Path::new("/repo"), None).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_active_forbidden() {
        let vcs = Arc::new(MockVcs::default());
        let mgr = manager(vcs);
        let wt = mgr
            .create(Uuid::new_v4(), Uuid::new_v4(), Path::new("/repo"))
            .await
            .unwrap();
        assert!(mgr.delete(wt.id, Path::new("/repo")).await.is_err());

        mgr.abandon(wt.id).await.unwrap();
        mgr.delete(wt.id, Path::new("/repo")).await.unwrap();
        assert_eq!(mgr.get(wt.id).await.unwrap().status, WorktreeStatus::Deleted);
    }

    #[tokio::test]
    async fn test_delete_merged_keeps_branch() {
        let vcs = Arc::new(MockVcs::default());
        let mgr = manager(Arc::clone(&vcs));
        let wt = mgr
            .create(Uuid::new_v4(), Uuid::new_v4(), Path::new("/repo"))
            .await
            .unwrap();
        mgr.merge(wt.id, Path::new("/repo"), None).await.unwrap();
        mgr.delete(wt.id, Path::new("/repo")).await.unwrap();

        let calls = vcs.calls();
        assert!(calls.iter().any(|c| c.starts_with("worktree_remove")));
        assert!(!calls.iter().any(|c| c.starts_with("branch_delete")));
    }

    #[tokio::test]
    async fn test_cleanup_removes_old_cleanable_worktrees() {
        let vcs = Arc::new(MockVcs::default());
        let clock = Arc::new(ManualClock::at_unix(1_785_456_030));
        let mgr = WorktreeManager::new(
            Arc::clone(&vcs) as Arc<dyn Vcs>,
            clock.clone(),
            WorktreeConfig::default(),
        );
        let old = mgr
            .create(Uuid::new_v4(), Uuid::new_v4(), Path::new("/repo"))
            .await
            .unwrap();
        mgr.abandon(old.id).await.unwrap();

        // Not old enough yet.
        assert_eq!(mgr.cleanup(Path::new("/repo")).await.unwrap(), 0);

        clock.advance_secs(25 * 3600);
        let active = mgr
            .create(Uuid::new_v4(), Uuid::new_v4(), Path::new("/repo"))
            .await
            .unwrap();

        let removed = mgr.cleanup(Path::new("/repo")).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(mgr.get(old.id).await.unwrap().status, WorktreeStatus::Deleted);
        // Active worktrees are never touched by cleanup.
        assert_eq!(mgr.get(active.id).await.unwrap().status, WorktreeStatus::Active);
        assert!(vcs.calls().iter().any(|c| c == "prune"));
    }
}
