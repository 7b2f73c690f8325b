//! Version-control port.
//!
//! The worktree manager drives a git-equivalent through this trait; the
//! operations map one-to-one onto porcelain commands.

use async_trait::async_trait;
use std::path::Path;

use crate::domain::error::SwarmResult;

/// Git-equivalent worktree and merge operations rooted at a repository.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Whether `path` is inside a repository work tree.
    async fn is_repo(&self, path: &Path) -> bool;

    /// Name of the currently checked-out branch.
    async fn current_branch(&self, repo: &Path) -> SwarmResult<String>;

    /// Create a worktree at `dir` on a new branch.
    async fn worktree_add_new_branch(
        &self,
        repo: &Path,
        branch: &str,
        dir: &Path,
    ) -> SwarmResult<()>;

    /// Force-remove a worktree directory.
    async fn worktree_remove_force(&self, repo: &Path, dir: &Path) -> SwarmResult<()>;

    /// Force-delete a branch.
    async fn branch_delete_force(&self, repo: &Path, branch: &str) -> SwarmResult<()>;

    /// `status --porcelain` output; empty means clean.
    async fn status_porcelain(&self, repo: &Path) -> SwarmResult<String>;

    /// Stage everything.
    async fn add_all(&self, repo: &Path) -> SwarmResult<()>;

    /// Commit staged changes.
    async fn commit(&self, repo: &Path, message: &str) -> SwarmResult<()>;

    /// Paths changed between two refs (`a..b`).
    async fn diff_name_only(&self, repo: &Path, range: &str) -> SwarmResult<Vec<String>>;

    /// Unmerged (conflicting) paths in the current merge state.
    async fn diff_unmerged(&self, repo: &Path) -> SwarmResult<Vec<String>>;

    /// Full diff between two refs.
    async fn diff(&self, repo: &Path, range: &str) -> SwarmResult<String>;

    /// Check out a branch.
    async fn checkout(&self, repo: &Path, branch: &str) -> SwarmResult<()>;

    /// Merge a branch with `--no-ff`.
    async fn merge_no_ff(&self, repo: &Path, branch: &str, message: &str) -> SwarmResult<()>;

    /// Abort an in-progress merge.
    async fn merge_abort(&self, repo: &Path) -> SwarmResult<()>;

    /// Prune stale worktree records.
    async fn worktree_prune(&self, repo: &Path) -> SwarmResult<()>;

    /// Current HEAD commit hash.
    async fn head_commit(&self, repo: &Path) -> SwarmResult<String>;
}
