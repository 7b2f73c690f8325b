//! Git subprocess implementation of the [`Vcs`] port.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::domain::error::{SwarmError, SwarmResult};
use crate::domain::ports::vcs::Vcs;

/// Vcs implementation shelling out to `git`.
#[derive(Debug, Clone, Default)]
pub struct GitVcs;

impl GitVcs {
    pub fn new() -> Self {
        Self
    }

    /// Run a git command in `repo`, returning stdout on success.
    async fn run(&self, repo: &Path, args: &[&str]) -> SwarmResult<String> {
        debug!(repo = %repo.display(), ?args, "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(repo)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| SwarmError::InternalError(format!("git spawn failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SwarmError::InternalError(format!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn lines(output: String) -> Vec<String> {
        output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl Vcs for GitVcs {
    async fn is_repo(&self, path: &Path) -> bool {
        Command::new("git")
            .args(["rev-parse", "--git-dir"])
            .current_dir(path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn current_branch(&self, repo: &Path) -> SwarmResult<String> {
        Ok(self
            .run(repo, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?
            .trim()
            .to_string())
    }

    async fn worktree_add_new_branch(
        &self,
        repo: &Path,
        branch: &str,
        dir: &Path,
    ) -> SwarmResult<()> {
        let dir = dir.to_string_lossy();
        self.run(repo, &["worktree", "add", "-b", branch, &dir])
            .await?;
        Ok(())
    }

    async fn worktree_remove_force(&self, repo: &Path, dir: &Path) -> SwarmResult<()> {
        let dir = dir.to_string_lossy();
        self.run(repo, &["worktree", "remove", "--force", &dir])
            .await?;
        Ok(())
    }

    async fn branch_delete_force(&self, repo: &Path, branch: &str) -> SwarmResult<()> {
        self.run(repo, &["branch", "-D", branch]).await?;
        Ok(())
    }

    async fn status_porcelain(&self, repo: &Path) -> SwarmResult<String> {
        self.run(repo, &["status", "--porcelain"]).await
    }

    async fn add_all(&self, repo: &Path) -> SwarmResult<()> {
        self.run(repo, &["add", "-A"]).await?;
        Ok(())
    }

    async fn commit(&self, repo: &Path, message: &str) -> SwarmResult<()> {
        self.run(repo, &["commit", "-m", message]).await?;
        Ok(())
    }

    async fn diff_name_only(&self, repo: &Path, range: &str) -> SwarmResult<Vec<String>> {
        let output = self.run(repo, &["diff", "--name-only", range]).await?;
        Ok(Self::lines(output))
    }

    async fn diff_unmerged(&self, repo: &Path) -> SwarmResult<Vec<String>> {
        let output = self
            .run(repo, &["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(Self::lines(output))
    }

    async fn diff(&self, repo: &Path, range: &str) -> SwarmResult<String> {
        self.run(repo, &["diff", range]).await
    }

    async fn checkout(&self, repo: &Path, branch: &str) -> SwarmResult<()> {
        self.run(repo, &["checkout", branch]).await?;
        Ok(())
    }

    async fn merge_no_ff(&self, repo: &Path, branch: &str, message: &str) -> SwarmResult<()> {
        self.run(repo, &["merge", "--no-ff", "-m", message, branch])
            .await?;
        Ok(())
    }

    async fn merge_abort(&self, repo: &Path) -> SwarmResult<()> {
        self.run(repo, &["merge", "--abort"]).await?;
        Ok(())
    }

    async fn worktree_prune(&self, repo: &Path) -> SwarmResult<()> {
        self.run(repo, &["worktree", "prune"]).await?;
        Ok(())
    }

    async fn head_commit(&self, repo: &Path) -> SwarmResult<String> {
        Ok(self.run(repo, &["rev-parse", "HEAD"]).await?.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn init_repo(dir: &Path) {
        let git = GitVcs::new();
        git.run(dir, &["init", "-b", "main"]).await.unwrap();
        git.run(dir, &["config", "user.email", "test@example.com"])
            .await
            .unwrap();
        git.run(dir, &["config", "user.name", "Test"]).await.unwrap();
        tokio::fs::write(dir.join("README.md"), "# test\n").await.unwrap();
        git.add_all(dir).await.unwrap();
        git.commit(dir, "initial").await.unwrap();
    }

    #[tokio::test]
    async fn test_is_repo_and_current_branch() {
        let dir = TempDir::new().unwrap();
        let git = GitVcs::new();
        assert!(!git.is_repo(dir.path()).await);

        init_repo(dir.path()).await;
        assert!(git.is_repo(dir.path()).await);
        assert_eq!(git.current_branch(dir.path()).await.unwrap(), "main");
        assert!(!git.head_commit(dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_and_commit_cycle() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path()).await;
        let git = GitVcs::new();

        assert!(git.status_porcelain(dir.path()).await.unwrap().trim().is_empty());
        tokio::fs::write(dir.path().join("new.txt"), "content").await.unwrap();
        assert!(!git.status_porcelain(dir.path()).await.unwrap().trim().is_empty());

        git.add_all(dir.path()).await.unwrap();
        git.commit(dir.path(), "add new.txt").await.unwrap();
        assert!(git.status_porcelain(dir.path()).await.unwrap().trim().is_empty());
    }

    #[tokio::test]
    async fn test_worktree_add_and_remove() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path()).await;
        let git = GitVcs::new();

        let wt_dir = dir.path().join("wt/agent-1");
        git.worktree_add_new_branch(dir.path(), "swarm/test-branch", &wt_dir)
            .await
            .unwrap();
        assert!(wt_dir.join("README.md").exists());
        assert_eq!(git.current_branch(&wt_dir).await.unwrap(), "swarm/test-branch");

        git.worktree_remove_force(dir.path(), &wt_dir).await.unwrap();
        assert!(!wt_dir.exists());
        git.branch_delete_force(dir.path(), "swarm/test-branch")
            .await
            .unwrap();
    }
}
