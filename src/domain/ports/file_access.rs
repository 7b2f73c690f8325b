//! File access port.
//!
//! All tool-host file I/O and subprocess execution goes through this
//! trait. Relative paths are resolved against the workspace root by the
//! caller before they reach an implementation.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::error::SwarmResult;

/// Metadata returned by [`FileAccess::stat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub exists: bool,
    pub is_dir: bool,
    pub size: u64,
}

/// Output of a subprocess run through [`FileAccess::exec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Filesystem and subprocess capability within a workspace root.
#[async_trait]
pub trait FileAccess: Send + Sync {
    /// Read a file's bytes.
    async fn read(&self, path: &Path) -> SwarmResult<Vec<u8>>;

    /// Write bytes, creating the file if needed.
    async fn write(&self, path: &Path, contents: &[u8]) -> SwarmResult<()>;

    /// Stat a path without reading it.
    async fn stat(&self, path: &Path) -> SwarmResult<FileStat>;

    /// Recursively create a directory.
    async fn mkdir_all(&self, path: &Path) -> SwarmResult<()>;

    /// Evaluate a glob pattern relative to `cwd`, returning matched paths.
    async fn glob(&self, pattern: &str, cwd: &Path) -> SwarmResult<Vec<PathBuf>>;

    /// Run a shell command with a timeout, capturing output.
    async fn exec(&self, command: &str, cwd: &Path, timeout: Duration) -> SwarmResult<ExecOutput>;
}
