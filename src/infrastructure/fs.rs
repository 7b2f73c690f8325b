//! Local filesystem and subprocess implementation of [`FileAccess`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::domain::error::{SwarmError, SwarmResult};
use crate::domain::ports::file_access::{ExecOutput, FileAccess, FileStat};

/// FileAccess backed by tokio's fs and process modules.
#[derive(Debug, Clone, Default)]
pub struct LocalFileAccess;

impl LocalFileAccess {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileAccess for LocalFileAccess {
    async fn read(&self, path: &Path) -> SwarmResult<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| SwarmError::InternalError(format!("read {}: {e}", path.display())))
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> SwarmResult<()> {
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| SwarmError::InternalError(format!("write {}: {e}", path.display())))
    }

    async fn stat(&self, path: &Path) -> SwarmResult<FileStat> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(FileStat {
                exists: true,
                is_dir: meta.is_dir(),
                size: meta.len(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(FileStat { exists: false, is_dir: false, size: 0 })
            }
            Err(e) => Err(SwarmError::InternalError(format!(
                "stat {}: {e}",
                path.display()
            ))),
        }
    }

    async fn mkdir_all(&self, path: &Path) -> SwarmResult<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| SwarmError::InternalError(format!("mkdir {}: {e}", path.display())))
    }

    async fn glob(&self, pattern: &str, cwd: &Path) -> SwarmResult<Vec<PathBuf>> {
        let mut matched = Vec::new();
        let mut stack = vec![cwd.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let Ok(file_type) = entry.file_type().await else { continue };
                if file_type.is_symlink() {
                    continue;
                }
                if file_type.is_dir() {
                    stack.push(path);
                } else if let Ok(relative) = path.strip_prefix(cwd) {
                    let candidate = relative.to_string_lossy().replace('\\', "/");
                    if glob_match(pattern, &candidate) {
                        matched.push(path);
                    }
                }
            }
        }
        matched.sort();
        Ok(matched)
    }

    async fn exec(&self, command: &str, cwd: &Path, timeout: Duration) -> SwarmResult<ExecOutput> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SwarmError::InternalError(format!("spawn failed: {e}")))?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stdout_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                Ok(ExecOutput {
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                    exit_code: status.code().unwrap_or(-1),
                })
            }
            Ok(Err(e)) => Err(SwarmError::InternalError(format!("wait failed: {e}"))),
            Err(_) => {
                let _ = child.kill().await;
                Ok(ExecOutput {
                    stdout: String::new(),
                    stderr: format!("command timed out after {}s", timeout.as_secs()),
                    exit_code: -1,
                })
            }
        }
    }
}

/// Match a slash-separated glob pattern against a relative path.
///
/// Supports `**` (any number of segments), `*`, and `?`. Character
/// classes are not supported.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();
    match_segments(&pattern_segments, &path_segments)
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.first() {
        None => path.is_empty(),
        Some(&"**") => {
            (0..=path.len()).any(|skip| match_segments(&pattern[1..], &path[skip..]))
        }
        Some(segment) => {
            !path.is_empty()
                && match_segment(segment, path[0])
                && match_segments(&pattern[1..], &path[1..])
        }
    }
}

fn match_segment(pattern: &str, text: &str) -> bool {
    fn rec(pattern: &[char], text: &[char]) -> bool {
        match pattern.first() {
            None => text.is_empty(),
            Some('*') => {
                rec(&pattern[1..], text) || (!text.is_empty() && rec(pattern, &text[1..]))
            }
            Some('?') => !text.is_empty() && rec(&pattern[1..], &text[1..]),
            Some(c) => text.first() == Some(c) && rec(&pattern[1..], &text[1..]),
        }
    }
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    rec(&pattern, &text)
}
