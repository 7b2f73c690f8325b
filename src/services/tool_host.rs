//! Tool host: the bounded, vetted tool surface agents may call.
//!
//! Each tool takes a JSON argument string and returns a list of content
//! parts. Handler failures never propagate as errors; they become error
//! content parts so the model can react to them. Shell commands pass an
//! allow-list on the first token and a deny-list of destructive patterns
//! before any subprocess is spawned.

use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::RegexBuilder;
use std::sync::Arc;

use crate::domain::models::task::{CodeChange, CodeChangeKind};
use crate::domain::ports::file_access::FileAccess;
use crate::domain::ports::model_provider::ToolSchema;

/// Commands the `bash` tool may run, matched on the first
/// whitespace-delimited token.
const BASH_ALLOW_LIST: &[&str] = &[
    "npm", "npx", "yarn", "pnpm", "node", "tsc", "eslint", "prettier", "git", "ls", "cat",
    "echo", "pwd", "mkdir", "cp", "mv", "rm", "grep", "find", "head", "tail", "wc",
];

/// Destructive patterns rejected regardless of the leading token.
const BASH_DENY_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -rf ~",
    "> /dev/sd",
    "mkfs",
    "dd if=",
    ":(){ :|:& };:",
];

/// Path prefixes always excluded from glob and grep.
const EXCLUDED_DIRS: &[&str] = &["node_modules/", ".git/"];

/// Every tool the host knows about.
pub const ALL_TOOLS: &[&str] = &[
    "read_file",
    "write_file",
    "edit_file",
    "glob",
    "grep",
    "bash",
    "task_complete",
];

/// One piece of tool output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text { text: String },
    Error { text: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Text { text } | Self::Error { text } => text,
        }
    }
}

/// Completion signal raised by `task_complete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCompletion {
    pub summary: String,
    pub files_changed: Vec<String>,
    pub notes: Option<String>,
}

/// Result of one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    pub parts: Vec<ContentPart>,
    /// File mutation performed by this call, if any.
    pub code_change: Option<CodeChange>,
    /// Set when the agent signalled completion.
    pub completion: Option<TaskCompletion>,
}

impl ToolCallResult {
    fn text(text: impl Into<String>) -> Self {
        Self { parts: vec![ContentPart::text(text)], code_change: None, completion: None }
    }

    fn error(text: impl Into<String>) -> Self {
        Self { parts: vec![ContentPart::error(text)], code_change: None, completion: None }
    }

    /// Whether any part is an error part.
    pub fn is_error(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, ContentPart::Error { .. }))
    }

    /// All parts joined for transcript echo.
    pub fn combined_text(&self) -> String {
        self.parts
            .iter()
            .map(ContentPart::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Limits applied to tool execution.
#[derive(Debug, Clone)]
pub struct ToolHostConfig {
    pub bash_timeout: Duration,
    pub bash_output_limit: usize,
    pub glob_max_results: usize,
    pub grep_max_matches: usize,
    pub grep_content_limit: usize,
}

impl Default for ToolHostConfig {
    fn default() -> Self {
        Self {
            bash_timeout: Duration::from_secs(30),
            bash_output_limit: 10_000,
            glob_max_results: 100,
            grep_max_matches: 50,
            grep_content_limit: 200,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
    start_line: Option<usize>,
    end_line: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct EditFileArgs {
    path: String,
    old: String,
    new: String,
}

#[derive(Debug, Deserialize)]
struct GlobArgs {
    pattern: String,
    base: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GrepArgs {
    pattern: String,
    base: Option<String>,
    file_pattern: Option<String>,
    #[serde(default)]
    case_insensitive: bool,
}

#[derive(Debug, Deserialize)]
struct BashArgs {
    command: String,
    cwd: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TaskCompleteArgs {
    summary: String,
    #[serde(default)]
    files_changed: Vec<String>,
    notes: Option<String>,
}

/// Bounded tool surface over a workspace root.
pub struct ToolHost {
    fs: Arc<dyn FileAccess>,
    workspace_root: PathBuf,
    config: ToolHostConfig,
}

impl ToolHost {
    pub fn new(fs: Arc<dyn FileAccess>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            workspace_root: workspace_root.into(),
            config: ToolHostConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ToolHostConfig) -> Self {
        self.config = config;
        self
    }

    /// Schemas for the given allow-list, in host order. Unknown names are
    /// ignored, so a role cannot smuggle in tools the host does not have.
    pub fn schemas_for(&self, allowed: &[&str]) -> Vec<ToolSchema> {
        ALL_TOOLS
            .iter()
            .copied()
            .filter(|name| allowed.contains(name))
            .map(|name| self.schema(name))
            .collect()
    }

    fn schema(&self, name: &str) -> ToolSchema {
        let (description, parameters) = match name {
            "read_file" => (
                "Read a file, optionally slicing to a 1-based line range",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "start_line": {"type": "integer"},
                        "end_line": {"type": "integer"}
                    },
                    "required": ["path"]
                }),
            ),
            "write_file" => (
                "Write a file, creating parent directories as needed",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "content": {"type": "string"}
                    },
                    "required": ["path", "content"]
                }),
            ),
            "edit_file" => (
                "Replace one exact occurrence of a string in a file",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "old": {"type": "string"},
                        "new": {"type": "string"}
                    },
                    "required": ["path", "old", "new"]
                }),
            ),
            "glob" => (
                "Find files matching a glob pattern",
                json!({
                    "type": "object",
                    "properties": {
                        "pattern": {"type": "string"},
                        "base": {"type": "string"}
                    },
                    "required": ["pattern"]
                }),
            ),
            "grep" => (
                "Search file contents with a regular expression",
                json!({
                    "type": "object",
                    "properties": {
                        "pattern": {"type": "string"},
                        "base": {"type": "string"},
                        "file_pattern": {"type": "string"},
                        "case_insensitive": {"type": "boolean"}
                    },
                    "required": ["pattern"]
                }),
            ),
            "bash" => (
                "Run an allow-listed shell command",
                json!({
                    "type": "object",
                    "properties": {
                        "command": {"type": "string"},
                        "cwd": {"type": "string"},
                        "timeout_ms": {"type": "integer"}
                    },
                    "required": ["command"]
                }),
            ),
            "task_complete" => (
                "Signal that the task is finished",
                json!({
                    "type": "object",
                    "properties": {
                        "summary": {"type": "string"},
                        "files_changed": {"type": "array", "items": {"type": "string"}},
                        "notes": {"type": "string"}
                    },
                    "required": ["summary"]
                }),
            ),
            _ => ("unknown tool", json!({"type": "object"})),
        };
        ToolSchema {
            id: name.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }

    /// Dispatch one tool call. Never fails; problems come back as error
    /// content parts.
    pub async fn invoke(&self, name: &str, args_json: &str) -> ToolCallResult {
        match name {
            "read_file" => match serde_json::from_str(args_json) {
                Ok(args) => self.read_file(args).await,
                Err(e) => ToolCallResult::error(format!("invalid read_file arguments: {e}")),
            },
            "write_file" => match serde_json::from_str(args_json) {
                Ok(args) => self.write_file(args).await,
                Err(e) => ToolCallResult::error(format!("invalid write_file arguments: {e}")),
            },
            "edit_file" => match serde_json::from_str(args_json) {
                Ok(args) => self.edit_file(args).await,
                Err(e) => ToolCallResult::error(format!("invalid edit_file arguments: {e}")),
            },
            "glob" => match serde_json::from_str(args_json) {
                Ok(args) => self.glob(args).await,
                Err(e) => ToolCallResult::error(format!("invalid glob arguments: {e}")),
            },
            "grep" => match serde_json::from_str(args_json) {
                Ok(args) => self.grep(args).await,
                Err(e) => ToolCallResult::error(format!("invalid grep arguments: {e}")),
            },
            "bash" => match serde_json::from_str(args_json) {
                Ok(args) => self.bash(args).await,
                Err(e) => ToolCallResult::error(format!("invalid bash arguments: {e}")),
            },
            "task_complete" => match serde_json::from_str::<TaskCompleteArgs>(args_json) {
                Ok(args) => ToolCallResult {
                    parts: vec![ContentPart::text("task recorded as complete")],
                    code_change: None,
                    completion: Some(TaskCompletion {
                        summary: args.summary,
                        files_changed: args.files_changed,
                        notes: args.notes,
                    }),
                },
                Err(e) => ToolCallResult::error(format!("invalid task_complete arguments: {e}")),
            },
            other => ToolCallResult::error(format!("unknown tool: {other}")),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.workspace_root.join(p)
        }
    }

    async fn read_file(&self, args: ReadFileArgs) -> ToolCallResult {
        let path = self.resolve(&args.path);
        let bytes = match self.fs.read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => return ToolCallResult::error(format!("read failed: {e}")),
        };
        let content = String::from_utf8_lossy(&bytes);
        let sliced = match (args.start_line, args.end_line) {
            (None, None) => content.into_owned(),
            (start, end) => {
                let lines: Vec<&str> = content.lines().collect();
                let from = start.unwrap_or(1).saturating_sub(1);
                let to = end.unwrap_or(lines.len()).min(lines.len());
                if from >= to {
                    String::new()
                } else {
                    lines[from..to].join("\n")
                }
            }
        };
        ToolCallResult::text(sliced)
    }

    async fn write_file(&self, args: WriteFileArgs) -> ToolCallResult {
        let path = self.resolve(&args.path);
        let existed = self
            .fs
            .stat(&path)
            .await
            .map(|s| s.exists)
            .unwrap_or(false);
        if let Some(parent) = path.parent() {
            if let Err(e) = self.fs.mkdir_all(parent).await {
                return ToolCallResult::error(format!("mkdir failed: {e}"));
            }
        }
        if let Err(e) = self.fs.write(&path, args.content.as_bytes()).await {
            return ToolCallResult::error(format!("write failed: {e}"));
        }
        let kind = if existed { CodeChangeKind::Modify } else { CodeChangeKind::Create };
        ToolCallResult {
            parts: vec![ContentPart::text(format!(
                "wrote {} bytes to {}",
                args.content.len(),
                args.path
            ))],
            code_change: Some(CodeChange {
                path: args.path,
                kind,
                new_content: Some(args.content),
                diff: None,
            }),
            completion: None,
        }
    }

    async fn edit_file(&self, args: EditFileArgs) -> ToolCallResult {
        let path = self.resolve(&args.path);
        let bytes = match self.fs.read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => return ToolCallResult::error(format!("read failed: {e}")),
        };
        let content = String::from_utf8_lossy(&bytes).into_owned();
        if !content.contains(&args.old) {
            return ToolCallResult::error(format!(
                "string not found in {}: {:?}",
                args.path, args.old
            ));
        }
        let updated = content.replacen(&args.old, &args.new, 1);
        if let Err(e) = self.fs.write(&path, updated.as_bytes()).await {
            return ToolCallResult::error(format!("write failed: {e}"));
        }
        let diff = format!("@@ {}\n-{}\n+{}", args.path, args.old, args.new);
        ToolCallResult {
            parts: vec![ContentPart::text(format!("edited {}", args.path))],
            code_change: Some(CodeChange {
                path: args.path,
                kind: CodeChangeKind::Modify,
                new_content: None,
                diff: Some(diff),
            }),
            completion: None,
        }
    }

    fn is_excluded(path: &Path) -> bool {
        let text = path.to_string_lossy();
        EXCLUDED_DIRS
            .iter()
            .any(|dir| text.contains(dir) || text.starts_with(dir.trim_end_matches('/')))
    }

    async fn glob(&self, args: GlobArgs) -> ToolCallResult {
        let base = args
            .base
            .map(|b| self.resolve(&b))
            .unwrap_or_else(|| self.workspace_root.clone());
        let paths = match self.fs.glob(&args.pattern, &base).await {
            Ok(paths) => paths,
            Err(e) => return ToolCallResult::error(format!("glob failed: {e}")),
        };
        let mut matched: Vec<String> = paths
            .into_iter()
            .filter(|p| !Self::is_excluded(p))
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let truncated = matched.len() > self.config.glob_max_results;
        matched.truncate(self.config.glob_max_results);
        let mut text = matched.join("\n");
        if truncated {
            text.push_str(&format!(
                "\n(truncated to first {} results)",
                self.config.glob_max_results
            ));
        }
        if text.is_empty() {
            text = "no matches".to_string();
        }
        ToolCallResult::text(text)
    }

    async fn grep(&self, args: GrepArgs) -> ToolCallResult {
        let regex = match RegexBuilder::new(&args.pattern)
            .case_insensitive(args.case_insensitive)
            .build()
        {
            Ok(regex) => regex,
            Err(e) => return ToolCallResult::error(format!("invalid pattern: {e}")),
        };

        let base = args
            .base
            .map(|b| self.resolve(&b))
            .unwrap_or_else(|| self.workspace_root.clone());
        let file_pattern = args.file_pattern.unwrap_or_else(|| "**/*".to_string());
        let files = match self.fs.glob(&file_pattern, &base).await {
            Ok(files) => files,
            Err(e) => return ToolCallResult::error(format!("glob failed: {e}")),
        };

        let mut matches = Vec::new();
        'files: for file in files.into_iter().filter(|p| !Self::is_excluded(p)) {
            // Unreadable files (binary, permissions) are skipped silently.
            let Ok(bytes) = self.fs.read(&file).await else { continue };
            let Ok(content) = String::from_utf8(bytes) else { continue };
            for (line_no, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    let trimmed = line.trim_end();
                    let shown: String = if trimmed.len() > self.config.grep_content_limit {
                        trimmed.chars().take(self.config.grep_content_limit).collect()
                    } else {
                        trimmed.to_string()
                    };
                    matches.push(format!("{}:{}: {}", file.display(), line_no + 1, shown));
                    if matches.len() >= self.config.grep_max_matches {
                        break 'files;
                    }
                }
            }
        }

        if matches.is_empty() {
            ToolCallResult::text("no matches")
        } else {
            ToolCallResult::text(matches.join("\n"))
        }
    }

    /// First-token allow-list plus deny-list screening.
    fn screen_command(command: &str) -> Result<(), String> {
        let first = command.split_whitespace().next().unwrap_or("");
        if !BASH_ALLOW_LIST.contains(&first) {
            return Err(format!("command not allowed: {first}"));
        }
        for pattern in BASH_DENY_PATTERNS {
            if command.contains(pattern) {
                return Err(format!("command rejected by safety policy: {command}"));
            }
        }
        Ok(())
    }

    async fn bash(&self, args: BashArgs) -> ToolCallResult {
        if let Err(reason) = Self::screen_command(&args.command) {
            return ToolCallResult::error(reason);
        }
        let cwd = args
            .cwd
            .map(|c| self.resolve(&c))
            .unwrap_or_else(|| self.workspace_root.clone());
        let timeout = args
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.bash_timeout);

        let output = match self.fs.exec(&args.command, &cwd, timeout).await {
            Ok(output) => output,
            Err(e) => return ToolCallResult::error(format!("exec failed: {e}")),
        };

        let mut combined = output.stdout;
        if !output.stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&output.stderr);
        }
        if combined.len() > self.config.bash_output_limit {
            combined = combined
                .chars()
                .take(self.config.bash_output_limit)
                .collect();
            combined.push_str("\n(output truncated)");
        }

        if output.exit_code != 0 {
            ToolCallResult::error(format!(
                "exit code {}\n{combined}",
                output.exit_code
            ))
        } else {
            ToolCallResult::text(combined)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::{SwarmError, SwarmResult};
    use crate::domain::ports::file_access::{ExecOutput, FileStat};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// In-memory FileAccess that records exec calls.
    struct MockFs {
        files: StdMutex<HashMap<PathBuf, Vec<u8>>>,
        exec_calls: StdMutex<Vec<String>>,
    }

    impl MockFs {
        fn new() -> Self {
            Self {
                files: StdMutex::new(HashMap::new()),
                exec_calls: StdMutex::new(Vec::new()),
            }
        }

        fn seed(&self, path: &str, content: &str) {
            self.files
                .lock()
                .unwrap()
                .insert(PathBuf::from(path), content.as_bytes().to_vec());
        }

        fn exec_count(&self) -> usize {
            self.exec_calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl FileAccess for MockFs {
        async fn read(&self, path: &Path) -> SwarmResult<Vec<u8>> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| SwarmError::ValidationError(format!("no such file: {path:?}")))
        }

        async fn write(&self, path: &Path, contents: &[u8]) -> SwarmResult<()> {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_path_buf(), contents.to_vec());
            Ok(())
        }

        async fn stat(&self, path: &Path) -> SwarmResult<FileStat> {
            let files = self.files.lock().unwrap();
            Ok(FileStat {
                exists: files.contains_key(path),
                is_dir: false,
                size: files.get(path).map(|c| c.len() as u64).unwrap_or(0),
            })
        }

        async fn mkdir_all(&self, _path: &Path) -> SwarmResult<()> {
            Ok(())
        }

        async fn glob(&self, _pattern: &str, _cwd: &Path) -> SwarmResult<Vec<PathBuf>> {
            let mut paths: Vec<PathBuf> =
                self.files.lock().unwrap().keys().cloned().collect();
            paths.sort();
            Ok(paths)
        }

        async fn exec(
            &self,
            command: &str,
            _cwd: &Path,
            _timeout: Duration,
        ) -> SwarmResult<ExecOutput> {
            self.exec_calls.lock().unwrap().push(command.to_string());
            Ok(ExecOutput { stdout: "ok".to_string(), stderr: String::new(), exit_code: 0 })
        }
    }

    fn host() -> (Arc<MockFs>, ToolHost) {
        let fs = Arc::new(MockFs::new());
        let host = ToolHost::new(Arc::clone(&fs) as Arc<dyn FileAccess>, "/ws");
        (fs, host)
    }

    #[tokio::test]
    async fn test_read_file_with_line_range() {
        let (fs, host) = host();
        fs.seed("/ws/src/main.rs", "line1\nline2\nline3\nline4");
        let result = host
            .invoke("read_file", r#"{"path":"src/main.rs","start_line":2,"end_line":3}"#)
            .await;
        assert!(!result.is_error());
        assert_eq!(result.combined_text(), "line2\nline3");
    }

    #[tokio::test]
    async fn test_write_file_emits_create_then_modify() {
        let (_fs, host) = host();
        let created = host
            .invoke("write_file", r#"{"path":"a.txt","content":"hello"}"#)
            .await;
        let change = created.code_change.unwrap();
        assert_eq!(change.kind, CodeChangeKind::Create);
        assert_eq!(change.new_content.as_deref(), Some("hello"));

        let modified = host
            .invoke("write_file", r#"{"path":"a.txt","content":"hi"}"#)
            .await;
        assert_eq!(modified.code_change.unwrap().kind, CodeChangeKind::Modify);
    }

    #[tokio::test]
    async fn test_edit_file_requires_exact_occurrence() {
        let (fs, host) = host();
        fs.seed("/ws/a.txt", "let x = 1;");
        let missing = host
            .invoke("edit_file", r#"{"path":"a.txt","old":"let y","new":"let z"}"#)
            .await;
        assert!(missing.is_error());
        assert!(missing.code_change.is_none());
        // File untouched.
        assert_eq!(fs.files.lock().unwrap()[Path::new("/ws/a.txt")], b"let x = 1;");

        let edited = host
            .invoke("edit_file", r#"{"path":"a.txt","old":"x = 1","new":"x = 2"}"#)
            .await;
        assert!(!edited.is_error());
        assert_eq!(edited.code_change.unwrap().kind, CodeChangeKind::Modify);
        assert_eq!(fs.files.lock().unwrap()[Path::new("/ws/a.txt")], b"let x = 2;");
    }

    #[tokio::test]
    async fn test_glob_excludes_and_truncates() {
        let (fs, host) = host();
        fs.seed("/ws/src/a.rs", "");
        fs.seed("/ws/node_modules/dep/index.js", "");
        fs.seed("/ws/.git/config", "");
        let result = host.invoke("glob", r#"{"pattern":"**/*"}"#).await;
        let text = result.combined_text();
        assert!(text.contains("src/a.rs"));
        assert!(!text.contains("node_modules"));
        assert!(!text.contains(".git"));
    }

    #[tokio::test]
    async fn test_grep_matches_with_limits() {
        let (fs, host) = host();
        fs.seed("/ws/a.rs", "fn alpha() {}\nfn beta() {}");
        fs.seed("/ws/b.rs", "fn gamma() {}");
        let result = host
            .invoke("grep", r#"{"pattern":"fn \\w+","case_insensitive":false}"#)
            .await;
        let text = result.combined_text();
        assert!(text.contains("/ws/a.rs:1: fn alpha() {}"));
        assert!(text.contains("/ws/b.rs:1: fn gamma() {}"));
    }

    #[tokio::test]
    async fn test_bash_denies_dangerous_commands_without_spawn() {
        let (fs, host) = host();
        for command in [
            r#"{"command":"rm -rf /"}"#,
            r#"{"command":"rm -rf ~"}"#,
            r#"{"command":"dd if=/dev/zero of=/dev/sda"}"#,
            r#"{"command":"mkfs.ext4 /dev/sda1"}"#,
        ] {
            let result = host.invoke("bash", command).await;
            assert!(result.is_error(), "expected denial for {command}");
        }
        // No subprocess was ever spawned.
        assert_eq!(fs.exec_count(), 0);
    }

    #[tokio::test]
    async fn test_bash_denies_unlisted_commands() {
        let (fs, host) = host();
        let result = host.invoke("bash", r#"{"command":"curl http://evil"}"#).await;
        assert!(result.is_error());
        assert_eq!(fs.exec_count(), 0);
    }

    #[tokio::test]
    async fn test_bash_runs_allowed_command() {
        let (fs, host) = host();
        let result = host.invoke("bash", r#"{"command":"ls -la"}"#).await;
        assert!(!result.is_error());
        assert_eq!(result.combined_text(), "ok");
        assert_eq!(fs.exec_count(), 1);
    }

    #[tokio::test]
    async fn test_task_complete_signals_completion() {
        let (_fs, host) = host();
        let result = host
            .invoke(
                "task_complete",
                r#"{"summary":"done","files_changed":["a.rs"],"notes":"all tests pass"}"#,
            )
            .await;
        let completion = result.completion.unwrap();
        assert_eq!(completion.summary, "done");
        assert_eq!(completion.files_changed, vec!["a.rs".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error() {
        let (_fs, host) = host();
        let result = host.invoke("teleport", "{}").await;
        assert!(result.is_error());
    }

    #[test]
    fn test_schemas_respect_allow_list() {
        let fs = Arc::new(MockFs::new());
        let host = ToolHost::new(fs as Arc<dyn FileAccess>, "/ws");
        let schemas = host.schemas_for(&["read_file", "task_complete", "not_a_tool"]);
        let names: Vec<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["read_file", "task_complete"]);
    }

    #[test]
    fn test_screen_command_fork_bomb() {
        // The fork bomb never reaches the allow-list stage anyway, but the
        // deny pattern must also catch it when smuggled behind echo.
        assert!(ToolHost::screen_command("echo :(){ :|:& };:").is_err());
    }
}
