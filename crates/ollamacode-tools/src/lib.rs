use ignore::WalkBuilder;
use ollamacode_core::{CancellationToken, Registry, RegistryError};
use ollamacode_policy::resolve_workspace_path;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod command;
mod fs;
mod git;
mod project;
mod search;
pub mod shell;
pub mod web;

pub use command::CommandExecutorTool;
pub use fs::{FileReaderTool, FileWriterTool};
pub use git::{GitDetails, GitOperation, GitOutput, GitTool};
pub use project::{ProjectAnalyzerTool, ProjectReport, ProjectStats, ReportKind};
pub use search::{CodeSearcherTool, SearchBackend, SearchMatch, SearchOutput};
pub use shell::{PlatformShellRunner, ShellRunResult, ShellRunner};
pub use web::{DuckDuckGoSearcher, WebResult, WebSearcher};

pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";
pub const EXECUTE_COMMAND: &str = "execute_command";
pub const SEARCH_CODE: &str = "search_code";
pub const ANALYZE_PROJECT: &str = "analyze_project";
pub const GIT: &str = "git";

/// Per-call environment handed to every tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub work_dir: PathBuf,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolve a user-supplied path inside the working directory.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, ToolResult> {
        resolve_workspace_path(&self.work_dir, raw)
            .map_err(|err| ToolResult::failure(err.to_string()))
    }

    /// `path` relative to the working directory, with forward slashes.
    pub fn display_path(&self, path: &Path) -> String {
        let base = resolve_workspace_path(&self.work_dir, ".").unwrap_or_default();
        let rel = path.strip_prefix(&base).unwrap_or(path);
        normalize_rel_path(rel)
    }
}

// ── Results ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Create,
    Append,
    Replace,
}

impl std::fmt::Display for WriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Append => write!(f, "append"),
            Self::Replace => write!(f, "replace"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileContent {
    Text {
        content: String,
        size: u64,
        sha256: String,
    },
    Image {
        base64: String,
        mime_type: String,
        size: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteOutcome {
    pub path: String,
    pub size: u64,
    pub mode: WriteMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacements: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutput {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub timed_out: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub enum ToolData {
    #[default]
    None,
    File(FileContent),
    Write(WriteOutcome),
    Command(CommandOutput),
    Search(SearchOutput),
    Project(ProjectReport),
    Git(GitOutput),
}

/// Outcome of one tool call. `error` is empty exactly when `success` is true.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub success: bool,
    pub data: ToolData,
    pub message: String,
    pub error: String,
}

impl ToolResult {
    pub fn ok(data: ToolData, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            message: message.into(),
            error: String::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::failure_with(ToolData::None, error)
    }

    /// A failed call that still carries partial output, e.g. a non-zero exit.
    pub fn failure_with(data: ToolData, error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "tool failed without an error message".to_string();
        }
        Self {
            success: false,
            data,
            message: String::new(),
            error,
        }
    }
}

// ── Tool contract ─────────────────────────────────────────────────────────

pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn requires_confirmation(&self) -> bool;
    /// Whether these parameters need the strict confirmation prompt.
    fn is_dangerous(&self, _params: &serde_json::Value) -> bool {
        false
    }
    /// `params` is untrusted: bad input yields a failed result, never a panic.
    fn execute(&self, ctx: &ToolContext, params: &serde_json::Value) -> ToolResult;
}

/// Decode a tool's parameter struct from the raw map.
pub(crate) fn parse_params<T: DeserializeOwned>(
    tool: &str,
    params: &serde_json::Value,
) -> Result<T, ToolResult> {
    serde_json::from_value(params.clone())
        .map_err(|err| ToolResult::failure(format!("invalid parameters for {tool}: {err}")))
}

pub struct ToolRegistry {
    tools: Registry<dyn Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Registry::new("tool"),
        }
    }

    /// The six built-in tools. A name clash here is a programming error and
    /// is reported to the caller, which aborts startup.
    pub fn with_defaults() -> Result<Self, RegistryError> {
        Self::with_settings(120, 100)
    }

    /// Built-in tools with a command timeout and a search result cap.
    pub fn with_settings(
        command_timeout_secs: u64,
        max_search_results: usize,
    ) -> Result<Self, RegistryError> {
        let registry = Self::new();
        registry.register(Arc::new(FileReaderTool))?;
        registry.register(Arc::new(FileWriterTool))?;
        registry.register(Arc::new(CommandExecutorTool::new(
            Arc::new(PlatformShellRunner),
            command_timeout_secs,
        )))?;
        registry.register(Arc::new(CodeSearcherTool::new(max_search_results)))?;
        registry.register(Arc::new(ProjectAnalyzerTool))?;
        registry.register(Arc::new(GitTool))?;
        Ok(registry)
    }

    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        self.tools.register(tool.name().to_string(), tool)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>, RegistryError> {
        self.tools.require(name)
    }

    pub fn list(&self) -> Vec<Arc<dyn Tool>> {
        self.tools
            .entries()
            .into_iter()
            .map(|(_, tool)| tool)
            .collect()
    }

    pub fn execute(
        &self,
        name: &str,
        ctx: &ToolContext,
        params: &serde_json::Value,
    ) -> Result<ToolResult, RegistryError> {
        Ok(self.get(name)?.execute(ctx, params))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────

pub(crate) fn should_skip_rel_path(path: &Path) -> bool {
    path.components().any(|c| {
        let name = c.as_os_str();
        name == ".git" || name == ".ollama-code" || name == "target" || name == "node_modules"
    })
}

/// Files and directories under `root`, honouring ignore files, minus VCS and
/// build output. `max_depth` counts from `root`.
pub(crate) fn walk_paths(root: &Path, max_depth: Option<usize>) -> Vec<(PathBuf, usize, bool)> {
    let mut builder = WalkBuilder::new(root);
    builder.hidden(false);
    builder.follow_links(false);
    builder.require_git(false);
    builder.max_depth(max_depth);
    builder.sort_by_file_name(|a, b| a.cmp(b));

    let mut paths = Vec::new();
    for entry in builder.build() {
        let Ok(entry) = entry else {
            continue;
        };
        if entry.depth() == 0 {
            continue;
        }
        let path = entry.path();
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        if should_skip_rel_path(rel) {
            continue;
        }
        let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
        paths.push((path.to_path_buf(), entry.depth(), is_dir));
    }
    paths
}

pub(crate) fn normalize_rel_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

pub(crate) fn is_binary(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    if bytes.contains(&0) {
        return true;
    }
    let sample = &bytes[..bytes.len().min(8192)];
    let non_ascii = sample.iter().filter(|b| !b.is_ascii()).count();
    std::str::from_utf8(bytes).is_err() && non_ascii * 3 > sample.len()
}

pub(crate) fn guess_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
        .as_str()
    {
        "md" => "text/markdown",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "pdf" => "application/pdf",
        _ => "text/plain",
    }
}
