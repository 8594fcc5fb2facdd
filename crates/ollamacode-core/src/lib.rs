use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod cancel;
mod config;
mod registry;

pub use cancel::{CancelCause, CancellationToken};
pub use config::{
    AgentConfig, AppConfig, ConfigError, LlmConfig, RouterConfig, SearchConfig, SkillsConfig,
    SubagentsConfig, merge_json_value,
};
pub use registry::{Registry, RegistryError};

pub type Result<T> = anyhow::Result<T>;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "qwen2.5-coder:7b";
pub const SMALL_MODEL: &str = "qwen2.5-coder:1.5b";
pub const LARGE_MODEL: &str = "qwen2.5-coder:14b";

pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".ollama-code")
}

/// Per-user runtime directory (`~/.ollama-code`), if a home directory is known.
pub fn user_runtime_dir() -> Option<PathBuf> {
    let home = std::env::var("HOME")
        .ok()
        .or_else(|| std::env::var("USERPROFILE").ok())?;
    Some(Path::new(&home).join(".ollama-code"))
}

// ── Conversation ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ── Operating mode ────────────────────────────────────────────────────────

/// Safety mode for a session. Controls whether side-effecting actions run,
/// ask first, or are refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    ReadOnly,
    #[default]
    Interactive,
    Autonomous,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::ReadOnly, Mode::Interactive, Mode::Autonomous];

    pub fn allows_writes(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }

    pub fn requires_confirmation(self) -> bool {
        matches!(self, Self::Interactive)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read-only"),
            Self::Interactive => write!(f, "interactive"),
            Self::Autonomous => write!(f, "autonomous"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read-only" | "readonly" | "read_only" | "ro" => Ok(Self::ReadOnly),
            "interactive" => Ok(Self::Interactive),
            "autonomous" | "auto" => Ok(Self::Autonomous),
            other => Err(anyhow::anyhow!(
                "invalid mode '{}' (expected read-only|interactive|autonomous)",
                other
            )),
        }
    }
}

// ── Intents ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    ReadFile,
    WriteFile,
    ExecuteCommand,
    SearchCode,
    AnalyzeProject,
    GitOperation,
    WebSearch,
    Question,
}

impl IntentKind {
    pub const ALL: [IntentKind; 8] = [
        IntentKind::ReadFile,
        IntentKind::WriteFile,
        IntentKind::ExecuteCommand,
        IntentKind::SearchCode,
        IntentKind::AnalyzeProject,
        IntentKind::GitOperation,
        IntentKind::WebSearch,
        IntentKind::Question,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::ExecuteCommand => "execute_command",
            Self::SearchCode => "search_code",
            Self::AnalyzeProject => "analyze_project",
            Self::GitOperation => "git_operation",
            Self::WebSearch => "web_search",
            Self::Question => "question",
        }
    }
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IntentKind {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // Models emit snake_case, camelCase and kebab-case interchangeably.
        let key = s
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "readfile" => Ok(Self::ReadFile),
            "writefile" => Ok(Self::WriteFile),
            "executecommand" => Ok(Self::ExecuteCommand),
            "searchcode" => Ok(Self::SearchCode),
            "analyzeproject" => Ok(Self::AnalyzeProject),
            "gitoperation" => Ok(Self::GitOperation),
            "websearch" => Ok(Self::WebSearch),
            "question" => Ok(Self::Question),
            _ => Err(anyhow::anyhow!("unknown intent '{}'", s.trim())),
        }
    }
}

// ── Task classes and model specs ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskClass {
    Intent,
    Code,
    Search,
    Analysis,
    Default,
}

impl TaskClass {
    pub const ALL: [TaskClass; 5] = [
        TaskClass::Intent,
        TaskClass::Code,
        TaskClass::Search,
        TaskClass::Analysis,
        TaskClass::Default,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intent => "intent",
            Self::Code => "code",
            Self::Search => "search",
            Self::Analysis => "analysis",
            Self::Default => "default",
        }
    }
}

impl std::fmt::Display for TaskClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskClass {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "intent" => Ok(Self::Intent),
            "code" => Ok(Self::Code),
            "search" => Ok(Self::Search),
            "analysis" => Ok(Self::Analysis),
            "default" => Ok(Self::Default),
            other => Err(anyhow::anyhow!(
                "invalid task class '{}' (expected intent|code|search|analysis|default)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(default)]
    pub description: String,
}

impl ModelSpec {
    pub fn new(
        name: impl Into<String>,
        max_tokens: u32,
        temperature: f32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            max_tokens,
            temperature,
            description: description.into(),
        }
    }
}
