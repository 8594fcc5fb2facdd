use crate::AgentContext;
use crate::intent::IntentResult;
use ollamacode_core::{IntentKind, Registry, RegistryError};
use ollamacode_llm::BackendError;
use ollamacode_observe::EventKind;
use ollamacode_policy::{Action, Decision, PolicyError};
use ollamacode_router::RouterError;
use ollamacode_tools::ToolResult;
use std::sync::Arc;

mod command;
mod files;
mod git;
mod project;
mod question;
mod search;

pub use command::ExecuteCommandHandler;
pub use files::{ReadFileHandler, WriteFileHandler};
pub use git::GitHandler;
pub use project::AnalyzeProjectHandler;
pub use question::QuestionHandler;
pub use search::{SearchCodeHandler, WebSearchHandler};

const DANGER_WARNING: &str =
    "This command matches a destructive pattern and may not be reversible.";
const DECLINED: &str = "🚫 Operation cancelled by user.";

/// What a handler produced. `streamed` text has already reached the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub streamed: bool,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            streamed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HandlerError {
    #[error("missing required parameter '{0}'")]
    MissingParameter(&'static str),
    #[error("{0}")]
    InvalidParameter(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },
    #[error("{0}")]
    Timeout(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("web search failed: {0}")]
    WebSearch(String),
    #[error("confirmation prompt failed: {0}")]
    Prompt(String),
}

impl From<PolicyError> for HandlerError {
    fn from(err: PolicyError) -> Self {
        Self::InvalidParameter(err.to_string())
    }
}

impl HandlerError {
    /// The line shown to the user, tagged by category.
    pub fn user_message(&self) -> String {
        match self {
            Self::Cancelled | Self::Backend(BackendError::Canceled) | Self::Prompt(_) => {
                format!("🚫 {self}")
            }
            Self::Timeout(_) => format!("⏱️ {self}"),
            Self::Backend(_) | Self::Router(_) | Self::WebSearch(_) => {
                format!("⚠️ Backend error: {self}")
            }
            Self::MissingParameter(_)
            | Self::InvalidParameter(_)
            | Self::Registry(_)
            | Self::Tool { .. } => format!("🔧 {self}"),
        }
    }
}

/// Serves one intent kind.
pub trait Handler: Send + Sync {
    fn handle(
        &self,
        ctx: &AgentContext,
        intent: &IntentResult,
        message: &str,
    ) -> Result<Reply, HandlerError>;
}

/// Handlers keyed by intent. Kinds without a handler go to the default.
pub struct HandlerRegistry {
    handlers: Registry<dyn Handler>,
    default: Arc<dyn Handler>,
}

impl HandlerRegistry {
    pub fn new(default: Arc<dyn Handler>) -> Self {
        Self {
            handlers: Registry::new("handler"),
            default,
        }
    }

    /// One handler per intent kind, with questions as the default.
    pub fn with_defaults() -> Result<Self, RegistryError> {
        let question: Arc<dyn Handler> = Arc::new(QuestionHandler);
        let registry = Self::new(Arc::clone(&question));
        registry.register(IntentKind::ReadFile, Arc::new(ReadFileHandler))?;
        registry.register(IntentKind::WriteFile, Arc::new(WriteFileHandler))?;
        registry.register(IntentKind::ExecuteCommand, Arc::new(ExecuteCommandHandler))?;
        registry.register(IntentKind::SearchCode, Arc::new(SearchCodeHandler))?;
        registry.register(IntentKind::AnalyzeProject, Arc::new(AnalyzeProjectHandler))?;
        registry.register(IntentKind::GitOperation, Arc::new(GitHandler))?;
        registry.register(IntentKind::WebSearch, Arc::new(WebSearchHandler))?;
        registry.register(IntentKind::Question, question)?;
        Ok(registry)
    }

    pub fn register(&self, kind: IntentKind, handler: Arc<dyn Handler>) -> Result<(), RegistryError> {
        self.handlers.register(kind.as_str(), handler)
    }

    pub fn get(&self, kind: IntentKind) -> Arc<dyn Handler> {
        self.handlers
            .get(kind.as_str())
            .unwrap_or_else(|| Arc::clone(&self.default))
    }

    pub fn contains(&self, kind: IntentKind) -> bool {
        self.handlers.contains(kind.as_str())
    }
}

// ── Shared handler plumbing ───────────────────────────────────────────────

pub(crate) enum Prompt<'a> {
    Confirm { action: &'a str, details: &'a str },
    Preview { action: &'a str, preview: &'a str },
}

pub(crate) enum Clearance {
    Proceed,
    /// Refused or declined; the reply says which.
    Stop(Reply),
}

/// Applies the mode matrix and, when it asks for one, the confirmation
/// prompt.
pub(crate) fn authorize(
    ctx: &AgentContext,
    action: Action,
    prompt: Prompt<'_>,
) -> Result<Clearance, HandlerError> {
    let answer = match (ctx.policy.decide(action), prompt) {
        (Decision::Allow, _) => return Ok(Clearance::Proceed),
        (Decision::Refuse, _) => {
            return Ok(Clearance::Stop(Reply::text(ctx.policy.refusal_message())));
        }
        (Decision::ConfirmStrict, Prompt::Confirm { action, details })
        | (Decision::ConfirmStrict, Prompt::Preview { action, preview: details }) => ctx
            .gate
            .confirm_dangerous_action(&format!("{action}: {details}"), DANGER_WARNING),
        (Decision::Confirm, Prompt::Confirm { action, details }) => {
            ctx.gate.confirm(action, details)
        }
        (Decision::Confirm, Prompt::Preview { action, preview }) => {
            ctx.gate.confirm_with_preview(action, preview)
        }
    };
    match answer {
        Ok(true) => Ok(Clearance::Proceed),
        Ok(false) => Ok(Clearance::Stop(Reply::text(DECLINED))),
        Err(err) => Err(HandlerError::Prompt(err.to_string())),
    }
}

/// Runs a registered tool and records the call.
pub(crate) fn run_tool(
    ctx: &AgentContext,
    name: &str,
    params: &serde_json::Value,
) -> Result<ToolResult, HandlerError> {
    let result = ctx.tools.execute(name, &ctx.tool_context(), params)?;
    ctx.observer.emit(EventKind::ToolInvoked {
        tool: name.to_string(),
        success: result.success,
    });
    ctx.observer.verbose_log(&format!(
        "tool {name} -> {}",
        if result.success { "ok" } else { result.error.as_str() }
    ));
    Ok(result)
}

pub(crate) fn tool_failure(name: &str, result: &ToolResult) -> HandlerError {
    HandlerError::Tool {
        tool: name.to_string(),
        message: result.error.clone(),
    }
}

/// At most `max` lines, with a count of what was cut.
pub(crate) fn clip_lines(text: &str, max: usize) -> String {
    let lines = text.lines().collect::<Vec<_>>();
    if lines.len() <= max {
        return text.trim_end().to_string();
    }
    format!(
        "{}\n... ({} more lines)",
        lines[..max].join("\n"),
        lines.len() - max
    )
}
