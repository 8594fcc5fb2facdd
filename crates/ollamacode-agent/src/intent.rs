use ollamacode_core::{CancellationToken, IntentKind, Message, TaskClass};
use ollamacode_llm::{BackendError, ChatOptions};
use ollamacode_router::{ModelRouter, RouterError};
use ollamacode_tools::WriteMode;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

const INTENT_SYSTEM_PROMPT: &str = r#"You classify requests for a local coding assistant.
Reply with one JSON object and nothing else:
{"intent": "<intent>", "parameters": {...}, "confidence": <number between 0 and 1>}

Intents and their parameters:
- read_file: {"file_path": string}
- write_file: {"file_path": string, "content": string, "mode": "create"|"append"|"replace", "old_text": string, "new_text": string}
- execute_command: {"command": string}
- search_code: {"query": string, "file_pattern": string}
- analyze_project: {}
- git_operation: {"operation": "status"|"diff"|"log"|"add"|"commit"|"branch", "files": [string], "message": string, "name": string}
- web_search: {"query": string}
- question: {}

Use question when nothing else fits. Paths are relative to the working directory."#;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IntentError {
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("classifier reply contains no JSON object")]
    NoJson,
    #[error("classifier reply is not valid JSON: {0}")]
    Malformed(String),
    #[error("classifier returned unknown intent '{0}'")]
    UnknownIntent(String),
    #[error("classifier confidence {0} is outside [0, 1]")]
    Confidence(f64),
}

/// A classified utterance. `parameters` keeps the raw keys the model sent;
/// handlers read them through [`IntentResult::params`].
#[derive(Debug, Clone, PartialEq)]
pub struct IntentResult {
    pub intent: IntentKind,
    pub parameters: Map<String, Value>,
    pub confidence: f64,
}

impl IntentResult {
    pub fn new(intent: IntentKind, parameters: Map<String, Value>, confidence: f64) -> Self {
        Self {
            intent,
            parameters,
            confidence,
        }
    }

    /// Used whenever classification fails.
    pub fn fallback() -> Self {
        Self::new(IntentKind::Question, Map::new(), 0.0)
    }

    pub fn params(&self) -> IntentParams {
        let p = &self.parameters;
        match self.intent {
            IntentKind::ReadFile => IntentParams::ReadFile {
                file_path: file_path_param(p),
            },
            IntentKind::WriteFile => IntentParams::WriteFile(WriteParams::from_map(p)),
            IntentKind::ExecuteCommand => IntentParams::ExecuteCommand {
                command: str_param(p, "command"),
            },
            IntentKind::SearchCode => IntentParams::SearchCode {
                query: str_param(p, "query"),
                file_pattern: str_param(p, "file_pattern"),
            },
            IntentKind::AnalyzeProject => IntentParams::AnalyzeProject,
            IntentKind::GitOperation => IntentParams::GitOperation {
                operation: str_param(p, "operation"),
                message: str_param(p, "message"),
            },
            IntentKind::WebSearch => IntentParams::WebSearch {
                query: str_param(p, "query"),
            },
            IntentKind::Question => IntentParams::Question,
        }
    }

    /// The file a read or write intent refers to, if any.
    pub fn file_path(&self) -> Option<String> {
        match self.intent {
            IntentKind::ReadFile | IntentKind::WriteFile => file_path_param(&self.parameters),
            _ => None,
        }
    }
}

/// Per-intent parameters. Missing or mistyped keys come through as `None`
/// so the handler can say which one is absent.
#[derive(Debug, Clone, PartialEq)]
pub enum IntentParams {
    ReadFile {
        file_path: Option<String>,
    },
    WriteFile(WriteParams),
    ExecuteCommand {
        command: Option<String>,
    },
    SearchCode {
        query: Option<String>,
        file_pattern: Option<String>,
    },
    AnalyzeProject,
    GitOperation {
        operation: Option<String>,
        message: Option<String>,
    },
    WebSearch {
        query: Option<String>,
    },
    Question,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteParams {
    pub file_path: Option<String>,
    pub content: Option<String>,
    pub mode: WriteMode,
    pub old_text: Option<String>,
    pub new_text: Option<String>,
}

impl WriteParams {
    pub fn from_map(p: &Map<String, Value>) -> Self {
        Self {
            file_path: file_path_param(p),
            // Content may legitimately be whitespace or empty.
            content: p.get("content").and_then(Value::as_str).map(str::to_string),
            mode: p
                .get("mode")
                .and_then(|m| serde_json::from_value(m.clone()).ok())
                .unwrap_or_default(),
            old_text: p.get("old_text").and_then(Value::as_str).map(str::to_string),
            new_text: p.get("new_text").and_then(Value::as_str).map(str::to_string),
        }
    }

    /// Fill gaps from a second source, keeping what is already set.
    pub fn merge_missing(&mut self, other: WriteParams) {
        if self.file_path.is_none() {
            self.file_path = other.file_path;
        }
        if self.content.is_none() {
            self.content = other.content;
            if self.mode == WriteMode::default() {
                self.mode = other.mode;
            }
        }
        if self.old_text.is_none() {
            self.old_text = other.old_text;
        }
        if self.new_text.is_none() {
            self.new_text = other.new_text;
        }
    }

    /// First key the chosen mode needs but does not have.
    pub fn missing_key(&self) -> Option<&'static str> {
        if self.file_path.is_none() {
            return Some("file_path");
        }
        match self.mode {
            WriteMode::Create | WriteMode::Append if self.content.is_none() => Some("content"),
            WriteMode::Replace if self.old_text.is_none() => Some("old_text"),
            WriteMode::Replace if self.new_text.is_none() => Some("new_text"),
            _ => None,
        }
    }

    pub fn to_tool_params(&self) -> Value {
        let mut map = Map::new();
        if let Some(path) = &self.file_path {
            map.insert("file_path".into(), Value::String(path.clone()));
        }
        map.insert("mode".into(), Value::String(self.mode.to_string()));
        for (key, value) in [
            ("content", &self.content),
            ("old_text", &self.old_text),
            ("new_text", &self.new_text),
        ] {
            if let Some(value) = value {
                map.insert(key.into(), Value::String(value.clone()));
            }
        }
        Value::Object(map)
    }
}

pub(crate) fn str_param(p: &Map<String, Value>, key: &str) -> Option<String> {
    p.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn file_path_param(p: &Map<String, Value>) -> Option<String> {
    str_param(p, "file_path").or_else(|| str_param(p, "path"))
}

/// The span from the first `{` to the last `}`. Models like to wrap JSON in
/// prose or code fences.
pub(crate) fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[derive(Debug, Deserialize)]
struct RawIntent {
    intent: String,
    #[serde(default)]
    parameters: Value,
    confidence: Option<f64>,
}

/// Parse and validate a classifier reply.
pub fn parse_intent_reply(reply: &str) -> Result<IntentResult, IntentError> {
    let json = extract_json_object(reply).ok_or(IntentError::NoJson)?;
    let raw: RawIntent =
        serde_json::from_str(json).map_err(|err| IntentError::Malformed(err.to_string()))?;
    let intent = IntentKind::from_str(&raw.intent)
        .map_err(|_| IntentError::UnknownIntent(raw.intent.clone()))?;
    let confidence = raw.confidence.unwrap_or(f64::NAN);
    if !(0.0..=1.0).contains(&confidence) {
        return Err(IntentError::Confidence(confidence));
    }
    let parameters = match raw.parameters {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Ok(IntentResult::new(intent, parameters, confidence))
}

/// Classifies each utterance with one call to the intent-class model.
pub struct IntentDetector {
    router: Arc<ModelRouter>,
}

impl IntentDetector {
    pub fn new(router: Arc<ModelRouter>) -> Self {
        Self { router }
    }

    pub fn classify(
        &self,
        message: &str,
        work_dir: &Path,
        recent_files: &[String],
        cancel: &CancellationToken,
    ) -> Result<IntentResult, IntentError> {
        let client = self.router.get_client(TaskClass::Intent)?;
        let options = self
            .router
            .options_for(TaskClass::Intent)
            .unwrap_or_else(|_| ChatOptions::default())
            .with_system_prompt(INTENT_SYSTEM_PROMPT);
        let messages = [Message::user(render_request(message, work_dir, recent_files))];
        let reply = client.complete(&messages, &options, cancel)?;
        parse_intent_reply(&reply)
    }
}

fn render_request(message: &str, work_dir: &Path, recent_files: &[String]) -> String {
    let recent = if recent_files.is_empty() {
        "none".to_string()
    } else {
        recent_files.join(", ")
    };
    format!(
        "Working directory: {}\nRecently used files: {recent}\n\nMessage: {}",
        work_dir.display(),
        message.trim()
    )
}
