use anyhow::Result;
use chrono::{DateTime, Utc};
use ollamacode_core::runtime_dir;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum EventKind {
    TurnStarted {
        chars: usize,
    },
    IntentDetected {
        intent: String,
        confidence: f32,
    },
    HandlerFinished {
        intent: String,
        ok: bool,
    },
    ToolInvoked {
        tool: String,
        success: bool,
    },
    SubagentSpawned {
        id: Uuid,
        kind: String,
    },
    SubagentFinished {
        id: Uuid,
        status: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub seq_no: u64,
    pub at: DateTime<Utc>,
    pub session_id: Uuid,
    pub kind: EventKind,
}

/// Append-only event log under the workspace runtime dir, plus stderr
/// logging for warnings and verbose traces.
pub struct Observer {
    log_path: Option<PathBuf>,
    session_id: Uuid,
    seq: AtomicU64,
    verbose: bool,
}

impl Observer {
    pub fn new(workspace: &Path) -> Result<Self> {
        let dir = runtime_dir(workspace);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            log_path: Some(dir.join("observe.log")),
            session_id: Uuid::now_v7(),
            seq: AtomicU64::new(0),
            verbose: false,
        })
    }

    /// An observer that never touches disk. Warnings still go to stderr.
    pub fn detached() -> Self {
        Self {
            log_path: None,
            session_id: Uuid::now_v7(),
            seq: AtomicU64::new(0),
            verbose: false,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub fn record(&self, kind: EventKind) -> Result<EventEnvelope> {
        let event = EventEnvelope {
            seq_no: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            at: Utc::now(),
            session_id: self.session_id,
            kind,
        };
        self.append_log_line(&format!(
            "{} EVENT {}",
            event.at.to_rfc3339(),
            serde_json::to_string(&event)?
        ))?;
        Ok(event)
    }

    /// Like `record`, but a failed write becomes a warning instead of an error.
    pub fn emit(&self, kind: EventKind) {
        if let Err(err) = self.record(kind) {
            self.warn_log(&format!("failed to record event: {err}"));
        }
    }

    /// Enable or disable verbose logging to stderr.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Log a message to stderr with `[ollama-code]` prefix when verbose mode is on.
    pub fn verbose_log(&self, msg: &str) {
        if self.verbose {
            eprintln!("[ollama-code] {msg}");
        }
    }

    /// Log a warning to stderr and, when attached, to the log file.
    pub fn warn_log(&self, msg: &str) {
        eprintln!("[ollama-code WARN] {msg}");
        let _ = self.append_log_line(&format!("{} WARN {msg}", Utc::now().to_rfc3339()));
    }

    fn append_log_line(&self, line: &str) -> Result<()> {
        let Some(path) = &self.log_path else {
            return Ok(());
        };
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}
