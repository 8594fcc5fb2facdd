use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiffError {
    #[error("invalid edit range: {0}")]
    InvalidRange(String),
    #[error("no edit history for {0}")]
    NoEditHistory(String),
}

// ── Data model ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Delete,
    Modify,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub kind: ChangeKind,
    pub start_line: usize,
    pub end_line: usize,
    pub old_text: String,
    pub new_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDiff {
    pub file_path: String,
    pub old_content: String,
    pub new_content: String,
    pub changes: Vec<Change>,
    pub timestamp: DateTime<Utc>,
}

impl FileDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// `-`/`+` rendering of the changed lines, one hunk header per change.
    pub fn render_unified(&self) -> String {
        let mut out = format!("--- a/{}\n+++ b/{}\n", self.file_path, self.file_path);
        for change in &self.changes {
            out.push_str(&format!("@@ line {} @@\n", change.start_line));
            if matches!(change.kind, ChangeKind::Delete | ChangeKind::Modify) {
                out.push_str(&format!("-{}\n", change.old_text));
            }
            if matches!(change.kind, ChangeKind::Add | ChangeKind::Modify) {
                out.push_str(&format!("+{}\n", change.new_text));
            }
        }
        out
    }
}

/// 1-based, inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRange {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl EditRange {
    pub fn new(start: usize, end: usize, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditHistory {
    pub id: Uuid,
    pub file_path: String,
    pub previous_content: String,
    pub new_content: String,
    pub range: EditRange,
    pub timestamp: DateTime<Utc>,
}

/// Parses a `start:end` literal. Both bounds must be positive and
/// `start <= end`.
pub fn parse_range(raw: &str) -> Result<(usize, usize), DiffError> {
    let raw = raw.trim();
    let (start, end) = raw
        .split_once(':')
        .ok_or_else(|| DiffError::InvalidRange(format!("expected start:end, got '{raw}'")))?;
    let parse = |part: &str| {
        let part = part.trim();
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DiffError::InvalidRange(format!(
                "'{part}' is not a positive line number"
            )));
        }
        part.parse::<usize>()
            .map_err(|err| DiffError::InvalidRange(format!("'{part}': {err}")))
    };
    let (start, end) = (parse(start)?, parse(end)?);
    if start == 0 || end == 0 {
        return Err(DiffError::InvalidRange(
            "line numbers start at 1".to_string(),
        ));
    }
    if start > end {
        return Err(DiffError::InvalidRange(format!(
            "start {start} is after end {end}"
        )));
    }
    Ok((start, end))
}

// ── Engine ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct DiffEngine {
    history: Mutex<HashMap<String, Vec<EditHistory>>>,
}

impl DiffEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Line-by-line comparison at equal indices. Identical inputs produce no
    /// changes.
    pub fn compute_diff(&self, file_path: &str, old: &str, new: &str) -> FileDiff {
        let old_lines = old.split('\n').collect::<Vec<_>>();
        let new_lines = new.split('\n').collect::<Vec<_>>();
        let mut changes = Vec::new();
        for idx in 0..old_lines.len().max(new_lines.len()) {
            let line = idx + 1;
            let change = match (old_lines.get(idx), new_lines.get(idx)) {
                (Some(old), Some(new)) if old == new => continue,
                (Some(old), Some(new)) => Change {
                    kind: ChangeKind::Modify,
                    start_line: line,
                    end_line: line,
                    old_text: (*old).to_string(),
                    new_text: (*new).to_string(),
                },
                (Some(old), None) => Change {
                    kind: ChangeKind::Delete,
                    start_line: line,
                    end_line: line,
                    old_text: (*old).to_string(),
                    new_text: String::new(),
                },
                (None, Some(new)) => Change {
                    kind: ChangeKind::Add,
                    start_line: line,
                    end_line: line,
                    old_text: String::new(),
                    new_text: (*new).to_string(),
                },
                (None, None) => continue,
            };
            changes.push(change);
        }
        FileDiff {
            file_path: file_path.to_string(),
            old_content: old.to_string(),
            new_content: new.to_string(),
            changes,
            timestamp: Utc::now(),
        }
    }

    /// The content and diff `range` would produce, without touching the
    /// undo history.
    pub fn preview_edit(
        &self,
        file_path: &str,
        content: &str,
        range: &EditRange,
    ) -> Result<(String, FileDiff), DiffError> {
        let lines = content.split('\n').collect::<Vec<_>>();
        let len = lines.len();
        if range.start < 1 || range.start > len {
            return Err(DiffError::InvalidRange(format!(
                "start {} is outside 1..={len}",
                range.start
            )));
        }
        if range.end < range.start || range.end > len {
            return Err(DiffError::InvalidRange(format!(
                "end {} is outside {}..={len}",
                range.end, range.start
            )));
        }

        let mut next = Vec::with_capacity(len);
        next.extend_from_slice(&lines[..range.start - 1]);
        next.extend(range.text.split('\n'));
        next.extend_from_slice(&lines[range.end..]);
        let new_content = next.join("\n");

        let diff = self.compute_diff(file_path, content, &new_content);
        Ok((new_content, diff))
    }

    /// Replaces lines `range.start..=range.end` with `range.text` and records
    /// the prior content for [`DiffEngine::rollback`].
    pub fn apply_edit(
        &self,
        file_path: &str,
        content: &str,
        range: &EditRange,
    ) -> Result<(String, FileDiff), DiffError> {
        let (new_content, diff) = self.preview_edit(file_path, content, range)?;
        let entry = EditHistory {
            id: Uuid::now_v7(),
            file_path: file_path.to_string(),
            previous_content: content.to_string(),
            new_content: new_content.clone(),
            range: range.clone(),
            timestamp: diff.timestamp,
        };
        self.history()
            .entry(file_path.to_string())
            .or_default()
            .push(entry);
        Ok((new_content, diff))
    }

    /// Pops the latest edit of `file_path` and returns the content before it.
    pub fn rollback(&self, file_path: &str) -> Result<String, DiffError> {
        let mut history = self.history();
        let entry = history
            .get_mut(file_path)
            .and_then(Vec::pop)
            .ok_or_else(|| DiffError::NoEditHistory(file_path.to_string()))?;
        if history.get(file_path).is_some_and(Vec::is_empty) {
            history.remove(file_path);
        }
        Ok(entry.previous_content)
    }

    /// Edits for one file oldest first, or for every file ordered by time.
    pub fn get_history(&self, file_path: Option<&str>) -> Vec<EditHistory> {
        let history = self.history();
        match file_path {
            Some(path) => history.get(path).cloned().unwrap_or_default(),
            None => {
                let mut all = history.values().flatten().cloned().collect::<Vec<_>>();
                all.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
                all
            }
        }
    }

    pub fn clear_history(&self) {
        self.history().clear();
    }

    fn history(&self) -> MutexGuard<'_, HashMap<String, Vec<EditHistory>>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
