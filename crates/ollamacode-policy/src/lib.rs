use ollamacode_core::Mode;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("path is empty")]
    EmptyPath,
    #[error("path '{0}' escapes the working directory")]
    PathTraversal(String),
}

/// What a handler is about to do, as far as the permission matrix cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    Command { dangerous: bool },
    Git { mutating: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Confirm,
    /// Confirm with the typed-token prompt.
    ConfirmStrict,
    Refuse,
}

/// Permission matrix keyed by the session mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModePolicy {
    mode: Mode,
}

impl ModePolicy {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn decide(&self, action: Action) -> Decision {
        let side_effect = match action {
            Action::Read | Action::Git { mutating: false } => return Decision::Allow,
            Action::Write | Action::Git { mutating: true } => false,
            Action::Command { dangerous } => dangerous,
        };
        if !self.mode.allows_writes() {
            return Decision::Refuse;
        }
        if !self.mode.requires_confirmation() {
            return Decision::Allow;
        }
        if side_effect {
            Decision::ConfirmStrict
        } else {
            Decision::Confirm
        }
    }

    /// User-facing text for a refused action.
    pub fn refusal_message(&self) -> String {
        format!(
            "❌ Operation blocked: {} mode is active. Restart with --mode interactive or --mode autonomous to allow changes.",
            self.mode
        )
    }
}

// ── Dangerous commands ────────────────────────────────────────────────────

// Plain substring list, matched against the lowercased, whitespace-collapsed
// command. Quoted or obfuscated forms are not recognised.
const DANGEROUS_SUBSTRINGS: &[&str] = &[
    "rm -fr",
    "rm -rf",
    "rm --recursive",
    "dd if=",
    "of=/dev/sd",
    "of=/dev/nvme",
    "of=/dev/hd",
    "> /dev/sd",
    "> /dev/nvme",
    "mkfs",
    "mke2fs",
    "fdisk",
    "wipefs",
    "format c:",
    "del /s",
    "rd /s",
    "chmod -r 777 /",
    "shred ",
];

static RECURSIVE_RM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[;&|\s])rm\s+(-[a-z]*r[a-z]*|-r)\b").expect("valid recursive rm regex")
});

/// True for recursive deletes, raw block-device writes, disk formatters and
/// fork-bomb syntax.
pub fn is_dangerous_command(command: &str) -> bool {
    let lowered = command.to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    if DANGEROUS_SUBSTRINGS
        .iter()
        .any(|needle| collapsed.contains(needle))
    {
        return true;
    }
    let compact = lowered
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>();
    if compact.contains(":(){") || compact.contains(":|:&") {
        return true;
    }
    RECURSIVE_RM.is_match(&collapsed)
}

// ── Workspace paths ───────────────────────────────────────────────────────

/// Resolve `raw` against `work_dir` without touching the filesystem and
/// reject anything that lands outside it. Symlinks are not followed.
pub fn resolve_workspace_path(work_dir: &Path, raw: &str) -> Result<PathBuf, PolicyError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PolicyError::EmptyPath);
    }
    let root = normalize_lexically(work_dir)
        .ok_or_else(|| PolicyError::PathTraversal(work_dir.display().to_string()))?;
    let candidate = Path::new(trimmed);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let resolved =
        normalize_lexically(&joined).ok_or_else(|| PolicyError::PathTraversal(raw.to_string()))?;
    if !resolved.starts_with(&root) {
        return Err(PolicyError::PathTraversal(raw.to_string()));
    }
    Ok(resolved)
}

fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}
