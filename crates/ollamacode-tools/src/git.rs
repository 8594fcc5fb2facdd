use crate::{GIT, Tool, ToolContext, ToolData, ToolResult, parse_params};
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitOperation {
    Status,
    Diff,
    Log,
    Add,
    Commit,
    Branch,
}

impl GitOperation {
    pub const ALL: [GitOperation; 6] = [
        Self::Status,
        Self::Diff,
        Self::Log,
        Self::Add,
        Self::Commit,
        Self::Branch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Diff => "diff",
            Self::Log => "log",
            Self::Add => "add",
            Self::Commit => "commit",
            Self::Branch => "branch",
        }
    }

    /// Whether the operation changes the repository. Branch counts as
    /// mutating because it may create one.
    pub fn is_mutating(self) -> bool {
        matches!(self, Self::Add | Self::Commit | Self::Branch)
    }
}

impl std::fmt::Display for GitOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GitOperation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == needle)
            .ok_or_else(|| anyhow!("unsupported git operation: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GitDetails {
    #[default]
    None,
    Status {
        clean: bool,
        changed: Vec<String>,
    },
    Log {
        commits: Vec<String>,
    },
    Branch {
        current: Option<String>,
        branches: Vec<String>,
    },
    Commit {
        message: String,
    },
    Add {
        files: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GitOutput {
    pub operation: GitOperation,
    pub output: String,
    pub details: GitDetails,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FileList {
    One(String),
    Many(Vec<String>),
}

impl FileList {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(file) => vec![file],
            Self::Many(files) => files,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitParams {
    operation: GitOperation,
    #[serde(default)]
    files: Option<FileList>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    staged: bool,
    /// Branch to create for `branch`.
    #[serde(default)]
    name: Option<String>,
    /// Restricts `diff` to one path.
    #[serde(default)]
    path: Option<String>,
}

pub struct GitTool;

impl Tool for GitTool {
    fn name(&self) -> &str {
        GIT
    }

    fn description(&self) -> &str {
        "Inspect or change the git repository in the working directory"
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    fn execute(&self, ctx: &ToolContext, params: &serde_json::Value) -> ToolResult {
        let params: GitParams = match parse_params(GIT, params) {
            Ok(params) => params,
            Err(result) => return result,
        };
        let operation = params.operation;
        let (args, details) = match build_args(ctx, params) {
            Ok(built) => built,
            Err(result) => return result,
        };
        let output = match run_git(&ctx.work_dir, &args) {
            Ok(output) => output,
            Err(error) => return ToolResult::failure(error),
        };
        let details = match (operation, details) {
            (GitOperation::Status, _) => {
                let changed = output
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(|l| l.get(3..).unwrap_or(l).trim().to_string())
                    .collect::<Vec<_>>();
                GitDetails::Status {
                    clean: changed.is_empty(),
                    changed,
                }
            }
            (GitOperation::Log, _) => GitDetails::Log {
                commits: output.lines().map(str::to_string).collect(),
            },
            (GitOperation::Branch, GitDetails::None) => {
                let mut current = None;
                let mut branches = Vec::new();
                for line in output.lines() {
                    let name = line.trim_start_matches('*').trim().to_string();
                    if name.is_empty() {
                        continue;
                    }
                    if line.starts_with('*') {
                        current = Some(name.clone());
                    }
                    branches.push(name);
                }
                GitDetails::Branch { current, branches }
            }
            (_, details) => details,
        };
        let message = format!("git {operation} succeeded");
        ToolResult::ok(
            ToolData::Git(GitOutput {
                operation,
                output,
                details,
            }),
            message,
        )
    }
}

fn build_args(
    ctx: &ToolContext,
    params: GitParams,
) -> Result<(Vec<String>, GitDetails), ToolResult> {
    let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    match params.operation {
        GitOperation::Status => Ok((owned(&["status", "--porcelain"]), GitDetails::None)),
        GitOperation::Diff => {
            let mut args = owned(&["diff", "--no-color"]);
            if params.staged {
                args.push("--staged".to_string());
            }
            if let Some(path) = params.path.filter(|p| !p.trim().is_empty()) {
                ctx.resolve(&path)?;
                args.push("--".to_string());
                args.push(path);
            }
            Ok((args, GitDetails::None))
        }
        GitOperation::Log => {
            let limit = params.limit.unwrap_or(10).clamp(1, 200);
            Ok((
                vec![
                    "log".to_string(),
                    "--oneline".to_string(),
                    "--no-color".to_string(),
                    format!("-n{limit}"),
                ],
                GitDetails::None,
            ))
        }
        GitOperation::Add => {
            let files = params.files.map(FileList::into_vec).unwrap_or_default();
            if files.is_empty() {
                return Err(ToolResult::failure("git add needs at least one file"));
            }
            for file in &files {
                ctx.resolve(file)?;
            }
            let mut args = owned(&["add", "--"]);
            args.extend(files.iter().cloned());
            Ok((args, GitDetails::Add { files }))
        }
        GitOperation::Commit => {
            let message = params
                .message
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .ok_or_else(|| ToolResult::failure("git commit needs a message"))?;
            Ok((
                vec!["commit".to_string(), "-m".to_string(), message.clone()],
                GitDetails::Commit { message },
            ))
        }
        GitOperation::Branch => match params.name.filter(|n| !n.trim().is_empty()) {
            Some(name) => {
                if name.starts_with('-') {
                    return Err(ToolResult::failure(format!("invalid branch name: {name}")));
                }
                Ok((
                    vec!["branch".to_string(), name.clone()],
                    GitDetails::Branch {
                        current: None,
                        branches: vec![name],
                    },
                ))
            }
            None => Ok((owned(&["branch", "--no-color"]), GitDetails::None)),
        },
    }
}

fn run_git(work_dir: &Path, args: &[String]) -> Result<String, String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(work_dir)
        .output()
        .map_err(|err| format!("failed to run git: {err}"))?;
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        return Err(format!("git {} failed: {detail}", args[0]));
    }
    Ok(stdout)
}
