use crate::{ANALYZE_PROJECT, Tool, ToolContext, ToolData, ToolResult, parse_params, walk_paths};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const DEFAULT_TREE_DEPTH: usize = 3;
const MAX_LISTED_FILES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    #[default]
    Structure,
    Stats,
    Files,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ProjectStats {
    pub files: usize,
    pub directories: usize,
    pub total_bytes: u64,
    pub by_extension: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProjectReport {
    Structure { tree: String },
    Stats(ProjectStats),
    Files { files: Vec<String>, truncated: bool },
}

#[derive(Debug, Default, Deserialize)]
struct AnalyzeParams {
    #[serde(default, rename = "type")]
    kind: ReportKind,
    #[serde(default)]
    max_depth: Option<usize>,
    #[serde(default)]
    pattern: Option<String>,
}

pub struct ProjectAnalyzerTool;

impl Tool for ProjectAnalyzerTool {
    fn name(&self) -> &str {
        ANALYZE_PROJECT
    }

    fn description(&self) -> &str {
        "Summarise the working directory as a tree, statistics, or a file list"
    }

    fn requires_confirmation(&self) -> bool {
        false
    }

    fn execute(&self, ctx: &ToolContext, params: &serde_json::Value) -> ToolResult {
        let params: AnalyzeParams = if params.is_null() {
            AnalyzeParams::default()
        } else {
            match parse_params(ANALYZE_PROJECT, params) {
                Ok(params) => params,
                Err(result) => return result,
            }
        };
        let root = match ctx.resolve(".") {
            Ok(root) => root,
            Err(result) => return result,
        };
        if !root.is_dir() {
            return ToolResult::failure(format!("{} is not a directory", root.display()));
        }

        let report = match params.kind {
            ReportKind::Structure => ProjectReport::Structure {
                tree: render_tree(&root, params.max_depth.unwrap_or(DEFAULT_TREE_DEPTH).max(1)),
            },
            ReportKind::Stats => ProjectReport::Stats(collect_stats(&root, params.max_depth)),
            ReportKind::Files => {
                let matcher = match params.pattern.as_deref().map(glob::Pattern::new) {
                    Some(Ok(pattern)) => Some(pattern),
                    Some(Err(err)) => {
                        return ToolResult::failure(format!("invalid glob pattern: {err}"));
                    }
                    None => None,
                };
                let mut files = walk_paths(&root, params.max_depth)
                    .into_iter()
                    .filter(|(_, _, is_dir)| !is_dir)
                    .map(|(path, _, _)| ctx.display_path(&path))
                    .filter(|rel| matcher.as_ref().is_none_or(|m| m.matches(rel)))
                    .collect::<Vec<_>>();
                let truncated = files.len() > MAX_LISTED_FILES;
                files.truncate(MAX_LISTED_FILES);
                ProjectReport::Files { files, truncated }
            }
        };
        let message = match &report {
            ProjectReport::Structure { tree } => format!("{} entries", tree.lines().count()),
            ProjectReport::Stats(stats) => {
                format!("{} files, {} directories", stats.files, stats.directories)
            }
            ProjectReport::Files { files, .. } => format!("{} files", files.len()),
        };
        ToolResult::ok(ToolData::Project(report), message)
    }
}

fn render_tree(root: &Path, max_depth: usize) -> String {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| ".".to_string());
    let mut out = format!("{name}/\n");
    for (path, depth, is_dir) in walk_paths(root, Some(max_depth)) {
        let entry = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        out.push_str(&"  ".repeat(depth));
        out.push_str(&entry);
        if is_dir {
            out.push('/');
        }
        out.push('\n');
    }
    out
}

fn collect_stats(root: &Path, max_depth: Option<usize>) -> ProjectStats {
    let mut stats = ProjectStats::default();
    for (path, _, is_dir) in walk_paths(root, max_depth) {
        if is_dir {
            stats.directories += 1;
            continue;
        }
        stats.files += 1;
        stats.total_bytes += std::fs::metadata(&path).map(|m| m.len()).unwrap_or_default();
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_else(|| "(none)".to_string());
        *stats.by_extension.entry(ext).or_default() += 1;
    }
    stats
}
