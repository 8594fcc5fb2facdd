use crate::{SEARCH_CODE, Tool, ToolContext, ToolData, ToolResult, parse_params};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::process::Command;

const DEFAULT_MAX_RESULTS: usize = 100;
const EXCLUDED_DIRS: [&str; 4] = [".git", ".ollama-code", "target", "node_modules"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchBackend {
    Ripgrep,
    Grep,
    Findstr,
}

impl SearchBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ripgrep => "ripgrep",
            Self::Grep => "grep",
            Self::Findstr => "findstr",
        }
    }
}

impl std::fmt::Display for SearchBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchMatch {
    pub file: String,
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutput {
    pub matches: Vec<SearchMatch>,
    pub count: usize,
    pub tool: SearchBackend,
    pub truncated: bool,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: String,
    #[serde(default)]
    file_pattern: Option<String>,
    #[serde(default)]
    max_results: Option<usize>,
}

/// Literal, case-insensitive search backed by whichever of ripgrep, grep or
/// findstr is installed.
pub struct CodeSearcherTool {
    max_results: usize,
}

impl Default for CodeSearcherTool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RESULTS)
    }
}

impl CodeSearcherTool {
    pub fn new(max_results: usize) -> Self {
        Self {
            max_results: max_results.max(1),
        }
    }
}

impl Tool for CodeSearcherTool {
    fn name(&self) -> &str {
        SEARCH_CODE
    }

    fn description(&self) -> &str {
        "Search the working directory for a literal string"
    }

    fn requires_confirmation(&self) -> bool {
        false
    }

    fn execute(&self, ctx: &ToolContext, params: &serde_json::Value) -> ToolResult {
        let params: SearchParams = match parse_params(SEARCH_CODE, params) {
            Ok(params) => params,
            Err(result) => return result,
        };
        if params.query.trim().is_empty() {
            return ToolResult::failure("query must not be empty");
        }
        let pattern = params
            .file_pattern
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());
        let limit = params.max_results.unwrap_or(self.max_results).max(1);

        let mut tried = Vec::new();
        for backend in candidate_backends() {
            let mut command = backend_command(backend, &params.query, pattern);
            command.current_dir(&ctx.work_dir);
            let output = match command.output() {
                Ok(output) => output,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    tried.push(backend.as_str());
                    continue;
                }
                Err(err) => return ToolResult::failure(format!("{backend} failed: {err}")),
            };
            // Exit status 1 is "no matches" for all three tools.
            let code = output.status.code();
            if code != Some(0) && code != Some(1) {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return ToolResult::failure(format!(
                    "{backend} exited with {}: {}",
                    code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                    stderr.trim()
                ));
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            let mut matches = parse_matches(&stdout);
            let truncated = matches.len() > limit;
            matches.truncate(limit);
            let count = matches.len();
            let message = format!("{count} matches for '{}' via {backend}", params.query);
            return ToolResult::ok(
                ToolData::Search(SearchOutput {
                    matches,
                    count,
                    tool: backend,
                    truncated,
                }),
                message,
            );
        }
        ToolResult::failure(format!(
            "no search tool available (tried {})",
            tried.join(", ")
        ))
    }
}

fn candidate_backends() -> Vec<SearchBackend> {
    if cfg!(windows) {
        vec![SearchBackend::Ripgrep, SearchBackend::Findstr]
    } else {
        vec![SearchBackend::Ripgrep, SearchBackend::Grep]
    }
}

fn backend_command(backend: SearchBackend, query: &str, pattern: Option<&str>) -> Command {
    match backend {
        SearchBackend::Ripgrep => {
            let mut cmd = Command::new("rg");
            cmd.args([
                "--line-number",
                "--no-heading",
                "--color",
                "never",
                "--fixed-strings",
                "--ignore-case",
            ]);
            for dir in EXCLUDED_DIRS {
                cmd.arg("--glob").arg(format!("!{dir}"));
            }
            if let Some(pattern) = pattern {
                cmd.arg("--glob").arg(pattern);
            }
            cmd.arg("--").arg(query).arg(".");
            cmd
        }
        SearchBackend::Grep => {
            let mut cmd = Command::new("grep");
            cmd.arg("-rnIiF");
            if let Some(pattern) = pattern {
                cmd.arg(format!("--include={pattern}"));
            }
            for dir in EXCLUDED_DIRS {
                cmd.arg(format!("--exclude-dir={dir}"));
            }
            cmd.arg("--").arg(query).arg(".");
            cmd
        }
        SearchBackend::Findstr => {
            let mut cmd = Command::new("findstr");
            cmd.args(["/S", "/N", "/I", "/L"]);
            cmd.arg(format!("/C:{query}"));
            cmd.arg(pattern.unwrap_or("*.*"));
            cmd
        }
    }
}

/// Parses `file:line:text` records; lines without a numeric line field are
/// dropped.
pub(crate) fn parse_matches(stdout: &str) -> Vec<SearchMatch> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, ':');
            let file = parts.next()?;
            let line_no = parts.next()?.trim().parse::<usize>().ok()?;
            let text = parts.next().unwrap_or_default();
            let file = file.strip_prefix("./").unwrap_or(file).replace('\\', "/");
            Some(SearchMatch {
                file,
                line: line_no,
                text: text.trim_end().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    #[test]
    fn parses_grep_style_output() {
        let out = "./src/main.rs:12:    let x = 1;\nsrc/lib.rs:3:fn a() {}: trailing\nnot a match\n";
        let matches = parse_matches(out);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].file, "src/main.rs");
        assert_eq!(matches[0].line, 12);
        assert_eq!(matches[0].text, "    let x = 1;");
        assert_eq!(matches[1].text, "fn a() {}: trailing");
    }

    #[test]
    fn rejects_empty_query() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            CodeSearcherTool::default().execute(&ToolContext::new(dir.path()), &json!({"query": " "}));
        assert!(!result.success);
    }

    #[cfg(unix)]
    #[test]
    fn finds_literal_matches_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "fn Needle() {}\nfn other() {}\n").unwrap();
        fs::write(dir.path().join("notes.md"), "a needle here\n").unwrap();
        fs::create_dir(dir.path().join("target")).unwrap();
        fs::write(dir.path().join("target/out.rs"), "needle\n").unwrap();

        let ctx = ToolContext::new(dir.path());
        let result = CodeSearcherTool::default().execute(&ctx, &json!({"query": "needle"}));
        assert!(result.success, "{}", result.error);
        let ToolData::Search(output) = result.data else {
            panic!("expected search output");
        };
        assert_eq!(output.count, 2);
        assert!(output.matches.iter().all(|m| !m.file.starts_with("target")));

        let result = CodeSearcherTool::default()
            .execute(&ctx, &json!({"query": "needle", "file_pattern": "*.rs"}));
        let ToolData::Search(output) = result.data else {
            panic!("expected search output");
        };
        assert_eq!(output.count, 1);
        assert_eq!(output.matches[0].file, "src/lib.rs");
        assert_eq!(output.matches[0].line, 1);
    }

    #[cfg(unix)]
    #[test]
    fn no_matches_is_success_and_limit_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let body = (0..10).map(|i| format!("hit {i}\n")).collect::<String>();
        fs::write(dir.path().join("many.txt"), body).unwrap();
        let ctx = ToolContext::new(dir.path());

        let none = CodeSearcherTool::default().execute(&ctx, &json!({"query": "absent-token"}));
        assert!(none.success);
        assert!(matches!(none.data, ToolData::Search(ref out) if out.count == 0));

        let limited =
            CodeSearcherTool::default().execute(&ctx, &json!({"query": "hit", "max_results": 3}));
        let ToolData::Search(output) = limited.data else {
            panic!("expected search output");
        };
        assert_eq!(output.count, 3);
        assert!(output.truncated);
    }
}
