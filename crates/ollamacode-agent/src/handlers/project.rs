use super::{Handler, HandlerError, Reply, clip_lines, run_tool, tool_failure};
use crate::AgentContext;
use crate::intent::IntentResult;
use ollamacode_core::{Message, TaskClass};
use ollamacode_tools::{ANALYZE_PROJECT, ProjectReport, ToolData};
use serde_json::json;

const TREE_LINES: usize = 80;

pub struct AnalyzeProjectHandler;

impl Handler for AnalyzeProjectHandler {
    fn handle(
        &self,
        ctx: &AgentContext,
        _intent: &IntentResult,
        message: &str,
    ) -> Result<Reply, HandlerError> {
        let result = run_tool(ctx, ANALYZE_PROJECT, &json!({ "type": "structure", "max_depth": 3 }))?;
        if !result.success {
            return Err(tool_failure(ANALYZE_PROJECT, &result));
        }
        let ToolData::Project(ProjectReport::Structure { tree }) = result.data else {
            return Ok(Reply::text(result.message));
        };
        let tree = clip_lines(&tree, TREE_LINES);
        let mut text = format!("📁 Project structure:\n```\n{tree}\n```");

        match summarize(ctx, &tree, message) {
            Ok(summary) if !summary.trim().is_empty() => {
                text.push_str("\n\n");
                text.push_str(summary.trim());
            }
            Ok(_) => {}
            Err(err) => ctx
                .observer
                .verbose_log(&format!("project summary skipped: {err}")),
        }
        Ok(Reply::text(text))
    }
}

fn summarize(ctx: &AgentContext, tree: &str, message: &str) -> Result<String, HandlerError> {
    let client = ctx.router.get_client(TaskClass::Analysis)?;
    let options = ctx.router.options_for(TaskClass::Analysis)?.with_system_prompt(
        "You describe software projects from their file layout: language, build system, main components.",
    );
    let prompt = format!(
        "Request: {}\n\nProject layout of {}:\n{tree}",
        message.trim(),
        ctx.work_dir.display()
    );
    Ok(client.complete(&[Message::user(prompt)], &options, &ctx.cancel)?)
}
