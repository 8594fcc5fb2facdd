use super::{Handler, HandlerError, Reply, run_tool, tool_failure};
use crate::AgentContext;
use crate::intent::{IntentParams, IntentResult};
use ollamacode_core::{Message, TaskClass};
use ollamacode_tools::{SEARCH_CODE, ToolData, WebResult};
use serde_json::json;

const SHOWN_MATCHES: usize = 30;

const SYNTHESIS_SYSTEM_PROMPT: &str = "Answer the question using the web results provided. \
Cite sources by their number. Say so when the results do not answer the question.";

pub struct SearchCodeHandler;

impl Handler for SearchCodeHandler {
    fn handle(
        &self,
        ctx: &AgentContext,
        intent: &IntentResult,
        _message: &str,
    ) -> Result<Reply, HandlerError> {
        let IntentParams::SearchCode {
            query: Some(query),
            file_pattern,
        } = intent.params()
        else {
            return Err(HandlerError::MissingParameter("query"));
        };
        let mut params = json!({ "query": query });
        if let Some(pattern) = file_pattern {
            params["file_pattern"] = json!(pattern);
        }
        let result = run_tool(ctx, SEARCH_CODE, &params)?;
        if !result.success {
            return Err(tool_failure(SEARCH_CODE, &result));
        }
        let ToolData::Search(output) = result.data else {
            return Ok(Reply::text(result.message));
        };
        if output.matches.is_empty() {
            return Ok(Reply::text(format!("No matches found for '{query}'.")));
        }

        let mut text = format!(
            "🔍 {} match{} for '{query}' (via {}):\n",
            output.count,
            if output.count == 1 { "" } else { "es" },
            output.tool
        );
        for m in output.matches.iter().take(SHOWN_MATCHES) {
            text.push_str(&format!("{}:{}: {}\n", m.file, m.line, m.text.trim()));
        }
        let hidden = output.matches.len().saturating_sub(SHOWN_MATCHES);
        if hidden > 0 {
            text.push_str(&format!("... and {hidden} more\n"));
        }
        if output.truncated {
            text.push_str("(results truncated)\n");
        }
        Ok(Reply::text(text.trim_end()))
    }
}

pub struct WebSearchHandler;

impl Handler for WebSearchHandler {
    fn handle(
        &self,
        ctx: &AgentContext,
        intent: &IntentResult,
        message: &str,
    ) -> Result<Reply, HandlerError> {
        let query = match intent.params() {
            IntentParams::WebSearch { query: Some(query) } => query,
            _ => message.trim().to_string(),
        };
        if query.is_empty() {
            return Err(HandlerError::MissingParameter("query"));
        }
        let results = ctx
            .web
            .search(&query, ctx.settings.web_results, &ctx.cancel)
            .map_err(|err| HandlerError::WebSearch(format!("{err:#}")))?;
        if results.is_empty() {
            return Ok(Reply::text(format!("No web results for '{query}'.")));
        }
        let listing = format_results(&results);

        match synthesize(ctx, &query, &listing) {
            Ok(answer) if !answer.trim().is_empty() => Ok(Reply::text(format!(
                "{}\n\nSources:\n{}",
                answer.trim(),
                results
                    .iter()
                    .enumerate()
                    .map(|(i, r)| format!("[{}] {}", i + 1, r.url))
                    .collect::<Vec<_>>()
                    .join("\n")
            ))),
            Ok(_) => Ok(Reply::text(format!("🌐 Results for '{query}':\n{listing}"))),
            Err(err) => {
                ctx.observer
                    .verbose_log(&format!("web synthesis failed, showing raw results: {err}"));
                Ok(Reply::text(format!("🌐 Results for '{query}':\n{listing}")))
            }
        }
    }
}

fn format_results(results: &[WebResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let mut entry = format!("{}. {}\n   {}", i + 1, r.title, r.url);
            if !r.snippet.is_empty() {
                entry.push_str(&format!("\n   {}", r.snippet));
            }
            entry
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn synthesize(ctx: &AgentContext, query: &str, listing: &str) -> Result<String, HandlerError> {
    let client = ctx.router.get_client(TaskClass::Search)?;
    let options = ctx
        .router
        .options_for(TaskClass::Search)?
        .with_system_prompt(SYNTHESIS_SYSTEM_PROMPT);
    let prompt = format!("Question: {query}\n\nWeb results:\n{listing}");
    Ok(client.complete(&[Message::user(prompt)], &options, &ctx.cancel)?)
}
