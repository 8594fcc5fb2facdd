use super::{Clearance, Handler, HandlerError, Prompt, Reply, authorize, run_tool, tool_failure};
use crate::AgentContext;
use crate::intent::{IntentParams, IntentResult};
use ollamacode_policy::Action;
use ollamacode_tools::{GIT, GitDetails, GitOperation, GitOutput, ToolData};
use serde_json::Value;
use std::str::FromStr;

pub struct GitHandler;

impl Handler for GitHandler {
    fn handle(
        &self,
        ctx: &AgentContext,
        intent: &IntentResult,
        _message: &str,
    ) -> Result<Reply, HandlerError> {
        let IntentParams::GitOperation {
            operation: Some(raw_op),
            message,
        } = intent.params()
        else {
            return Err(HandlerError::MissingParameter("operation"));
        };
        let operation = GitOperation::from_str(&raw_op)
            .map_err(|err| HandlerError::InvalidParameter(err.to_string()))?;
        if operation == GitOperation::Commit && message.is_none() {
            return Err(HandlerError::MissingParameter("message"));
        }

        // Operation-specific keys (files, limit, staged, name, path) pass through.
        let mut params = intent.parameters.clone();
        params.insert("operation".into(), Value::String(operation.as_str().into()));
        let params = Value::Object(params);

        let details = serde_json::to_string(&params).unwrap_or_default();
        let action = format!("Run git {operation}");
        if let Clearance::Stop(reply) = authorize(
            ctx,
            Action::Git {
                mutating: operation.is_mutating(),
            },
            Prompt::Confirm {
                action: &action,
                details: &details,
            },
        )? {
            return Ok(reply);
        }

        let result = run_tool(ctx, GIT, &params)?;
        if !result.success {
            return Err(tool_failure(GIT, &result));
        }
        match result.data {
            ToolData::Git(output) => Ok(Reply::text(render(&output))),
            _ => Ok(Reply::text(result.message)),
        }
    }
}

fn render(output: &GitOutput) -> String {
    match &output.details {
        GitDetails::Status { clean: true, .. } => "✅ Working tree clean".to_string(),
        GitDetails::Status { changed, .. } => format!(
            "{} changed file{}:\n```\n{}\n```",
            changed.len(),
            if changed.len() == 1 { "" } else { "s" },
            output.output.trim_end()
        ),
        GitDetails::Commit { message } => format!("✅ Committed: {message}"),
        GitDetails::Add { files } => format!("✅ Staged {}", files.join(", ")),
        GitDetails::Branch {
            current,
            branches,
        } => {
            let current = current.as_deref().unwrap_or("(detached)");
            format!("On branch {current}\nBranches: {}", branches.join(", "))
        }
        GitDetails::Log { .. } | GitDetails::None if output.output.trim().is_empty() => {
            format!("git {}: no output", output.operation)
        }
        GitDetails::Log { .. } | GitDetails::None => {
            format!("```\n{}\n```", output.output.trim_end())
        }
    }
}
