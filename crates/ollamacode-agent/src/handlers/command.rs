use super::{Clearance, Handler, HandlerError, Prompt, Reply, authorize, clip_lines, run_tool};
use crate::AgentContext;
use crate::intent::{IntentParams, IntentResult};
use ollamacode_policy::Action;
use ollamacode_tools::{CommandOutput, EXECUTE_COMMAND, Tool, ToolData};
use serde_json::json;

const OUTPUT_LINES: usize = 200;

pub struct ExecuteCommandHandler;

impl Handler for ExecuteCommandHandler {
    fn handle(
        &self,
        ctx: &AgentContext,
        intent: &IntentResult,
        _message: &str,
    ) -> Result<Reply, HandlerError> {
        let IntentParams::ExecuteCommand {
            command: Some(command),
        } = intent.params()
        else {
            return Err(HandlerError::MissingParameter("command"));
        };
        let params = json!({ "command": command });
        let dangerous = ctx.tools.get(EXECUTE_COMMAND)?.is_dangerous(&params);
        if let Clearance::Stop(reply) = authorize(
            ctx,
            Action::Command { dangerous },
            Prompt::Confirm {
                action: "Execute command",
                details: &command,
            },
        )? {
            return Ok(reply);
        }

        let result = run_tool(ctx, EXECUTE_COMMAND, &params)?;
        let output = match result.data {
            ToolData::Command(output) => output,
            _ if result.success => return Ok(Reply::text(result.message)),
            _ => {
                return Err(HandlerError::Tool {
                    tool: EXECUTE_COMMAND.to_string(),
                    message: result.error,
                });
            }
        };
        if result.success {
            return Ok(Reply::text(render_output(&output)));
        }
        if output.timed_out {
            return Err(HandlerError::Timeout(result.error));
        }
        if ctx.cancel.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        Err(HandlerError::Tool {
            tool: EXECUTE_COMMAND.to_string(),
            message: format!("{}\n{}", result.error, render_output(&output)),
        })
    }
}

fn render_output(output: &CommandOutput) -> String {
    let mut text = format!("$ {}\n", output.command);
    if !output.stdout.trim().is_empty() {
        text.push_str(&format!(
            "```\n{}\n```\n",
            clip_lines(&output.stdout, OUTPUT_LINES)
        ));
    }
    if !output.stderr.trim().is_empty() {
        text.push_str(&format!(
            "stderr:\n```\n{}\n```\n",
            clip_lines(&output.stderr, OUTPUT_LINES)
        ));
    }
    text.push_str(&format!(
        "exit code {} ({} ms)",
        output.exit_code, output.duration_ms
    ));
    text
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::harness;
    use ollamacode_core::{IntentKind, Mode};
    use serde_json::Value;

    fn command_intent(command: &str) -> IntentResult {
        let Value::Object(map) = json!({ "command": command }) else {
            unreachable!()
        };
        IntentResult::new(IntentKind::ExecuteCommand, map, 0.9)
    }

    #[test]
    fn dangerous_command_needs_typed_token() {
        let h = harness(Mode::Interactive, "yes\n");
        let marker = h.workspace.path().join("victim");
        std::fs::create_dir(&marker).unwrap();
        let reply = ExecuteCommandHandler
            .handle(&h.ctx, &command_intent("rm -rf victim"), "")
            .unwrap();
        assert!(reply.text.contains("cancelled"), "{}", reply.text);
        assert!(marker.exists());
        let transcript = h.gate.transcript();
        assert!(transcript.contains("DANGEROUS"));
        assert!(transcript.contains("Type CONFIRM to proceed"));
    }

    #[test]
    fn plain_command_uses_yes_no_prompt() {
        let h = harness(Mode::Interactive, "s\n");
        let reply = ExecuteCommandHandler
            .handle(&h.ctx, &command_intent("echo hello"), "")
            .unwrap();
        assert!(reply.text.contains("hello"));
        assert!(reply.text.contains("exit code 0"));
        assert!(h.gate.transcript().contains("Proceed? [y/N]"));
    }

    #[test]
    fn read_only_refuses_commands() {
        let h = harness(Mode::ReadOnly, "");
        let reply = ExecuteCommandHandler
            .handle(&h.ctx, &command_intent("touch made"), "")
            .unwrap();
        assert!(reply.text.starts_with("❌"));
        assert!(!h.workspace.path().join("made").exists());
    }

    #[test]
    fn failing_command_surfaces_exit_and_stderr() {
        let h = harness(Mode::Autonomous, "");
        let err = ExecuteCommandHandler
            .handle(&h.ctx, &command_intent("echo oops >&2; exit 3"), "")
            .unwrap_err();
        let HandlerError::Tool { message, .. } = &err else {
            panic!("expected tool error, got {err:?}");
        };
        assert!(message.contains("status 3"));
        assert!(message.contains("oops"));
    }

    #[test]
    fn missing_command_is_reported() {
        let h = harness(Mode::Autonomous, "");
        let err = ExecuteCommandHandler
            .handle(
                &h.ctx,
                &IntentResult::new(IntentKind::ExecuteCommand, Default::default(), 0.5),
                "",
            )
            .unwrap_err();
        assert_eq!(err, HandlerError::MissingParameter("command"));
    }
}
