use crate::shell::{PlatformShellRunner, ShellRunner};
use crate::{CommandOutput, EXECUTE_COMMAND, Tool, ToolContext, ToolData, ToolResult, parse_params};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Deserialize)]
struct CommandParams {
    command: String,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

pub struct CommandExecutorTool {
    runner: Arc<dyn ShellRunner>,
    default_timeout: Duration,
}

impl Default for CommandExecutorTool {
    fn default() -> Self {
        Self::new(Arc::new(PlatformShellRunner), DEFAULT_TIMEOUT_SECS)
    }
}

impl CommandExecutorTool {
    pub fn new(runner: Arc<dyn ShellRunner>, default_timeout_secs: u64) -> Self {
        Self {
            runner,
            default_timeout: Duration::from_secs(default_timeout_secs.max(1)),
        }
    }
}

impl Tool for CommandExecutorTool {
    fn name(&self) -> &str {
        EXECUTE_COMMAND
    }

    fn description(&self) -> &str {
        "Run a shell command in the working directory"
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    fn is_dangerous(&self, params: &serde_json::Value) -> bool {
        params
            .get("command")
            .and_then(|c| c.as_str())
            .is_some_and(ollamacode_policy::is_dangerous_command)
    }

    fn execute(&self, ctx: &ToolContext, params: &serde_json::Value) -> ToolResult {
        let params: CommandParams = match parse_params(EXECUTE_COMMAND, params) {
            Ok(params) => params,
            Err(result) => return result,
        };
        let command = params.command.trim();
        if command.is_empty() {
            return ToolResult::failure("command must not be empty");
        }
        let timeout = params
            .timeout_secs
            .map(|secs| Duration::from_secs(secs.max(1)))
            .unwrap_or(self.default_timeout);

        let run = match self.runner.run(command, &ctx.work_dir, timeout, &ctx.cancel) {
            Ok(run) => run,
            Err(err) => return ToolResult::failure(format!("{err:#}")),
        };
        let exit_code = run.status.unwrap_or(-1);
        let output = CommandOutput {
            command: command.to_string(),
            stdout: run.stdout,
            stderr: run.stderr,
            exit_code,
            duration_ms: run.duration_ms,
            timed_out: run.timed_out,
        };
        if run.cancelled {
            return ToolResult::failure_with(ToolData::Command(output), "command was cancelled");
        }
        if run.timed_out {
            return ToolResult::failure_with(
                ToolData::Command(output),
                format!("command timed out after {}s", timeout.as_secs()),
            );
        }
        if exit_code != 0 {
            let detail = output.stderr.trim().to_string();
            let error = if detail.is_empty() {
                format!("command exited with status {exit_code}")
            } else {
                format!("command exited with status {exit_code}: {detail}")
            };
            return ToolResult::failure_with(ToolData::Command(output), error);
        }
        let message = format!("exit 0 in {} ms", output.duration_ms);
        ToolResult::ok(ToolData::Command(output), message)
    }
}
