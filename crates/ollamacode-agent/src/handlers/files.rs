use super::{
    Clearance, Handler, HandlerError, Prompt, Reply, authorize, clip_lines, run_tool, tool_failure,
};
use crate::AgentContext;
use crate::intent::{IntentParams, IntentResult, WriteParams, extract_json_object};
use ollamacode_core::{Message, TaskClass};
use ollamacode_policy::{Action, Decision, resolve_workspace_path};
use ollamacode_tools::{FileContent, READ_FILE, ToolData, WRITE_FILE, WriteMode};
use serde_json::{Value, json};
use std::fs;

const PREVIEW_LINES: usize = 40;

const EXTRACT_SYSTEM_PROMPT: &str = r#"Extract the file write the user is asking for.
Reply with one JSON object and nothing else:
{"file_path": string, "content": string, "mode": "create"|"append"|"replace", "old_text": string, "new_text": string}
Omit keys you cannot determine."#;

pub struct ReadFileHandler;

impl Handler for ReadFileHandler {
    fn handle(
        &self,
        ctx: &AgentContext,
        intent: &IntentResult,
        _message: &str,
    ) -> Result<Reply, HandlerError> {
        let IntentParams::ReadFile {
            file_path: Some(path),
        } = intent.params()
        else {
            return Err(HandlerError::MissingParameter("file_path"));
        };
        let result = run_tool(ctx, READ_FILE, &json!({ "file_path": path }))?;
        if !result.success {
            return Err(tool_failure(READ_FILE, &result));
        }
        let text = match result.data {
            ToolData::File(FileContent::Text { content, size, .. }) => {
                format!("📄 {path} ({size} bytes)\n```\n{}\n```", content.trim_end())
            }
            ToolData::File(FileContent::Image {
                mime_type, size, ..
            }) => format!("🖼️ {path}: {mime_type} image, {size} bytes"),
            _ => result.message,
        };
        Ok(Reply::text(text))
    }
}

pub struct WriteFileHandler;

impl Handler for WriteFileHandler {
    fn handle(
        &self,
        ctx: &AgentContext,
        intent: &IntentResult,
        message: &str,
    ) -> Result<Reply, HandlerError> {
        if ctx.policy.decide(Action::Write) == Decision::Refuse {
            return Ok(Reply::text(ctx.policy.refusal_message()));
        }
        let mut params = match intent.params() {
            IntentParams::WriteFile(params) => params,
            _ => WriteParams::from_map(&intent.parameters),
        };
        if params.missing_key().is_some() {
            params.merge_missing(extract_write_params(ctx, message)?);
        }
        if let Some(key) = params.missing_key() {
            return Err(HandlerError::MissingParameter(key));
        }
        let path = params.file_path.clone().unwrap_or_default();

        let preview = write_preview(ctx, &path, &params)?;
        let action = format!("Write {path} ({})", params.mode);
        if let Clearance::Stop(reply) = authorize(
            ctx,
            Action::Write,
            Prompt::Preview {
                action: &action,
                preview: &preview,
            },
        )? {
            return Ok(reply);
        }

        let result = run_tool(ctx, WRITE_FILE, &params.to_tool_params())?;
        if !result.success {
            return Err(tool_failure(WRITE_FILE, &result));
        }
        let text = match result.data {
            ToolData::Write(outcome) => match outcome.replacements {
                Some(n) => format!(
                    "✅ Updated {} ({n} replacement{}, {} bytes)",
                    outcome.path,
                    if n == 1 { "" } else { "s" },
                    outcome.size
                ),
                None => format!(
                    "✅ Wrote {} ({}, {} bytes)",
                    outcome.path, outcome.mode, outcome.size
                ),
            },
            _ => result.message,
        };
        Ok(Reply::text(text))
    }
}

/// One code-model call that pulls write parameters out of free text.
fn extract_write_params(ctx: &AgentContext, message: &str) -> Result<WriteParams, HandlerError> {
    let client = ctx.router.get_client(TaskClass::Code)?;
    let options = ctx
        .router
        .options_for(TaskClass::Code)?
        .with_system_prompt(EXTRACT_SYSTEM_PROMPT);
    let reply = client.complete(&[Message::user(message)], &options, &ctx.cancel)?;
    let extracted = extract_json_object(&reply)
        .and_then(|json| serde_json::from_str::<Value>(json).ok())
        .and_then(|value| value.as_object().map(WriteParams::from_map))
        .unwrap_or_default();
    ctx.observer.verbose_log(&format!(
        "write extraction filled {}",
        if extracted.file_path.is_some() { "path" } else { "nothing" }
    ));
    Ok(extracted)
}

/// What the file will look like, as shown in the confirmation prompt.
fn write_preview(ctx: &AgentContext, path: &str, params: &WriteParams) -> Result<String, HandlerError> {
    let target = resolve_workspace_path(&ctx.work_dir, path)?;
    let current = fs::read_to_string(&target).ok();
    let content = params.content.as_deref().unwrap_or_default();

    let preview = match (params.mode, current) {
        (WriteMode::Create, Some(old)) => render_diff(ctx, path, &old, content),
        (WriteMode::Create, None) => format!("new file\n{}", plus_lines(content)),
        (WriteMode::Append, _) => format!("append to end\n{}", plus_lines(content)),
        (WriteMode::Replace, Some(old)) => {
            let needle = params.old_text.as_deref().unwrap_or_default();
            let replacement = params.new_text.as_deref().unwrap_or_default();
            render_diff(ctx, path, &old, &old.replace(needle, replacement))
        }
        (WriteMode::Replace, None) => format!(
            "-{}\n+{}",
            params.old_text.as_deref().unwrap_or_default(),
            params.new_text.as_deref().unwrap_or_default()
        ),
    };
    Ok(clip_lines(&preview, PREVIEW_LINES))
}

fn render_diff(ctx: &AgentContext, path: &str, old: &str, new: &str) -> String {
    let diff = ctx.diff.compute_diff(path, old, new);
    if diff.is_empty() {
        "(no changes)".to_string()
    } else {
        diff.render_unified()
    }
}

fn plus_lines(content: &str) -> String {
    content
        .lines()
        .map(|line| format!("+{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FixedWeb, harness, harness_with_input};
    use ollamacode_core::{IntentKind, Mode};
    use serde_json::Map;

    fn intent(kind: IntentKind, params: Value) -> IntentResult {
        let map = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        IntentResult::new(kind, map, 0.9)
    }

    #[test]
    fn read_only_blocks_writes_without_touching_disk() {
        let h = harness(Mode::ReadOnly, "");
        let reply = WriteFileHandler
            .handle(
                &h.ctx,
                &intent(
                    IntentKind::WriteFile,
                    json!({"file_path": "a.txt", "content": "x"}),
                ),
                "write x to a.txt",
            )
            .unwrap();
        assert!(reply.text.contains("blocked"), "{}", reply.text);
        assert!(!h.workspace.path().join("a.txt").exists());
        assert!(h.client.calls().is_empty());
        assert!(h.gate.transcript().is_empty());
    }

    #[test]
    fn interactive_write_shows_diff_and_writes_on_yes() {
        let h = harness(Mode::Interactive, "y\n");
        fs::write(h.workspace.path().join("notes.txt"), "one\ntwo\n").unwrap();
        let reply = WriteFileHandler
            .handle(
                &h.ctx,
                &intent(
                    IntentKind::WriteFile,
                    json!({"file_path": "notes.txt", "content": "one\nthree\n"}),
                ),
                "",
            )
            .unwrap();
        assert!(reply.text.starts_with("✅ Wrote notes.txt"), "{}", reply.text);
        let transcript = h.gate.transcript();
        assert!(transcript.contains("-two"));
        assert!(transcript.contains("+three"));
        assert_eq!(
            fs::read_to_string(h.workspace.path().join("notes.txt")).unwrap(),
            "one\nthree\n"
        );
    }

    #[test]
    fn declined_write_leaves_file_alone() {
        let h = harness(Mode::Interactive, "n\n");
        let reply = WriteFileHandler
            .handle(
                &h.ctx,
                &intent(
                    IntentKind::WriteFile,
                    json!({"file_path": "new.txt", "content": "hi"}),
                ),
                "",
            )
            .unwrap();
        assert!(reply.text.contains("cancelled"));
        assert!(h.gate.transcript().contains("new file\n+hi"));
        assert!(!h.workspace.path().join("new.txt").exists());
    }

    #[test]
    fn unreadable_answer_is_an_error_and_writes_nothing() {
        let h = harness_with_input(
            Mode::Interactive,
            vec![0xff, 0xfe, b'\n'],
            FixedWeb::default(),
        );
        fs::write(h.workspace.path().join("keep.txt"), "old").unwrap();
        let err = WriteFileHandler
            .handle(
                &h.ctx,
                &intent(
                    IntentKind::WriteFile,
                    json!({"file_path": "keep.txt", "content": "new"}),
                ),
                "",
            )
            .unwrap_err();
        assert!(matches!(err, HandlerError::Prompt(_)), "{err:?}");
        assert!(err.user_message().starts_with("🚫"));
        assert_eq!(
            fs::read_to_string(h.workspace.path().join("keep.txt")).unwrap(),
            "old"
        );
    }

    #[test]
    fn missing_parameters_are_extracted_from_the_message() {
        let h = harness(Mode::Autonomous, "");
        h.client.push_text(
            "Here you go: {\"file_path\": \"hello.py\", \"content\": \"print('hi')\\n\"}",
        );
        let reply = WriteFileHandler
            .handle(
                &h.ctx,
                &intent(IntentKind::WriteFile, json!({})),
                "create hello.py that prints hi",
            )
            .unwrap();
        assert!(reply.text.contains("hello.py"));
        assert_eq!(
            fs::read_to_string(h.workspace.path().join("hello.py")).unwrap(),
            "print('hi')\n"
        );
        let calls = h.client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].messages[0].content, "create hello.py that prints hi");
    }

    #[test]
    fn extraction_without_json_reports_missing_key() {
        let h = harness(Mode::Autonomous, "");
        h.client.push_text("I cannot tell which file.");
        let err = WriteFileHandler
            .handle(&h.ctx, &intent(IntentKind::WriteFile, json!({})), "write it")
            .unwrap_err();
        assert_eq!(err, HandlerError::MissingParameter("file_path"));
    }

    #[test]
    fn replace_reports_count() {
        let h = harness(Mode::Autonomous, "");
        fs::write(h.workspace.path().join("a.rs"), "foo foo bar").unwrap();
        let reply = WriteFileHandler
            .handle(
                &h.ctx,
                &intent(
                    IntentKind::WriteFile,
                    json!({"file_path": "a.rs", "mode": "replace", "old_text": "foo", "new_text": "baz"}),
                ),
                "",
            )
            .unwrap();
        assert!(reply.text.contains("2 replacements"), "{}", reply.text);
    }

    #[test]
    fn escaping_path_is_rejected_before_prompting() {
        let h = harness(Mode::Interactive, "y\n");
        let err = WriteFileHandler
            .handle(
                &h.ctx,
                &intent(
                    IntentKind::WriteFile,
                    json!({"file_path": "../outside.txt", "content": "x"}),
                ),
                "",
            )
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidParameter(_)));
        assert!(h.gate.transcript().is_empty());
    }

    #[test]
    fn reads_text_files_and_reports_missing_path() {
        let h = harness(Mode::ReadOnly, "");
        fs::write(h.workspace.path().join("main.rs"), "fn main() {}\n").unwrap();
        let reply = ReadFileHandler
            .handle(
                &h.ctx,
                &intent(IntentKind::ReadFile, json!({"file_path": "main.rs"})),
                "",
            )
            .unwrap();
        assert!(reply.text.contains("fn main() {}"));

        let err = ReadFileHandler
            .handle(&h.ctx, &intent(IntentKind::ReadFile, json!({})), "")
            .unwrap_err();
        assert_eq!(err, HandlerError::MissingParameter("file_path"));

        let err = ReadFileHandler
            .handle(
                &h.ctx,
                &intent(IntentKind::ReadFile, json!({"file_path": "absent.rs"})),
                "",
            )
            .unwrap_err();
        assert!(matches!(err, HandlerError::Tool { .. }));
    }
}
