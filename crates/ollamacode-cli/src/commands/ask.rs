use crate::SessionArgs;
use crate::context::{build_context, load_config};
use crate::output::print_json;
use anyhow::{Result, bail};
use ollamacode_agent::{BufferSink, Dispatcher, OutputSink, StdioGate, StdoutSink};
use ollamacode_core::Mode;
use serde_json::json;
use std::sync::Arc;

/// One turn in read-only mode. A failed handler makes the process exit 1.
pub(crate) fn run_ask(args: &SessionArgs, question: &str, json_mode: bool) -> Result<()> {
    let question = question.trim();
    if question.is_empty() {
        bail!("question is empty");
    }
    let (mut config, work_dir) = load_config(args)?;
    config.agent.mode = Mode::ReadOnly;

    // JSON output is printed once at the end, so nothing streams to stdout.
    let sink: Arc<dyn OutputSink> = if json_mode {
        Arc::new(BufferSink::new())
    } else {
        Arc::new(StdoutSink)
    };
    let ctx = build_context(&config, work_dir, Arc::new(StdioGate::stdio()), sink)?;
    let dispatcher = Dispatcher::new(Arc::clone(&ctx))?;
    let outcome = dispatcher.handle_turn(question);

    if json_mode {
        print_json(&json!({
            "intent": outcome.intent.intent,
            "confidence": outcome.intent.confidence,
            "text": outcome.text,
            "error": outcome.error.as_ref().map(|err| err.to_string()),
        }))?;
    }
    if let Some(err) = outcome.error {
        return Err(err.into());
    }
    Ok(())
}
