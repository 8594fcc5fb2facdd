use crate::{SubagentExecutor, SubagentSnapshot, SubagentType};
use anyhow::Context;
use ollamacode_core::{CancellationToken, Message};
use ollamacode_llm::ChatOptions;
use ollamacode_router::ModelRouter;
use std::path::Path;
use std::sync::Arc;

const EXPLORE_HEADING: &str = "## Exploration Results";
const PLAN_HEADING: &str = "## Plan";

/// Executes a task as one non-streaming backend call, picking the model from
/// the task or, failing that, from the router by the role's model hint.
pub struct BackendExecutor {
    router: Arc<ModelRouter>,
}

impl BackendExecutor {
    pub fn new(router: Arc<ModelRouter>) -> Self {
        Self { router }
    }
}

impl SubagentExecutor for BackendExecutor {
    fn execute(
        &self,
        task: &SubagentSnapshot,
        cancel: &CancellationToken,
    ) -> anyhow::Result<String> {
        let client = match &task.model {
            Some(model) => self.router.get_client_for_model(model),
            None => self.router.get_client(task.class)?,
        };
        let options = ChatOptions {
            temperature: Some(task.limits.temperature),
            max_tokens: Some(task.limits.max_tokens),
            ..ChatOptions::default()
        }
        .with_system_prompt(system_prompt(task.kind));
        let messages = [Message::user(render_prompt(
            task.kind,
            &task.prompt,
            &task.work_dir,
        ))];
        let raw = client
            .complete(&messages, &options, cancel)
            .with_context(|| format!("{} subagent backend call failed", task.kind))?;
        Ok(post_process(task.kind, &raw))
    }
}

fn system_prompt(kind: SubagentType) -> &'static str {
    match kind {
        SubagentType::Explore => {
            "You are a code exploration assistant. Report what exists and where, citing file paths. Do not propose changes."
        }
        SubagentType::Plan => {
            "You are a software planning assistant. Produce a numbered, step-by-step implementation plan with concrete files and checks."
        }
        SubagentType::Execute => {
            "You are a coding assistant carrying out one well-defined task. Answer with the result only."
        }
        SubagentType::General => "You are a helpful software engineering assistant.",
    }
}

pub fn render_prompt(kind: SubagentType, prompt: &str, work_dir: &Path) -> String {
    let task = prompt.trim();
    let dir = work_dir.display();
    match kind {
        SubagentType::Explore => {
            format!("Explore the project in {dir} and answer:\n{task}\n\nSummarise findings under headings.")
        }
        SubagentType::Plan => format!("Working directory: {dir}\n\nCreate a plan for:\n{task}"),
        SubagentType::Execute => format!("Working directory: {dir}\n\nTask:\n{task}"),
        SubagentType::General => task.to_string(),
    }
}

/// Role-specific shaping of the raw model text.
pub fn post_process(kind: SubagentType, raw: &str) -> String {
    let text = raw.trim();
    match kind {
        SubagentType::Explore => {
            if !has_heading(text) && text.lines().count() > 3 {
                format!("{EXPLORE_HEADING}\n\n{text}")
            } else {
                text.to_string()
            }
        }
        SubagentType::Plan => {
            if has_numbered_steps(text) {
                return text.to_string();
            }
            let mut out = format!("{PLAN_HEADING}\n\n");
            let mut step = 0;
            for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                if line.starts_with('#') {
                    out.push_str(line);
                } else {
                    step += 1;
                    let item = line
                        .strip_prefix("- ")
                        .or_else(|| line.strip_prefix("* "))
                        .unwrap_or(line);
                    out.push_str(&format!("{step}. {item}"));
                }
                out.push('\n');
            }
            out.trim_end().to_string()
        }
        SubagentType::Execute | SubagentType::General => text.to_string(),
    }
}

fn has_heading(text: &str) -> bool {
    text.lines().any(|line| line.trim_start().starts_with('#'))
}

fn has_numbered_steps(text: &str) -> bool {
    text.lines().any(|line| {
        let line = line.trim_start();
        let digits = line.bytes().take_while(u8::is_ascii_digit).count();
        digits > 0 && matches!(line.as_bytes().get(digits), Some(b'.') | Some(b')'))
    })
}
