use super::{Handler, HandlerError, Reply};
use crate::AgentContext;
use crate::intent::IntentResult;
use ollamacode_core::{Message, Role, TaskClass};

pub struct QuestionHandler;

impl Handler for QuestionHandler {
    /// Streams the answer into the sink as it arrives.
    fn handle(
        &self,
        ctx: &AgentContext,
        _intent: &IntentResult,
        message: &str,
    ) -> Result<Reply, HandlerError> {
        let client = ctx.router.get_client(TaskClass::Default)?;
        let options = ctx
            .router
            .options_for(TaskClass::Default)?
            .with_system_prompt(system_prompt(ctx));

        let mut messages = ctx.conversation.snapshot();
        let already_logged = messages
            .last()
            .is_some_and(|m| m.role == Role::User && m.content == message);
        if !already_logged {
            messages.push(Message::user(message));
        }

        let sink = &ctx.sink;
        let mut streamed = false;
        let result = client.complete_streaming(&messages, &options, &ctx.cancel, &mut |chunk| {
            streamed = true;
            sink.write_chunk(chunk);
        });
        if streamed {
            sink.end_stream();
        }
        let text = result?;
        Ok(Reply { text, streamed })
    }
}

fn system_prompt(ctx: &AgentContext) -> String {
    format!(
        "You are a local coding assistant working in {}. Answer concisely and use code blocks for code.",
        ctx.work_dir.display()
    )
}
