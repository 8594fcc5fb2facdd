use crate::AgentContext;
use crate::handlers::{HandlerError, HandlerRegistry};
use crate::intent::{IntentDetector, IntentResult};
use ollamacode_core::{Message, RegistryError};
use ollamacode_observe::EventKind;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// What one turn produced. `text` is what the user saw; on failure it is the
/// formatted error.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub intent: IntentResult,
    pub text: String,
    pub error: Option<HandlerError>,
}

/// Runs turns: log the utterance, classify it, hand it to a handler, log
/// and surface the answer.
pub struct Dispatcher {
    ctx: Arc<AgentContext>,
    detector: IntentDetector,
    handlers: HandlerRegistry,
    recent_files: Mutex<VecDeque<String>>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<AgentContext>) -> Result<Self, RegistryError> {
        Ok(Self::with_handlers(ctx, HandlerRegistry::with_defaults()?))
    }

    pub fn with_handlers(ctx: Arc<AgentContext>, handlers: HandlerRegistry) -> Self {
        Self {
            detector: IntentDetector::new(Arc::clone(&ctx.router)),
            ctx,
            handlers,
            recent_files: Mutex::new(VecDeque::new()),
        }
    }

    pub fn context(&self) -> &Arc<AgentContext> {
        &self.ctx
    }

    /// Most recent first.
    pub fn recent_files(&self) -> Vec<String> {
        self.recent_files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Every turn appends exactly one user and one assistant message, even
    /// when classification or the handler fails.
    pub fn handle_turn(&self, message: &str) -> TurnOutcome {
        let ctx = &self.ctx;
        ctx.observer.emit(EventKind::TurnStarted {
            chars: message.chars().count(),
        });
        ctx.conversation.append(Message::user(message));

        let recent = self.recent_files();
        let intent = match self
            .detector
            .classify(message, &ctx.work_dir, &recent, &ctx.cancel)
        {
            Ok(intent) => intent,
            Err(err) => {
                ctx.observer
                    .verbose_log(&format!("intent detection fell back to question: {err}"));
                IntentResult::fallback()
            }
        };
        ctx.observer.emit(EventKind::IntentDetected {
            intent: intent.intent.to_string(),
            confidence: intent.confidence as f32,
        });
        ctx.observer.verbose_log(&format!(
            "intent {} ({:.2})",
            intent.intent, intent.confidence
        ));

        let handler = self.handlers.get(intent.intent);
        let (text, streamed, error) = match handler.handle(ctx, &intent, message) {
            Ok(reply) => (reply.text, reply.streamed, None),
            Err(err) => (err.user_message(), false, Some(err)),
        };
        ctx.observer.emit(EventKind::HandlerFinished {
            intent: intent.intent.to_string(),
            ok: error.is_none(),
        });

        ctx.conversation.append(Message::assistant(text.clone()));
        if !streamed {
            ctx.sink.write_message(&text);
        }
        if error.is_none()
            && let Some(path) = intent.file_path()
        {
            self.remember_file(path);
        }

        TurnOutcome {
            intent,
            text,
            error,
        }
    }

    fn remember_file(&self, path: String) {
        let limit = self.ctx.settings.recent_files;
        if limit == 0 {
            return;
        }
        let mut recent = self
            .recent_files
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        recent.retain(|p| p != &path);
        recent.push_front(path);
        recent.truncate(limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::harness;
    use ollamacode_core::{IntentKind, Mode, Role};
    use ollamacode_llm::BackendError;
    use ollamacode_testkit::ScriptedReply;
    use std::fs;

    fn classifier(intent: &str, params: &str) -> String {
        format!(r#"{{"intent": "{intent}", "parameters": {params}, "confidence": 0.9}}"#)
    }

    #[test]
    fn read_only_write_request_is_blocked_and_logged() {
        let h = harness(Mode::ReadOnly, "");
        h.client.push_text(&classifier(
            "write_file",
            r#"{"file_path": "a.txt", "content": "x"}"#,
        ));
        let dispatcher = Dispatcher::new(Arc::clone(&h.ctx)).unwrap();

        let outcome = dispatcher.handle_turn("write x to a.txt");
        assert_eq!(outcome.intent.intent, IntentKind::WriteFile);
        assert!(outcome.error.is_none());
        assert!(outcome.text.contains("blocked"));
        assert!(!h.workspace.path().join("a.txt").exists());

        let log = h.ctx.conversation.snapshot();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], Message::user("write x to a.txt"));
        assert_eq!(log[1].role, Role::Assistant);
        assert_eq!(log[1].content, outcome.text);
        assert!(h.sink.contents().contains("blocked"));
    }

    #[test]
    fn unparseable_classification_answers_as_question() {
        let h = harness(Mode::Interactive, "");
        h.client.push_text("not json at all");
        h.client.push(ScriptedReply::Chunks(vec!["Hel".into(), "lo".into()]));
        let dispatcher = Dispatcher::new(Arc::clone(&h.ctx)).unwrap();

        let outcome = dispatcher.handle_turn("hi there");
        assert_eq!(outcome.intent, IntentResult::fallback());
        assert_eq!(outcome.text, "Hello");
        // Streamed once, not echoed again.
        assert_eq!(h.sink.contents(), "Hello\n");

        let calls = h.client.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].streaming);
        assert_eq!(calls[1].messages.last().unwrap().content, "hi there");
    }

    #[test]
    fn handler_failure_still_completes_the_turn() {
        let h = harness(Mode::Interactive, "");
        h.client.push_text(&classifier("question", "{}"));
        h.client.push(ScriptedReply::Fail(BackendError::Transport(
            "connection refused".into(),
        )));
        let dispatcher = Dispatcher::new(Arc::clone(&h.ctx)).unwrap();

        let outcome = dispatcher.handle_turn("explain lifetimes");
        assert!(matches!(outcome.error, Some(HandlerError::Backend(_))));
        assert!(outcome.text.starts_with("⚠️"));
        let log = h.ctx.conversation.snapshot();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].content, outcome.text);
    }

    #[test]
    fn log_grows_by_two_per_turn_and_tracks_files() {
        let h = harness(Mode::ReadOnly, "");
        fs::write(h.workspace.path().join("a.rs"), "// a").unwrap();
        fs::write(h.workspace.path().join("b.rs"), "// b").unwrap();
        let dispatcher = Dispatcher::new(Arc::clone(&h.ctx)).unwrap();

        for (i, file) in ["a.rs", "b.rs", "a.rs"].iter().enumerate() {
            h.client
                .push_text(&classifier("read_file", &format!(r#"{{"file_path": "{file}"}}"#)));
            let outcome = dispatcher.handle_turn(&format!("show {file}"));
            assert!(outcome.error.is_none(), "{}", outcome.text);
            assert_eq!(h.ctx.conversation.len(), 2 * (i + 1));
        }
        assert_eq!(dispatcher.recent_files(), vec!["a.rs", "b.rs"]);

        let log = h.ctx.conversation.snapshot();
        for (i, message) in log.iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
            assert_eq!(message.role, expected);
        }
        // The classifier sees recently used files.
        let last_classify = &h.client.calls()[2];
        assert!(last_classify.messages[0].content.contains("b.rs, a.rs"));
    }
}
