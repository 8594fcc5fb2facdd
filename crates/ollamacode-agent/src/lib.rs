//! The conversational core: classify each utterance, route it to a handler,
//! gate side effects by mode, and keep the conversation log.

use anyhow::{Context, Result};
use ollamacode_core::{AppConfig, CancellationToken};
use ollamacode_diff::DiffEngine;
use ollamacode_observe::Observer;
use ollamacode_policy::ModePolicy;
use ollamacode_router::ModelRouter;
use ollamacode_skills::SkillRegistry;
use ollamacode_subagent::{BackendExecutor, SubagentSupervisor};
use ollamacode_tools::{DuckDuckGoSearcher, ToolContext, ToolRegistry, WebSearcher};
use std::path::PathBuf;
use std::sync::Arc;

pub mod commands;
mod conversation;
mod dispatch;
pub mod gate;
pub mod handlers;
pub mod intent;
mod sink;

pub use commands::{CommandRegistry, SlashCommand};
pub use conversation::Conversation;
pub use dispatch::{Dispatcher, TurnOutcome};
pub use gate::{ConfirmationGate, StdioGate, TerminalGate};
pub use handlers::{Handler, HandlerError, HandlerRegistry, Reply};
pub use intent::{IntentDetector, IntentParams, IntentResult};
pub use sink::{BufferSink, OutputSink, StdoutSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentSettings {
    /// Results fetched per web search.
    pub web_results: usize,
    /// Recently touched files offered to the intent detector.
    pub recent_files: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            web_results: 3,
            recent_files: 10,
        }
    }
}

/// Everything a handler or slash command may touch. Built once per session.
pub struct AgentContext {
    pub work_dir: PathBuf,
    pub policy: ModePolicy,
    pub router: Arc<ModelRouter>,
    pub tools: Arc<ToolRegistry>,
    pub gate: Arc<dyn ConfirmationGate>,
    pub supervisor: SubagentSupervisor,
    pub diff: Arc<DiffEngine>,
    pub web: Arc<dyn WebSearcher>,
    pub skills: Arc<SkillRegistry>,
    pub sink: Arc<dyn OutputSink>,
    pub observer: Arc<Observer>,
    pub conversation: Arc<Conversation>,
    pub cancel: CancellationToken,
    pub settings: AgentSettings,
}

impl AgentContext {
    /// Wire the production components from loaded settings. A router
    /// configuration that fails validation aborts here.
    pub fn from_config(
        config: &AppConfig,
        work_dir: PathBuf,
        gate: Arc<dyn ConfirmationGate>,
        sink: Arc<dyn OutputSink>,
    ) -> Result<Self> {
        let router = Arc::new(
            ModelRouter::for_ollama(&config.llm.base_url, config.router.clone())
                .context("invalid model configuration")?,
        );
        let tools = ToolRegistry::with_settings(
            config.agent.command_timeout_secs,
            config.search.code_results,
        )?;
        let supervisor = SubagentSupervisor::new(
            Arc::new(BackendExecutor::new(Arc::clone(&router))),
            config.subagents.max_concurrent,
        );
        let skills = SkillRegistry::load(&work_dir, &config.skills.paths)?;
        let mut observer = match Observer::new(&work_dir) {
            Ok(observer) => observer,
            Err(err) => {
                let observer = Observer::detached();
                observer.warn_log(&format!("event log disabled: {err}"));
                observer
            }
        };
        observer.set_verbose(config.verbose);

        Ok(Self {
            policy: ModePolicy::new(config.agent.mode),
            router,
            tools: Arc::new(tools),
            gate,
            supervisor,
            diff: Arc::new(DiffEngine::new()),
            web: Arc::new(DuckDuckGoSearcher::new()?),
            skills: Arc::new(skills),
            sink,
            observer: Arc::new(observer),
            conversation: Arc::new(Conversation::new()),
            cancel: CancellationToken::new(),
            settings: AgentSettings {
                web_results: config.search.web_results.max(1),
                recent_files: config.agent.recent_files,
            },
            work_dir,
        })
    }

    pub fn tool_context(&self) -> ToolContext {
        ToolContext::new(&self.work_dir).with_cancel(self.cancel.clone())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use ollamacode_core::{Mode, RouterConfig};
    use ollamacode_testkit::{ScriptedClient, shared_client_factory};
    use ollamacode_tools::WebResult;
    use std::io::Cursor;
    use std::sync::Mutex;

    pub type ScriptedGate = TerminalGate<Cursor<Vec<u8>>, Vec<u8>>;

    /// Web searcher answering from a fixed list, or failing when empty.
    #[derive(Default)]
    pub struct FixedWeb {
        pub results: Vec<WebResult>,
        pub queries: Mutex<Vec<String>>,
    }

    impl WebSearcher for FixedWeb {
        fn search(
            &self,
            query: &str,
            limit: usize,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<Vec<WebResult>> {
            self.queries.lock().unwrap().push(query.to_string());
            if self.results.is_empty() {
                anyhow::bail!("network unreachable");
            }
            Ok(self.results.iter().take(limit).cloned().collect())
        }
    }

    pub struct Harness {
        pub ctx: Arc<AgentContext>,
        pub client: Arc<ScriptedClient>,
        pub gate: Arc<ScriptedGate>,
        pub sink: Arc<BufferSink>,
        pub workspace: tempfile::TempDir,
    }

    pub fn harness(mode: Mode, answers: &str) -> Harness {
        harness_with_web(mode, answers, FixedWeb::default())
    }

    pub fn harness_with_web(mode: Mode, answers: &str, web: FixedWeb) -> Harness {
        harness_with_input(mode, answers.as_bytes().to_vec(), web)
    }

    /// Raw bytes fed to the confirmation gate, for unreadable answers.
    pub fn harness_with_input(mode: Mode, input: Vec<u8>, web: FixedWeb) -> Harness {
        let workspace = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedClient::new("test-model"));
        let router = Arc::new(
            ModelRouter::new(
                RouterConfig::single_model("test-model"),
                shared_client_factory(Arc::clone(&client)),
            )
            .unwrap(),
        );
        let gate = Arc::new(TerminalGate::new(
            Cursor::new(input),
            Vec::new(),
        ));
        let sink = Arc::new(BufferSink::new());
        let ctx = AgentContext {
            work_dir: workspace.path().to_path_buf(),
            policy: ModePolicy::new(mode),
            router: Arc::clone(&router),
            tools: Arc::new(ToolRegistry::with_defaults().unwrap()),
            gate: gate.clone(),
            supervisor: SubagentSupervisor::new(Arc::new(BackendExecutor::new(router)), 2),
            diff: Arc::new(DiffEngine::new()),
            web: Arc::new(web),
            skills: Arc::new(SkillRegistry::empty(workspace.path())),
            sink: sink.clone(),
            observer: Arc::new(Observer::detached()),
            conversation: Arc::new(Conversation::new()),
            cancel: CancellationToken::new(),
            settings: AgentSettings::default(),
        };
        Harness {
            ctx: Arc::new(ctx),
            client,
            gate,
            sink,
            workspace,
        }
    }
}
