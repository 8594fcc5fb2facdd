use crate::AgentContext;
use anyhow::{Context, Result, anyhow, bail};
use ollamacode_core::{Message, Registry, RegistryError, TaskClass};
use ollamacode_diff::{EditRange, parse_range};
use ollamacode_observe::EventKind;
use ollamacode_policy::{Action, Decision, resolve_workspace_path};
use ollamacode_subagent::{SubagentConfig, SubagentError, SubagentSnapshot, SubagentStatus, SubagentType};
use std::fs;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// A `/name arg...` line. Arguments follow shell quoting, so
/// `/edit a.rs 3:3 "let x = 1;"` keeps the last argument whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashCommand {
    pub name: String,
    pub args: Vec<String>,
}

impl SlashCommand {
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        let body = trimmed.strip_prefix('/')?;
        let (name, rest) = match body.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (body, ""),
        };
        if name.is_empty() {
            return None;
        }
        let args = shell_words::split(rest)
            .unwrap_or_else(|_| rest.split_whitespace().map(str::to_string).collect());
        Some(Self {
            name: name.to_lowercase(),
            args,
        })
    }
}

/// What a command body receives.
pub struct Invocation<'a> {
    pub ctx: &'a AgentContext,
    pub registry: &'a CommandRegistry,
    pub args: &'a [String],
}

pub type CommandFn = fn(&Invocation<'_>) -> Result<String>;

pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
    run: CommandFn,
}

impl CommandSpec {
    pub fn new(
        name: &'static str,
        usage: &'static str,
        description: &'static str,
        run: CommandFn,
    ) -> Self {
        Self {
            name,
            usage,
            description,
            run,
        }
    }
}

/// Slash commands by name. Names that are not commands fall through to
/// skills.
pub struct CommandRegistry {
    commands: Registry<CommandSpec>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: Registry::new("command"),
        }
    }

    pub fn with_defaults() -> Result<Self, RegistryError> {
        let registry = Self::new();
        for spec in [
            CommandSpec::new("help", "/help", "List commands and skills", help),
            CommandSpec::new("tools", "/tools", "List available tools", tools),
            CommandSpec::new(
                "agent",
                "/agent <type> <prompt>",
                "Run a subagent and wait for its result",
                agent,
            ),
            CommandSpec::new(
                "spawn",
                "/spawn <type> <prompt>",
                "Start a subagent in the background",
                spawn,
            ),
            CommandSpec::new("tasks", "/tasks [status]", "List subagents", tasks),
            CommandSpec::new("wait", "/wait <id> [secs]", "Wait for a subagent", wait),
            CommandSpec::new("kill", "/kill <id>", "Stop a running subagent", kill),
            CommandSpec::new("stats", "/stats", "Subagent counters and loaded models", stats),
            CommandSpec::new(
                "edit",
                "/edit <file> <start:end> <text>",
                "Replace a line range",
                edit,
            ),
            CommandSpec::new("undo", "/undo <file>", "Revert the last /edit of a file", undo),
            CommandSpec::new("history", "/history [file]", "Show /edit history", history),
            CommandSpec::new("skills", "/skills", "List loaded skills", skills),
        ] {
            registry.register(spec)?;
        }
        Ok(registry)
    }

    pub fn register(&self, spec: CommandSpec) -> Result<(), RegistryError> {
        self.commands.register(spec.name, Arc::new(spec))
    }

    pub fn specs(&self) -> Vec<Arc<CommandSpec>> {
        self.commands
            .entries()
            .into_iter()
            .map(|(_, spec)| spec)
            .collect()
    }

    /// Run one slash line. A name that is neither a command nor a skill is
    /// an error carrying the closest known name, if any.
    pub fn execute(&self, ctx: &AgentContext, input: &str) -> Result<String> {
        let command = SlashCommand::parse(input)
            .ok_or_else(|| anyhow!("not a slash command: {}", input.trim()))?;
        if let Some(spec) = self.commands.get(&command.name) {
            return (spec.run)(&Invocation {
                ctx,
                registry: self,
                args: &command.args,
            });
        }
        if ctx.skills.contains(&command.name) {
            return run_skill(ctx, &command.name, &command.args.join(" "));
        }
        match self.suggest(ctx, &command.name) {
            Some(best) => bail!("unknown command '/{}'. Did you mean '/{best}'?", command.name),
            None => bail!("unknown command '/{}'. Type /help for a list.", command.name),
        }
    }

    fn suggest(&self, ctx: &AgentContext, name: &str) -> Option<String> {
        self.commands
            .names()
            .into_iter()
            .chain(ctx.skills.ids())
            .map(|candidate| (strsim::jaro_winkler(name, &candidate), candidate))
            .filter(|(score, _)| *score >= 0.8)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, candidate)| candidate)
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Informational ─────────────────────────────────────────────────────────

fn help(inv: &Invocation<'_>) -> Result<String> {
    let mut out = String::from("Commands:\n");
    for spec in inv.registry.specs() {
        out.push_str(&format!("  {:<34} {}\n", spec.usage, spec.description));
    }
    out.push_str("  exit | quit | clear | mode | pwd  (chat prompt only)\n");
    let skills = inv.ctx.skills.list();
    if !skills.is_empty() {
        out.push_str("Skills:\n");
        for skill in skills {
            out.push_str(&format!("  /{:<33} {}\n", skill.id, skill.description));
        }
    }
    Ok(out.trim_end().to_string())
}

fn tools(inv: &Invocation<'_>) -> Result<String> {
    let lines = inv
        .ctx
        .tools
        .list()
        .iter()
        .map(|tool| {
            format!(
                "  {:<16} {}{}",
                tool.name(),
                tool.description(),
                if tool.requires_confirmation() {
                    " (asks first)"
                } else {
                    ""
                }
            )
        })
        .collect::<Vec<_>>();
    Ok(format!("Tools:\n{}", lines.join("\n")))
}

fn skills(inv: &Invocation<'_>) -> Result<String> {
    let skills = inv.ctx.skills.list();
    if skills.is_empty() {
        return Ok("No skills loaded. Add SKILL.md files under .ollama-code/skills/<id>/.".into());
    }
    Ok(skills
        .iter()
        .map(|s| format!("/{}  {}: {}", s.id, s.name, s.description))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn run_skill(ctx: &AgentContext, id: &str, input: &str) -> Result<String> {
    let prompt = ctx.skills.render(id, input)?;
    let client = ctx.router.get_client(TaskClass::Default)?;
    let options = ctx.router.options_for(TaskClass::Default)?;
    let sink = &ctx.sink;
    let mut streamed = false;
    let result = client.complete_streaming(
        &[Message::user(prompt)],
        &options,
        &ctx.cancel,
        &mut |chunk| {
            streamed = true;
            sink.write_chunk(chunk);
        },
    );
    if streamed {
        sink.end_stream();
    }
    let text = result.with_context(|| format!("skill '{id}' failed"))?;
    Ok(if streamed { String::new() } else { text })
}

// ── Subagents ─────────────────────────────────────────────────────────────

fn spawn_from_args(inv: &Invocation<'_>) -> Result<SubagentSnapshot> {
    let [kind, prompt @ ..] = inv.args else {
        bail!("usage: <type> <prompt> (types: explore, plan, execute, general)");
    };
    if prompt.is_empty() {
        bail!("a prompt is required");
    }
    let kind = SubagentType::from_str(kind)?;
    let task = inv.ctx.supervisor.spawn(SubagentConfig::new(
        kind,
        prompt.join(" "),
        inv.ctx.work_dir.clone(),
    ))?;
    inv.ctx.observer.emit(EventKind::SubagentSpawned {
        id: task.id,
        kind: kind.to_string(),
    });
    Ok(task)
}

fn record_finish(ctx: &AgentContext, id: Uuid) {
    if let Ok(task) = ctx.supervisor.get(id) {
        ctx.observer.emit(EventKind::SubagentFinished {
            id,
            status: task.status.to_string(),
        });
    }
}

fn agent(inv: &Invocation<'_>) -> Result<String> {
    let task = spawn_from_args(inv)?;
    let result = inv.ctx.supervisor.wait(task.id);
    record_finish(inv.ctx, task.id);
    Ok(format!("[{} {}]\n{}", task.kind, short_id(task.id), result?))
}

fn spawn(inv: &Invocation<'_>) -> Result<String> {
    let task = spawn_from_args(inv)?;
    Ok(format!("Spawned {} subagent {}", task.kind, task.id))
}

fn tasks(inv: &Invocation<'_>) -> Result<String> {
    let list = match inv.args.first() {
        Some(raw) => {
            let status = SubagentStatus::from_str(raw)?;
            inv.ctx.supervisor.list_by_status(status)
        }
        None => inv.ctx.supervisor.list(),
    };
    if list.is_empty() {
        return Ok("No subagents.".into());
    }
    Ok(list
        .iter()
        .map(|t| {
            format!(
                "{}  {:<8} {:<10} {}",
                short_id(t.id),
                t.kind.as_str(),
                t.status.as_str(),
                preview(&t.prompt, 50)
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

fn wait(inv: &Invocation<'_>) -> Result<String> {
    let id = task_id(inv)?;
    let result = match inv.args.get(1) {
        Some(secs) => {
            let secs = secs
                .parse::<u64>()
                .with_context(|| format!("invalid timeout '{secs}'"))?;
            inv.ctx
                .supervisor
                .wait_with_timeout(id, Duration::from_secs(secs))
        }
        None => inv.ctx.supervisor.wait(id),
    };
    if !matches!(result, Err(SubagentError::WaitTimeout(_))) {
        record_finish(inv.ctx, id);
    }
    Ok(result?)
}

fn kill(inv: &Invocation<'_>) -> Result<String> {
    let id = task_id(inv)?;
    inv.ctx.supervisor.kill(id)?;
    Ok(format!("Stopping subagent {}", short_id(id)))
}

fn stats(inv: &Invocation<'_>) -> Result<String> {
    let s = inv.ctx.supervisor.stats();
    let models = inv.ctx.router.cached_models();
    Ok(format!(
        "subagents: active {} / max {}, spawned {}, completed {}, failed {}\nmodels loaded: {}",
        s.active,
        s.max_concurrent,
        s.total_spawned,
        s.total_completed,
        s.total_failed,
        if models.is_empty() {
            "none".to_string()
        } else {
            models.join(", ")
        }
    ))
}

/// A full id, or a prefix matching exactly one task.
fn task_id(inv: &Invocation<'_>) -> Result<Uuid> {
    let raw = inv.args.first().context("a subagent id is required")?;
    if let Ok(id) = Uuid::parse_str(raw) {
        return Ok(id);
    }
    let matches = inv
        .ctx
        .supervisor
        .list()
        .into_iter()
        .filter(|t| t.id.to_string().starts_with(raw.as_str()))
        .collect::<Vec<_>>();
    match matches.as_slice() {
        [task] => Ok(task.id),
        [] => bail!("no subagent matches '{raw}'"),
        _ => bail!("'{raw}' matches several subagents"),
    }
}

fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

fn preview(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= max {
        line.to_string()
    } else {
        format!("{}...", line.chars().take(max).collect::<String>())
    }
}

// ── Edits ─────────────────────────────────────────────────────────────────

/// `Ok(None)` to go ahead, `Ok(Some(text))` to stop with that text.
fn gate_write(ctx: &AgentContext, action: &str, preview: &str) -> Result<Option<String>> {
    match ctx.policy.decide(Action::Write) {
        Decision::Allow => Ok(None),
        Decision::Refuse => Ok(Some(ctx.policy.refusal_message())),
        Decision::Confirm | Decision::ConfirmStrict => {
            if ctx.gate.confirm_with_preview(action, preview)? {
                Ok(None)
            } else {
                Ok(Some("🚫 Operation cancelled by user.".into()))
            }
        }
    }
}

fn edit(inv: &Invocation<'_>) -> Result<String> {
    let [file, range, text @ ..] = inv.args else {
        bail!("usage: /edit <file> <start:end> <text>");
    };
    let ctx = inv.ctx;
    if ctx.policy.decide(Action::Write) == Decision::Refuse {
        return Ok(ctx.policy.refusal_message());
    }
    let (start, end) = parse_range(range)?;
    let path = resolve_workspace_path(&ctx.work_dir, file)?;
    let current =
        fs::read_to_string(&path).with_context(|| format!("failed to read {file}"))?;
    let replacement = text.join(" ").replace("\\n", "\n");

    let range = EditRange::new(start, end, replacement);
    let (updated, diff) = ctx.diff.preview_edit(file, &current, &range)?;
    if let Some(stop) = gate_write(
        ctx,
        &format!("Edit {file} lines {start}-{end}"),
        &diff.render_unified(),
    )? {
        return Ok(stop);
    }
    fs::write(&path, &updated).with_context(|| format!("failed to write {file}"))?;
    // Recorded only once the file holds the new content.
    ctx.diff.apply_edit(file, &current, &range)?;
    Ok(format!("✅ Edited {file} lines {start}-{end}. Use /undo {file} to revert."))
}

fn undo(inv: &Invocation<'_>) -> Result<String> {
    let file = inv.args.first().context("usage: /undo <file>")?;
    let ctx = inv.ctx;
    let last = ctx
        .diff
        .get_history(Some(file))
        .pop()
        .ok_or_else(|| anyhow!("no edit history for {file}"))?;
    let path = resolve_workspace_path(&ctx.work_dir, file)?;
    let current =
        fs::read_to_string(&path).with_context(|| format!("failed to read {file}"))?;
    let diff = ctx.diff.compute_diff(file, &current, &last.previous_content);
    if let Some(stop) = gate_write(ctx, &format!("Undo last edit of {file}"), &diff.render_unified())? {
        return Ok(stop);
    }
    fs::write(&path, &last.previous_content)
        .with_context(|| format!("failed to write {file}"))?;
    ctx.diff.rollback(file)?;
    Ok(format!("↩️ Reverted last edit of {file}"))
}

fn history(inv: &Invocation<'_>) -> Result<String> {
    let entries = inv.ctx.diff.get_history(inv.args.first().map(String::as_str));
    if entries.is_empty() {
        return Ok("No edits recorded.".into());
    }
    Ok(entries
        .iter()
        .map(|e| {
            format!(
                "{}  {}  lines {}-{}  {}",
                short_id(e.id),
                e.file_path,
                e.range.start,
                e.range.end,
                e.timestamp.format("%H:%M:%S")
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FixedWeb, harness, harness_with_input};
    use ollamacode_core::Mode;
    use ollamacode_skills::SkillRegistry;

    #[test]
    fn parses_names_and_quoted_args() {
        assert_eq!(SlashCommand::parse("hello"), None);
        assert_eq!(SlashCommand::parse("/"), None);
        assert_eq!(
            SlashCommand::parse("  /EDIT src/a.rs 2:3 \"let x = 1;\" "),
            Some(SlashCommand {
                name: "edit".into(),
                args: vec!["src/a.rs".into(), "2:3".into(), "let x = 1;".into()],
            })
        );
        // Unbalanced quotes fall back to whitespace splitting.
        assert_eq!(
            SlashCommand::parse("/agent plan it's broken").unwrap().args,
            vec!["plan", "it's", "broken"]
        );
    }

    #[test]
    fn unknown_command_suggests_nearest() {
        let h = harness(Mode::ReadOnly, "");
        let registry = CommandRegistry::with_defaults().unwrap();
        let err = registry.execute(&h.ctx, "/stast").unwrap_err();
        assert!(err.to_string().contains("Did you mean '/stats'?"), "{err}");
        let err = registry.execute(&h.ctx, "/zzzzzz").unwrap_err();
        assert!(err.to_string().contains("/help"));
    }

    #[test]
    fn help_lists_every_command() {
        let h = harness(Mode::ReadOnly, "");
        let registry = CommandRegistry::with_defaults().unwrap();
        let text = registry.execute(&h.ctx, "/help").unwrap();
        for spec in registry.specs() {
            assert!(text.contains(spec.usage), "{}", spec.usage);
        }
        let tools = registry.execute(&h.ctx, "/tools").unwrap();
        assert!(tools.contains("execute_command"));
    }

    #[test]
    fn edit_then_undo_round_trip() {
        let h = harness(Mode::Autonomous, "");
        let file = h.workspace.path().join("lib.rs");
        fs::write(&file, "a\nb\nc").unwrap();
        let registry = CommandRegistry::with_defaults().unwrap();

        let out = registry
            .execute(&h.ctx, "/edit lib.rs 2:2 \"B1\\nB2\"")
            .unwrap();
        assert!(out.starts_with("✅"), "{out}");
        assert_eq!(fs::read_to_string(&file).unwrap(), "a\nB1\nB2\nc");
        assert!(registry.execute(&h.ctx, "/history").unwrap().contains("lib.rs"));

        registry.execute(&h.ctx, "/undo lib.rs").unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "a\nb\nc");
        assert_eq!(
            registry.execute(&h.ctx, "/history lib.rs").unwrap(),
            "No edits recorded."
        );
        assert!(registry.execute(&h.ctx, "/undo lib.rs").is_err());
    }

    #[test]
    fn declined_edit_leaves_no_history() {
        let h = harness(Mode::Interactive, "n\n");
        let file = h.workspace.path().join("x.txt");
        fs::write(&file, "one\ntwo").unwrap();
        let registry = CommandRegistry::with_defaults().unwrap();
        let out = registry.execute(&h.ctx, "/edit x.txt 1:1 uno").unwrap();
        assert!(out.contains("cancelled"));
        assert_eq!(fs::read_to_string(&file).unwrap(), "one\ntwo");
        assert!(h.ctx.diff.get_history(None).is_empty());
        assert!(h.gate.transcript().contains("+uno"));
    }

    #[test]
    fn unreadable_confirmation_leaves_edit_unrecorded() {
        let h = harness_with_input(
            Mode::Interactive,
            vec![0xff, 0xfe, b'\n'],
            FixedWeb::default(),
        );
        let file = h.workspace.path().join("a.txt");
        fs::write(&file, "one\ntwo").unwrap();
        let registry = CommandRegistry::with_defaults().unwrap();

        assert!(registry.execute(&h.ctx, "/edit a.txt 1:1 ONE").is_err());
        assert_eq!(fs::read_to_string(&file).unwrap(), "one\ntwo");
        assert!(h.ctx.diff.get_history(None).is_empty());
    }

    #[test]
    fn failed_undo_keeps_file_and_history() {
        let mut input = b"y\n".to_vec();
        input.extend_from_slice(&[0xff, 0xfe, b'\n']);
        let h = harness_with_input(Mode::Interactive, input, FixedWeb::default());
        let file = h.workspace.path().join("a.txt");
        fs::write(&file, "one\ntwo").unwrap();
        let registry = CommandRegistry::with_defaults().unwrap();

        registry.execute(&h.ctx, "/edit a.txt 2:2 TWO").unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "one\nTWO");
        assert!(registry.execute(&h.ctx, "/undo a.txt").is_err());
        assert_eq!(fs::read_to_string(&file).unwrap(), "one\nTWO");
        assert_eq!(h.ctx.diff.get_history(Some("a.txt")).len(), 1);

        // A file that vanished is reported, not previewed as all-new.
        fs::remove_file(&file).unwrap();
        let err = registry.execute(&h.ctx, "/undo a.txt").unwrap_err();
        assert!(err.to_string().contains("failed to read a.txt"), "{err}");
        assert_eq!(h.ctx.diff.get_history(Some("a.txt")).len(), 1);
    }

    #[test]
    fn edit_rejects_bad_ranges_and_read_only() {
        let h = harness(Mode::Autonomous, "");
        fs::write(h.workspace.path().join("x.txt"), "one").unwrap();
        let registry = CommandRegistry::with_defaults().unwrap();
        assert!(registry.execute(&h.ctx, "/edit x.txt 3:1 y").is_err());
        assert!(registry.execute(&h.ctx, "/edit x.txt 5:5 y").is_err());

        let ro = harness(Mode::ReadOnly, "");
        let out = registry.execute(&ro.ctx, "/edit x.txt 1:1 y").unwrap();
        assert!(out.starts_with("❌"));
    }

    #[test]
    fn agent_runs_subagent_and_stats_count_it() {
        let h = harness(Mode::ReadOnly, "");
        h.client.push_text("Found three modules.");
        let registry = CommandRegistry::with_defaults().unwrap();
        assert!(registry
            .execute(&h.ctx, "/stats")
            .unwrap()
            .ends_with("models loaded: none"));

        let out = registry
            .execute(&h.ctx, "/agent explore where is config loaded")
            .unwrap();
        assert!(out.ends_with("Found three modules."), "{out}");
        let stats = registry.execute(&h.ctx, "/stats").unwrap();
        assert!(stats.contains("completed 1"), "{stats}");
        assert!(stats.ends_with("models loaded: test-model"), "{stats}");
        assert!(registry.execute(&h.ctx, "/tasks").unwrap().contains("explore"));
        assert!(registry.execute(&h.ctx, "/agent wizard do it").is_err());
    }

    #[test]
    fn skills_dispatch_by_id() {
        let mut h = harness(Mode::ReadOnly, "");
        let root = h.workspace.path().join("skills");
        fs::create_dir_all(root.join("review")).unwrap();
        fs::write(root.join("review/SKILL.md"), "Review {{input}} carefully.").unwrap();
        let skills = SkillRegistry::load_from_roots(h.workspace.path(), &[root]).unwrap();
        Arc::get_mut(&mut h.ctx).unwrap().skills = Arc::new(skills);
        h.client.push_text("Looks fine.");

        let registry = CommandRegistry::with_defaults().unwrap();
        let out = registry.execute(&h.ctx, "/review src/main.rs").unwrap();
        assert!(out.is_empty());
        assert_eq!(h.sink.contents(), "Looks fine.\n");
        assert_eq!(
            h.client.calls()[0].messages[0].content,
            "Review src/main.rs carefully."
        );
        assert!(registry.execute(&h.ctx, "/skills").unwrap().contains("/review"));
    }
}
