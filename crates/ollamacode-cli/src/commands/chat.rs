use crate::SessionArgs;
use crate::context::{build_context, load_config};
use anyhow::Result;
use ollamacode_agent::{AgentContext, CommandRegistry, Dispatcher, StdioGate, StdoutSink};
use std::io::{Write, stdin, stdout};
use std::sync::Arc;

/// One line typed at the chat prompt.
#[derive(Debug, PartialEq, Eq)]
enum ReplInput<'a> {
    Empty,
    Exit,
    Help,
    Clear,
    Mode,
    Pwd,
    Slash(&'a str),
    Turn(&'a str),
}

fn classify_line(line: &str) -> ReplInput<'_> {
    let trimmed = line.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "" => ReplInput::Empty,
        "exit" | "quit" => ReplInput::Exit,
        "help" => ReplInput::Help,
        "clear" => ReplInput::Clear,
        "mode" => ReplInput::Mode,
        "pwd" => ReplInput::Pwd,
        _ if trimmed.starts_with('/') => ReplInput::Slash(trimmed),
        _ => ReplInput::Turn(trimmed),
    }
}

pub(crate) fn run_chat(args: &SessionArgs, initial: &str) -> Result<()> {
    let (config, work_dir) = load_config(args)?;
    let ctx = build_context(
        &config,
        work_dir,
        Arc::new(StdioGate::stdio()),
        Arc::new(StdoutSink),
    )?;
    let dispatcher = Dispatcher::new(Arc::clone(&ctx))?;
    let commands = CommandRegistry::with_defaults()?;

    let model = ctx.router.config().default_model.name;
    println!(
        "ollama-code in {} (mode: {}, model: {})",
        ctx.work_dir.display(),
        ctx.policy.mode(),
        model
    );
    println!("Type 'help' for commands, 'exit' to quit.");

    if !initial.trim().is_empty() {
        dispatcher.handle_turn(initial.trim());
    }

    loop {
        print!("> ");
        stdout().flush()?;
        let mut line = String::new();
        if stdin().read_line(&mut line)? == 0 {
            println!();
            break;
        }
        match classify_line(&line) {
            ReplInput::Empty => continue,
            ReplInput::Exit => break,
            ReplInput::Help => run_slash(&ctx, &commands, "/help"),
            ReplInput::Clear => {
                ctx.conversation.clear();
                println!("Conversation cleared.");
            }
            ReplInput::Mode => println!("mode: {}", ctx.policy.mode()),
            ReplInput::Pwd => println!("{}", ctx.work_dir.display()),
            ReplInput::Slash(input) => run_slash(&ctx, &commands, input),
            ReplInput::Turn(message) => {
                dispatcher.handle_turn(message);
            }
        }
    }

    ctx.supervisor.clear_all();
    println!("Goodbye.");
    Ok(())
}

fn run_slash(ctx: &AgentContext, commands: &CommandRegistry, input: &str) {
    match commands.execute(ctx, input) {
        Ok(text) if text.is_empty() => {}
        Ok(text) => println!("{text}"),
        Err(err) => println!("❌ {err:#}"),
    }
}
