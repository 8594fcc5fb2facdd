use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod context;
mod output;

use commands::ask::run_ask;
use commands::chat::run_chat;
use commands::config::run_config;

#[derive(Parser)]
#[command(name = "ollama-code")]
#[command(about = "Local coding assistant backed by Ollama", long_about = None)]
struct Cli {
    /// Emit machine-readable JSON where a command supports it.
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    session: SessionArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Overrides applied on top of the merged settings files.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct SessionArgs {
    /// Operating mode: read-only, interactive or autonomous.
    #[arg(long, global = true)]
    mode: Option<String>,

    /// Use this model for every task class.
    #[arg(long, global = true)]
    model: Option<String>,

    /// Ollama base URL.
    #[arg(long, global = true)]
    url: Option<String>,

    /// Working directory for file, command and git operations.
    #[arg(short = 'C', long = "workdir", global = true)]
    workdir: Option<PathBuf>,

    /// Log intent decisions and tool calls to stderr.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session (the default).
    Chat {
        /// Sent as the first turn before the prompt appears.
        message: Vec<String>,
    },
    /// Answer one question in read-only mode and exit.
    Ask {
        #[arg(required = true)]
        question: Vec<String>,
    },
    /// Print the effective settings.
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Chat {
        message: Vec::new(),
    }) {
        Commands::Chat { message } => run_chat(&cli.session, &message.join(" ")),
        Commands::Ask { question } => run_ask(&cli.session, &question.join(" "), cli.json),
        Commands::Config => run_config(&cli.session, cli.json),
    }
}
