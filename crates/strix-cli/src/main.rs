//! strix - an educational Discord bot that lets the backend pick the model.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

/// strix: a Discord bot for the classroom
///
/// Canned CSV rules answer the easy questions; everything else is routed
/// to an LLM backend that picks its own model for each request.
#[derive(Debug, Parser)]
#[command(name = "strix")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Settings file (defaults to ./strix.toml, then the user config dir).
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
}

/// Available commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Start the Discord bot and serve messages until stopped.
    Run,

    /// Send one prompt through the two-phase pipeline and print the answer.
    ///
    /// Useful for poking at a backend without involving Discord at all.
    Ask(commands::AskArgs),

    /// List the backend's models with sizes and the current recommendation.
    Models,

    /// Check the deployment: token, rules file, backend reachability.
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Classroom deployments keep their secrets in .env next to the binary.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = strix_core::Settings::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run => commands::run(settings).await,
        Command::Ask(args) => commands::ask(settings, args).await,
        Command::Models => commands::models(settings).await,
        Command::Doctor => commands::doctor(settings).await,
    }
}
