// feishu-sync CLI entry point: starts/stops/checks the sync daemon and runs
// on-demand reconciliation passes.

use std::path::PathBuf;

use clap::Parser;

mod commands;
mod daemon_launcher;
mod exit_code;
mod output;

#[derive(Parser)]
#[command(name = "feishu-sync", about = "Feishu wiki <-> local Markdown sync")]
struct Cli {
    /// Workspace root to operate on (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Force JSON output regardless of whether stdout is a terminal
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: commands::Command,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let root = cli.root.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let code = commands::run(cli.command, root, cli.json).await;
    code.exit();
}
