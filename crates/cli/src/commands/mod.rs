// CLI subcommand dispatch.

use std::path::PathBuf;

use clap::Subcommand;

pub mod start;
pub mod status;
pub mod stop;
pub mod sync;

use crate::exit_code::ExitCode;
use crate::output::OutputFormat;

#[derive(Subcommand)]
pub enum Command {
    /// Start the sync daemon
    Start(start::StartArgs),
    /// Show whether the daemon is running and basic sync state
    Status(status::StatusArgs),
    /// Stop a running daemon
    Stop(stop::StopArgs),
    /// Run reconciliation passes on demand
    Sync(sync::SyncArgs),
}

/// Shared arguments every subcommand accepts: the workspace root and output
/// format selection.
pub struct GlobalArgs {
    pub root: PathBuf,
    pub format: OutputFormat,
}

pub async fn run(cmd: Command, root: PathBuf, json: bool) -> ExitCode {
    let format = OutputFormat::detect(json);
    let globals = GlobalArgs { root, format };

    let result = match cmd {
        Command::Start(args) => start::run(args, &globals).await,
        Command::Status(args) => status::run(args, &globals),
        Command::Stop(args) => stop::run(args, &globals),
        Command::Sync(args) => sync::run(args, &globals).await,
    };

    match result {
        Ok(()) => ExitCode::Success,
        Err(error) => {
            crate::output::print_anyhow_error(format, &error);
            ExitCode::Error
        }
    }
}
