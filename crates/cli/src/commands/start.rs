use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use serde::Serialize;

use feishu_sync_daemon::runtime::run_standalone;

use crate::commands::GlobalArgs;
use crate::daemon_launcher::spawn_detached;
use crate::output::print_output;

#[derive(Args)]
pub struct StartArgs {
    /// Spawn the daemon as a detached background process and return immediately
    #[arg(long)]
    pub detach: bool,
}

#[derive(Serialize)]
struct StartedReport {
    root: PathBuf,
    pid: u32,
    detached: bool,
}

pub async fn run(args: StartArgs, globals: &GlobalArgs) -> anyhow::Result<()> {
    if args.detach {
        let pid = spawn_detached(&globals.root).await.context("failed to start daemon detached")?;
        let report = StartedReport { root: globals.root.clone(), pid, detached: true };
        print_output(globals.format, &report, |r| {
            format!("daemon started (pid {}) for {}", r.pid, r.root.display())
        })?;
        return Ok(());
    }

    run_standalone(&globals.root).await.context("daemon exited with an error")
}
