use std::time::Duration;

use clap::Args;
use serde::Serialize;

use feishu_sync_daemon::startup::{
    is_process_running, read_pid_file, remove_pid_file, terminate_process, DaemonPaths,
};

use crate::commands::GlobalArgs;
use crate::output::print_output;

const STOP_RETRIES: usize = 30;
const STOP_POLL_MS: u64 = 100;

#[derive(Args)]
pub struct StopArgs;

#[derive(Serialize)]
struct StoppedReport {
    pid: u32,
}

pub fn run(_args: StopArgs, globals: &GlobalArgs) -> anyhow::Result<()> {
    let paths = DaemonPaths::resolve(&globals.root)?;
    let Some(pid) = read_pid_file(&paths.pid_path) else {
        anyhow::bail!("daemon is not running (no pid file under {})", paths.state_dir.display());
    };
    if !is_process_running(pid) {
        remove_pid_file(&paths.pid_path);
        anyhow::bail!("daemon is not running (stale pid {pid} cleaned up)");
    }

    terminate_process(pid)?;

    for _ in 0..STOP_RETRIES {
        if !is_process_running(pid) {
            let report = StoppedReport { pid };
            print_output(globals.format, &report, |r| format!("daemon stopped (pid {})", r.pid))?;
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(STOP_POLL_MS));
    }

    anyhow::bail!("daemon (pid {pid}) did not exit after SIGTERM")
}
