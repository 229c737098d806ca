// Spawns the daemon detached for a workspace and waits for its PID file to
// appear, mirroring how the foreground/detached split works elsewhere in
// this codebase's process supervision: the child becomes the real daemon and
// writes its own PID file once `Orchestrator::start` succeeds, so "ready" is
// defined as "the PID file exists and names a live process".

use std::env;
use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use feishu_sync_daemon::startup::{is_process_running, read_pid_file, DaemonPaths};

const CONNECT_RETRIES: usize = 20;
const RETRY_DELAY_MS: u64 = 100;

/// Spawn the daemon detached for `workspace_root` and wait until its PID file
/// reports a live process. Returns the PID once confirmed running.
pub async fn spawn_detached(workspace_root: &Path) -> Result<u32> {
    let paths = DaemonPaths::resolve(workspace_root)?;
    if let Some(pid) = read_pid_file(&paths.pid_path) {
        if is_process_running(pid) {
            anyhow::bail!("daemon already running (pid {pid})");
        }
    }

    let exe = self_exe()?;
    let mut command = Command::new(&exe);
    command.arg("start").arg("--root").arg(workspace_root);
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());
    command.stderr(Stdio::null());
    command
        .spawn()
        .with_context(|| format!("failed to spawn detached daemon process `{}`", exe.to_string_lossy()))?;

    wait_for_pid_file(&paths).await
}

fn self_exe() -> Result<OsString> {
    env::current_exe().map(Into::into).context("failed to resolve current executable path")
}

async fn wait_for_pid_file(paths: &DaemonPaths) -> Result<u32> {
    for _ in 0..CONNECT_RETRIES {
        if let Some(pid) = read_pid_file(&paths.pid_path) {
            if is_process_running(pid) {
                return Ok(pid);
            }
        }
        tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
    }

    Err(anyhow!(
        "daemon did not report a running PID at `{}` after {} retries",
        paths.pid_path.display(),
        CONNECT_RETRIES
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn wait_for_pid_file_times_out_when_nothing_ever_writes_it() {
        let dir = TempDir::new().unwrap();
        let paths = DaemonPaths::resolve(dir.path()).unwrap();
        let result = wait_for_pid_file(&paths).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn wait_for_pid_file_returns_pid_once_written() {
        let dir = TempDir::new().unwrap();
        let paths = DaemonPaths::resolve(dir.path()).unwrap();
        feishu_sync_daemon::startup::write_pid_file(&paths.pid_path).unwrap();

        let result = wait_for_pid_file(&paths).await;
        assert_eq!(result.unwrap(), std::process::id());
    }
}
