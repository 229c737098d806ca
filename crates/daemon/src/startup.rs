// Process supervision (C11): PID file under a predictable per-workspace
// path, a stale-PID check on start, and the primitives the CLI's `stop`
// subcommand uses to signal a running daemon. There is no daemon RPC
// surface in this system — `stop` works by PID and SIGTERM, not a socket
// protocol.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::security::{ensure_owner_only_dir, ensure_owner_only_file};

const PID_FILE_NAME: &str = "daemon.pid";

/// Resolved paths for one workspace's daemon runtime state, rooted at
/// `<rootDir>/.feishu-sync/`.
pub struct DaemonPaths {
    pub state_dir: PathBuf,
    pub pid_path: PathBuf,
}

impl DaemonPaths {
    /// Resolve paths for the daemon supervising `workspace_root`.
    pub fn resolve(workspace_root: &Path) -> Result<Self> {
        let state_dir = workspace_root.join(".feishu-sync");
        fs::create_dir_all(&state_dir).context("failed to create .feishu-sync state directory")?;
        ensure_owner_only_dir(&state_dir)?;
        Ok(Self { pid_path: state_dir.join(PID_FILE_NAME), state_dir })
    }
}

/// Write the current process PID to `pid_path`.
pub fn write_pid_file(path: &Path) -> Result<()> {
    let pid = std::process::id();
    let mut file = fs::File::create(path).context("failed to create PID file")?;
    write!(file, "{pid}").context("failed to write PID")?;
    ensure_owner_only_file(path)?;
    info!(pid, path = %path.display(), "wrote PID file");
    Ok(())
}

/// Remove the PID file on shutdown. Missing is not an error.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(error = %e, "failed to remove PID file");
        }
    }
}

/// Read the PID recorded in `path`, if any.
pub fn read_pid_file(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Whether `pid` currently refers to a live process. Sends signal `0`,
/// which performs the existence check without actually signaling anything.
#[cfg(unix)]
pub fn is_process_running(pid: u32) -> bool {
    // SAFETY: kill(pid, 0) only probes process existence/permission; it does
    // not deliver a signal.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
pub fn is_process_running(_pid: u32) -> bool {
    false
}

/// Send SIGTERM to `pid`, requesting graceful shutdown.
#[cfg(unix)]
pub fn terminate_process(pid: u32) -> Result<()> {
    // SAFETY: standard `kill(2)` call with a real signal number.
    let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if result != 0 {
        anyhow::bail!("failed to signal pid {pid}");
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn terminate_process(_pid: u32) -> Result<()> {
    anyhow::bail!("process termination is only supported on unix")
}

/// Stale-PID check on start: if a PID file exists but the process it names
/// is no longer alive, the file is cleaned up and startup proceeds.
pub fn check_stale_pid(paths: &DaemonPaths) -> Result<()> {
    let Some(pid) = read_pid_file(&paths.pid_path) else { return Ok(()) };
    if is_process_running(pid) {
        anyhow::bail!("daemon already running (pid {pid})");
    }
    tracing::warn!(pid, "removing stale PID file from a process that is no longer running");
    remove_pid_file(&paths.pid_path);
    Ok(())
}
