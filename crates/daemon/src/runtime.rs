// Standalone daemon entry point: resolves configuration, runs the
// orchestrator's startup sequence, and blocks until SIGTERM/ctrl-c, then
// shuts every background task down cleanly. See SPEC_FULL.md §4.9, §5.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{EffectiveConfig, GlobalConfig, WorkspaceConfig};
use crate::orchestrator::Orchestrator;
use crate::startup::{check_stale_pid, remove_pid_file, write_pid_file, DaemonPaths};

/// Run the daemon in the foreground for `workspace_root`, returning once a
/// shutdown signal is received and every task has wound down.
pub async fn run_standalone(workspace_root: &Path) -> Result<()> {
    let global = GlobalConfig::load();
    let workspace = WorkspaceConfig::load(workspace_root);
    let config = EffectiveConfig::resolve(&global, &workspace).context("invalid configuration")?;

    let paths = DaemonPaths::resolve(workspace_root)?;
    check_stale_pid(&paths)?;
    write_pid_file(&paths.pid_path)?;

    let result = run_until_shutdown(&config).await;

    remove_pid_file(&paths.pid_path);
    result
}

async fn run_until_shutdown(config: &EffectiveConfig) -> Result<()> {
    let orchestrator = Orchestrator::start(config).await.context("failed to start sync engine")?;
    info!(folder = %config.folder_path.display(), "sync daemon started");

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping sync engine");
    orchestrator.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(signal) => signal,
        Err(error) => {
            tracing::warn!(error = %error, "failed to install SIGTERM handler, waiting on ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = terminate.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn run_standalone_fails_fast_on_missing_configuration() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("HOME", dir.path());

        let error = run_standalone(dir.path()).await.unwrap_err();
        assert!(error.to_string().contains("invalid configuration"));
    }
}
