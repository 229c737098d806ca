// feishu-sync-daemon: standalone mode entry point. Takes the workspace root
// as an optional first argument, defaulting to the current directory — this
// is also the binary the CLI spawns detached via `feishu-sync start --detach`.

use std::path::PathBuf;

use anyhow::Context;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let workspace_root = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .context("could not determine workspace root")?;

    info!(root = %workspace_root.display(), "starting standalone feishu-sync daemon");
    feishu_sync_daemon::runtime::run_standalone(&workspace_root)
        .await
        .context("daemon terminated unexpectedly")
}
