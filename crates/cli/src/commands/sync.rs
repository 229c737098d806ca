use anyhow::Context;
use clap::{Args, Subcommand};
use serde::Serialize;

use feishu_sync_daemon::client::{ApiClient, ReqwestHttpTransport};
use feishu_sync_daemon::config::{EffectiveConfig, GlobalConfig, WorkspaceConfig};
use feishu_sync_daemon::manifest_store::ManifestStore;
use feishu_sync_daemon::reconcile::reconcile;

use crate::commands::GlobalArgs;
use crate::output::print_output;

#[derive(Args)]
pub struct SyncArgs {
    #[command(subcommand)]
    pub action: SyncAction,
}

#[derive(Subcommand)]
pub enum SyncAction {
    /// Run a single reconciliation pass against the wiki space and exit
    Run {
        /// Run exactly one pass and exit (the only supported mode today)
        #[arg(long)]
        once: bool,
    },
}

#[derive(Serialize)]
struct SyncReport {
    downloaded: usize,
    uploaded: usize,
    deleted_local: usize,
    deleted_remote: usize,
    conflicts: usize,
    skipped: usize,
}

pub async fn run(args: SyncArgs, globals: &GlobalArgs) -> anyhow::Result<()> {
    let SyncAction::Run { once } = args.action;
    if !once {
        anyhow::bail!("continuous sync runs inside the daemon; pass --once, or use `start` to run continuously");
    }

    let global = GlobalConfig::load();
    let workspace = WorkspaceConfig::load(&globals.root);
    let config = EffectiveConfig::resolve(&global, &workspace).context("invalid configuration")?;
    let token = config.bearer_token().context("failed to read bearer token")?;

    let client = ApiClient::<ReqwestHttpTransport>::new().context("failed to build api client")?;
    let store = ManifestStore::new(&config.folder_path);

    let result = reconcile(&client, &token, &config.wiki_space_id, &config.folder_path, &store, "cli")
        .await
        .context("reconciliation failed")?;

    let report = SyncReport {
        downloaded: result.counts.downloaded,
        uploaded: result.counts.uploaded,
        deleted_local: result.counts.deleted_local,
        deleted_remote: result.counts.deleted_remote,
        conflicts: result.counts.conflicts,
        skipped: result.counts.skipped,
    };
    print_output(globals.format, &report, |r| {
        format!(
            "sync complete: {} downloaded, {} uploaded, {} deleted locally, {} deleted remotely, {} conflicts, {} skipped",
            r.downloaded, r.uploaded, r.deleted_local, r.deleted_remote, r.conflicts, r.skipped
        )
    })?;
    Ok(())
}
