use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use feishu_sync_daemon::manifest_store::ManifestStore;
use feishu_sync_daemon::startup::{is_process_running, read_pid_file, DaemonPaths};

use crate::commands::GlobalArgs;
use crate::output::print_output;

#[derive(Args)]
pub struct StatusArgs;

#[derive(Serialize)]
struct StatusReport {
    root: PathBuf,
    running: bool,
    pid: Option<u32>,
    document_count: usize,
}

pub fn run(_args: StatusArgs, globals: &GlobalArgs) -> anyhow::Result<()> {
    let paths = DaemonPaths::resolve(&globals.root)?;
    let pid = read_pid_file(&paths.pid_path);
    let running = pid.is_some_and(is_process_running);

    let store = ManifestStore::new(&globals.root);
    let document_count = store.load()?.as_ref().map(|m| m.docs.len()).unwrap_or(0);

    let report = StatusReport { root: globals.root.clone(), running, pid: pid.filter(|_| running), document_count };
    print_output(globals.format, &report, |r| {
        if r.running {
            format!(
                "running (pid {}) — {} documents tracked under {}",
                r.pid.unwrap_or_default(),
                r.document_count,
                r.root.display()
            )
        } else {
            format!("not running — {} documents tracked under {}", r.document_count, r.root.display())
        }
    })?;
    Ok(())
}
