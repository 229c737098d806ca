// Local filesystem watcher (C8): recursive `notify` watch of the sync root,
// filtered to pairable Markdown files and translated into the same
// create/modify/remove vocabulary the change processor consumes.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, trace, warn};

use crate::processor::{LocalChangeKind, ProcessorHandle};
use crate::walker::local::is_pairable_markdown;

/// Raw filesystem event emitted by the watcher.
/// `run_local_watcher` translates these into change-processor messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEventKind {
    /// File was created or first detected.
    Create,
    /// File content was modified.
    Modify,
    /// File was deleted.
    Remove,
}

/// A raw filesystem event for a single `.md` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
}

/// Capacity for the internal event channel.
const EVENT_CHANNEL_CAPACITY: usize = 512;

/// Watches a workspace directory for `.md` file changes using the OS-native
/// file watcher (fsevents on macOS, inotify on Linux).
///
/// Events are sent to the returned receiver. The watcher runs until dropped
/// or `shutdown()` is called.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Start watching `root` recursively for `.md` file events.
    ///
    /// Returns the watcher handle and a receiver for raw FS events.
    /// The watcher uses the OS-native backend (fsevents on macOS, inotify on Linux).
    pub fn start(root: &Path) -> Result<(Self, mpsc::Receiver<RawFsEvent>)> {
        let root = root
            .canonicalize()
            .with_context(|| format!("failed to canonicalize watch root: {}", root.display()))?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let root_for_filter = root.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if let Some(raw_events) = translate_event(&event, &root_for_filter) {
                        for raw in raw_events {
                            if tx.blocking_send(raw).is_err() {
                                // Receiver dropped — watcher will be cleaned up.
                                debug!("event channel closed, stopping event dispatch");
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "file watcher error");
                }
            }
        })
        .context("failed to create file watcher")?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch directory: {}", root.display()))?;

        debug!(path = %root.display(), "file watcher started");

        Ok((Self { _watcher: watcher, root }, rx))
    }

    /// The canonicalized root directory being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Returns true if the path is a pairable Markdown file: same filter the
/// local walker (C5) applies, so the watcher and a full reconciliation pass
/// never disagree about which files are in scope.
fn is_markdown(path: &Path) -> bool {
    path.file_name().and_then(|name| name.to_str()).is_some_and(is_pairable_markdown)
}

/// Drains `rx` and forwards every event to the change processor as a
/// relative path, until `shutdown` fires or the channel closes.
pub async fn run_local_watcher(
    root: PathBuf,
    mut rx: mpsc::Receiver<RawFsEvent>,
    processor: ProcessorHandle,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                debug!("local watcher bridge shutting down");
                break;
            }
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        let Ok(rel_path) = event.path.strip_prefix(&root) else { continue };
                        let rel_path = rel_path.components()
                            .map(|c| c.as_os_str().to_string_lossy().into_owned())
                            .collect::<Vec<_>>()
                            .join("/");
                        let kind = match event.kind {
                            FsEventKind::Create | FsEventKind::Modify => LocalChangeKind::CreatedOrModified,
                            FsEventKind::Remove => LocalChangeKind::Removed,
                        };
                        processor.notify_local_change(rel_path, kind);
                    }
                    None => break,
                }
            }
        }
    }
}

/// Returns true if the path is inside the watched root (guards against symlink escapes).
fn is_inside_root(path: &Path, root: &Path) -> bool {
    // Use starts_with on the raw path — caller should canonicalize if needed.
    path.starts_with(root)
}

/// Translate a `notify::Event` into zero or more `RawFsEvent`s.
/// Filters for `.md` files inside the root and maps event kinds.
fn translate_event(event: &Event, root: &Path) -> Option<Vec<RawFsEvent>> {
    let kind = match &event.kind {
        EventKind::Create(_) => FsEventKind::Create,
        EventKind::Modify(modify_kind) => {
            use notify::event::ModifyKind;
            match modify_kind {
                // Data or content change — the important one.
                ModifyKind::Data(_) => FsEventKind::Modify,
                // Name changes (renames) — treat as create for the new path.
                ModifyKind::Name(_) => FsEventKind::Modify,
                // Metadata-only changes (permissions, timestamps) — skip.
                ModifyKind::Metadata(_) => {
                    trace!("skipping metadata-only modify event");
                    return None;
                }
                // Catch-all for other/unknown modify kinds — treat as modify.
                _ => FsEventKind::Modify,
            }
        }
        EventKind::Remove(_) => FsEventKind::Remove,
        // Access, Other, Any — not actionable for file content tracking.
        _ => {
            trace!(kind = ?event.kind, "skipping non-content event");
            return None;
        }
    };

    let events: Vec<RawFsEvent> = event
        .paths
        .iter()
        .filter(|p| is_markdown(p))
        .filter(|p| {
            if is_inside_root(p, root) {
                true
            } else {
                warn!(path = %p.display(), "ignoring event outside watch root (possible symlink escape)");
                false
            }
        })
        .map(|p| RawFsEvent { kind: kind.clone(), path: p.clone() })
        .collect();

    if events.is_empty() {
        None
    } else {
        Some(events)
    }
}
