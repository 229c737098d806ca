// Change processor (C7): a debounced, deduplicated per-document work queue
// with at-most-one in-flight action per documentId.
//
// Structured as an owned actor with an inbox channel (mpsc) and a single
// consumer task, mirroring this codebase's watcher pipeline shape. Per-doc
// debounce state is a plain map consulted on a tick, not a forest of real
// OS timers, so `tokio::time::pause`/`advance` drive it deterministically
// in tests. See SPEC_FULL.md §4.7 and §9's re-architecture hints.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use feishu_sync_common::manifest::Manifest;

use crate::client::{ApiClient, ApiError, HttpTransport};
use crate::manifest_store::ManifestStore;
use crate::reconcile::reconcile;
use crate::sync_ops::{fetch_markdown, replace_document_content};
use crate::walker::local::sha256_hex;

const TICK: Duration = Duration::from_millis(100);

/// The four remote event kinds the event sources forward here. Folder-level
/// creation and trashing both require re-enumerating the tree, so they
/// escalate straight to a full sync instead of a per-document action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteEventKind {
    CreatedInFolder,
    Edit,
    TitleUpdated,
    Trashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalChangeKind {
    CreatedOrModified,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DocAction {
    Refresh,
    Upload,
}

enum ProcessorMessage {
    RemoteEvent { document_id: String, kind: RemoteEventKind },
    LocalChange { rel_path: String, kind: LocalChangeKind },
    RunFullSync { reason: String },
}

/// A cheaply cloneable sender half, handed to every event source (C8).
#[derive(Clone)]
pub struct ProcessorHandle {
    tx: mpsc::UnboundedSender<ProcessorMessage>,
}

impl ProcessorHandle {
    pub fn notify_remote_event(&self, document_id: impl Into<String>, kind: RemoteEventKind) {
        let _ = self.tx.send(ProcessorMessage::RemoteEvent { document_id: document_id.into(), kind });
    }

    pub fn notify_local_change(&self, rel_path: impl Into<String>, kind: LocalChangeKind) {
        let _ = self.tx.send(ProcessorMessage::LocalChange { rel_path: rel_path.into(), kind });
    }

    pub fn request_full_sync(&self, reason: impl Into<String>) {
        let _ = self.tx.send(ProcessorMessage::RunFullSync { reason: reason.into() });
    }
}

/// Tracks per-path "we just wrote this" state so the local watcher can tell
/// its own echo apart from a genuine external edit, without a shared
/// mutable boolean flag guarding the whole pipeline.
#[derive(Default)]
struct IgnoreState {
    last_process_completed_at: StdMutex<Option<Instant>>,
    expected_hashes: StdMutex<HashMap<String, String>>,
}

impl IgnoreState {
    fn mark_engine_write(&self, rel_path: &str, hash: &str) {
        self.expected_hashes.lock().unwrap().insert(rel_path.to_string(), hash.to_string());
        *self.last_process_completed_at.lock().unwrap() = Some(Instant::now());
    }

    /// A full sync may have rewritten any number of local files directly.
    /// Seed the expected-hash set from the fresh manifest so the watcher
    /// doesn't treat those writes as external edits.
    fn mark_full_sync_completed(&self, manifest: &Manifest) {
        let mut expected = self.expected_hashes.lock().unwrap();
        for entry in manifest.docs.values() {
            expected.insert(entry.file.clone(), entry.hash.clone());
        }
        drop(expected);
        *self.last_process_completed_at.lock().unwrap() = Some(Instant::now());
    }

    /// True if `rel_path` currently hashes to exactly what the engine itself
    /// last wrote there, and that write happened within `window`.
    fn should_ignore(&self, rel_path: &str, current_hash: &str, window: Duration) -> bool {
        let Some(completed_at) = *self.last_process_completed_at.lock().unwrap() else {
            return false;
        };
        if completed_at.elapsed() > window {
            return false;
        }
        self.expected_hashes.lock().unwrap().get(rel_path).is_some_and(|h| h == current_hash)
    }
}

/// Coalesces per-document actions: a new push for the same `documentId`
/// replaces any pending one and resets its timer. Ready actions are drained
/// once `debounceMs` has elapsed since the last push.
struct ActionDebouncer {
    window: Duration,
    pending: HashMap<String, (DocAction, Instant)>,
}

impl ActionDebouncer {
    fn new(window: Duration) -> Self {
        Self { window, pending: HashMap::new() }
    }

    fn push_at(&mut self, document_id: String, action: DocAction, now: Instant) {
        self.pending.insert(document_id, (action, now));
    }

    fn drain_ready_at(&mut self, now: Instant) -> Vec<(String, DocAction)> {
        let window = self.window;
        let mut ready = Vec::new();
        self.pending.retain(|document_id, (action, last_seen)| {
            if now.saturating_duration_since(*last_seen) >= window {
                ready.push((document_id.clone(), *action));
                false
            } else {
                true
            }
        });
        ready
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|(_, last_seen)| *last_seen + self.window).min()
    }
}

/// Drops an arriving `(documentId, action)` pair if an identical one was
/// already accepted within `dedupeWindowMs` — a late-arriving duplicate
/// remote notification for a change this process already queued.
struct Dedupe {
    window: Duration,
    last_accepted: HashMap<(String, DocAction), Instant>,
}

impl Dedupe {
    fn new(window: Duration) -> Self {
        Self { window, last_accepted: HashMap::new() }
    }

    fn accept(&mut self, document_id: &str, action: DocAction, now: Instant) -> bool {
        let key = (document_id.to_string(), action);
        if let Some(last) = self.last_accepted.get(&key) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }
        self.last_accepted.insert(key, now);
        true
    }
}

enum ActionError {
    Api(ApiError),
    UnknownPairing,
    Io(String),
}

impl ActionError {
    /// Not-found and unknown-pairing mean our view of the world is stale —
    /// a full sync re-derives it. A local I/O hiccup is transient and
    /// doesn't warrant re-walking the whole tree.
    fn should_fall_back(&self) -> bool {
        match self {
            ActionError::Api(error) => error.is_not_found(),
            ActionError::UnknownPairing => true,
            ActionError::Io(_) => false,
        }
    }
}

impl From<ApiError> for ActionError {
    fn from(error: ApiError) -> Self {
        ActionError::Api(error)
    }
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionError::Api(error) => write!(f, "{error}"),
            ActionError::UnknownPairing => write!(f, "document has no manifest pairing"),
            ActionError::Io(message) => write!(f, "{message}"),
        }
    }
}

pub struct ChangeProcessor<T: HttpTransport> {
    client: Arc<ApiClient<T>>,
    token: String,
    space_id: String,
    root_dir: PathBuf,
    store: ManifestStore,
    manifest: StdMutex<Manifest>,
    ignore: IgnoreState,
    debounce_window: Duration,
    dedupe_window: Duration,
    local_ignore_window: Duration,
}

impl<T: HttpTransport + 'static> ChangeProcessor<T> {
    /// Spawn the actor task, returning a cheaply cloneable handle and the
    /// task's join handle. The actor exits once `shutdown` fires or every
    /// handle clone is dropped.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        client: Arc<ApiClient<T>>,
        token: String,
        space_id: String,
        root_dir: PathBuf,
        store: ManifestStore,
        manifest: Manifest,
        debounce_window: Duration,
        dedupe_window: Duration,
        local_ignore_window: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> (ProcessorHandle, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let processor = Arc::new(Self {
            client,
            token,
            space_id,
            root_dir,
            store,
            manifest: StdMutex::new(manifest),
            ignore: IgnoreState::default(),
            debounce_window,
            dedupe_window,
            local_ignore_window,
        });

        let handle = processor.clone();
        let join = tokio::spawn(async move {
            let mut debouncer = ActionDebouncer::new(handle.debounce_window);
            let mut dedupe = Dedupe::new(handle.dedupe_window);

            loop {
                let sleep_for = debouncer
                    .next_deadline()
                    .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                    .unwrap_or(TICK)
                    .min(TICK);

                tokio::select! {
                    biased;

                    _ = shutdown.recv() => {
                        tracing::info!("change processor shutting down");
                        break;
                    }

                    message = rx.recv() => {
                        match message {
                            Some(message) => handle.handle_message(message, &mut debouncer, &mut dedupe).await,
                            None => break,
                        }
                    }

                    _ = tokio::time::sleep(sleep_for) => {}
                }

                let ready = debouncer.drain_ready_at(Instant::now());
                for (document_id, action) in ready {
                    handle.execute(&document_id, action).await;
                }
            }
        });

        (ProcessorHandle { tx }, join)
    }

    async fn handle_message(
        &self,
        message: ProcessorMessage,
        debouncer: &mut ActionDebouncer,
        dedupe: &mut Dedupe,
    ) {
        match message {
            ProcessorMessage::RemoteEvent { document_id, kind } => {
                self.handle_remote_event(document_id, kind, debouncer, dedupe).await
            }
            ProcessorMessage::LocalChange { rel_path, kind } => {
                self.handle_local_change(rel_path, kind, debouncer, dedupe).await
            }
            ProcessorMessage::RunFullSync { reason } => self.run_full_sync(&reason).await,
        }
    }

    async fn handle_remote_event(
        &self,
        document_id: String,
        kind: RemoteEventKind,
        debouncer: &mut ActionDebouncer,
        dedupe: &mut Dedupe,
    ) {
        match kind {
            RemoteEventKind::Trashed | RemoteEventKind::CreatedInFolder => {
                self.run_full_sync("event").await;
            }
            RemoteEventKind::Edit | RemoteEventKind::TitleUpdated => {
                let now = Instant::now();
                if !dedupe.accept(&document_id, DocAction::Refresh, now) {
                    tracing::trace!(document_id, "dropping duplicate remote event");
                    return;
                }
                debouncer.push_at(document_id, DocAction::Refresh, now);
            }
        }
    }

    async fn handle_local_change(
        &self,
        rel_path: String,
        kind: LocalChangeKind,
        debouncer: &mut ActionDebouncer,
        dedupe: &mut Dedupe,
    ) {
        if kind == LocalChangeKind::Removed {
            self.run_full_sync("local-delete").await;
            return;
        }

        let full_path = self.root_dir.join(&rel_path);
        let current_hash = match std::fs::read(&full_path) {
            Ok(bytes) => sha256_hex(&bytes),
            Err(_) => return,
        };

        if self.ignore.should_ignore(&rel_path, &current_hash, self.local_ignore_window) {
            tracing::trace!(rel_path, "dropping local change: echo of our own write");
            return;
        }

        let document_id = {
            let manifest = self.manifest.lock().unwrap();
            manifest.document_id_for_file(&rel_path).map(str::to_string)
        };
        let Some(document_id) = document_id else {
            tracing::trace!(rel_path, "local change for an unpaired file, leaving it to the next full sync");
            return;
        };

        let now = Instant::now();
        if !dedupe.accept(&document_id, DocAction::Upload, now) {
            tracing::trace!(document_id, "dropping duplicate local change");
            return;
        }
        debouncer.push_at(document_id, DocAction::Upload, now);
    }

    async fn execute(&self, document_id: &str, action: DocAction) {
        let result = match action {
            DocAction::Refresh => self.refresh_document(document_id).await,
            DocAction::Upload => self.upload_document(document_id).await,
        };

        if let Err(error) = result {
            if error.should_fall_back() {
                tracing::warn!(document_id, error = %error, "action failed, falling back to full sync");
                self.run_full_sync("fallback").await;
            } else {
                tracing::warn!(document_id, error = %error, "action failed");
            }
        }
    }

    async fn refresh_document(&self, document_id: &str) -> Result<(), ActionError> {
        let (file, title) = {
            let manifest = self.manifest.lock().unwrap();
            let entry = manifest.entry(document_id).ok_or(ActionError::UnknownPairing)?;
            (entry.file.clone(), entry.title.clone())
        };

        let meta = self.client.get_document(&self.token, document_id).await?;
        let markdown = fetch_markdown(&self.client, &self.token, document_id, &meta.title).await?;
        let new_hash = sha256_hex(markdown.as_bytes());

        let mut manifest = self.manifest.lock().unwrap();
        let Some(entry) = manifest.docs.get_mut(document_id) else {
            return Err(ActionError::UnknownPairing);
        };

        if entry.hash == new_hash {
            entry.revision_id = meta.revision_id;
            entry.title = meta.title;
        } else {
            let full_path = self.root_dir.join(&file);
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ActionError::Io(e.to_string()))?;
            }
            std::fs::write(&full_path, &markdown).map_err(|e| ActionError::Io(e.to_string()))?;
            self.ignore.mark_engine_write(&file, &new_hash);

            entry.revision_id = meta.revision_id;
            entry.title = meta.title;
            entry.hash = new_hash;
        }
        let _ = title;

        self.store.save(&manifest).map_err(|e| ActionError::Io(e.to_string()))?;
        Ok(())
    }

    async fn upload_document(&self, document_id: &str) -> Result<(), ActionError> {
        let file = {
            let manifest = self.manifest.lock().unwrap();
            let entry = manifest.entry(document_id).ok_or(ActionError::UnknownPairing)?;
            entry.file.clone()
        };

        let full_path = self.root_dir.join(&file);
        let Ok(content) = std::fs::read_to_string(&full_path) else {
            // Vanished between the watcher event and now; a delete event (or
            // the next full sync) will pick this up.
            return Ok(());
        };
        let local_hash = sha256_hex(content.as_bytes());

        {
            let manifest = self.manifest.lock().unwrap();
            if manifest.entry(document_id).is_some_and(|entry| entry.hash == local_hash) {
                return Ok(());
            }
        }

        replace_document_content(&self.client, &self.token, document_id, &content).await?;
        let meta = self.client.get_document(&self.token, document_id).await?;

        let mut manifest = self.manifest.lock().unwrap();
        if let Some(entry) = manifest.docs.get_mut(document_id) {
            entry.revision_id = meta.revision_id;
            entry.title = meta.title;
            entry.hash = local_hash;
        }
        self.store.save(&manifest).map_err(|e| ActionError::Io(e.to_string()))?;
        Ok(())
    }

    async fn run_full_sync(&self, reason: &str) {
        let result =
            reconcile(&self.client, &self.token, &self.space_id, &self.root_dir, &self.store, reason).await;
        match result {
            Ok(report) => {
                if let Ok(Some(fresh)) = self.store.load() {
                    self.ignore.mark_full_sync_completed(&fresh);
                    *self.manifest.lock().unwrap() = fresh;
                }
                tracing::info!(reason, total = report.counts.total(), "full sync complete");
            }
            Err(error) => tracing::warn!(reason, error = %error, "full sync failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::{HttpMethod, TransportRequest, TransportResponse};
    use chrono::Utc;
    use feishu_sync_common::domain::FileType;
    use feishu_sync_common::manifest::ManifestEntry;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingTransport {
        calls: AtomicUsize,
        blocks_text: String,
    }

    impl HttpTransport for Arc<CountingTransport> {
        async fn send(&self, request: TransportRequest) -> anyhow::Result<TransportResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.method == HttpMethod::Get && request.url.contains("/blocks") {
                return Ok(ok(json!({
                    "code": 0,
                    "data": {
                        "items": [{ "block_type": "text", "text": { "elements": [{ "text_run": { "content": self.blocks_text } }] } }],
                        "has_more": false,
                    },
                })));
            }
            if request.method == HttpMethod::Get {
                return Ok(ok(json!({ "code": 0, "data": { "document": { "document_id": "d1", "title": "Hello", "revision_id": "r2" } } })));
            }
            Ok(ok(json!({ "code": 0, "data": {} })))
        }
    }

    fn ok(body: Value) -> TransportResponse {
        TransportResponse { status: 200, retry_after: None, body: Some(body) }
    }

    fn manifest_with_one_doc() -> Manifest {
        let mut manifest = Manifest::empty("space1", Utc::now());
        manifest.docs.insert(
            "d1".to_string(),
            ManifestEntry {
                file: "Hello.md".to_string(),
                revision_id: Some("r1".to_string()),
                title: "Hello".to_string(),
                file_type: FileType::Docx,
                hash: sha256_hex(b"# Hello\n\nOld.\n"),
            },
        );
        manifest
    }

    #[tokio::test(start_paused = true)]
    async fn five_edit_events_produce_exactly_one_refresh() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Hello.md"), "# Hello\n\nOld.\n").unwrap();
        let store = ManifestStore::new(dir.path());
        store.save(&manifest_with_one_doc()).unwrap();

        let transport =
            Arc::new(CountingTransport { calls: AtomicUsize::new(0), blocks_text: "New content.".to_string() });
        let client = Arc::new(ApiClient::with_transport("https://example.test", transport.clone()));
        let (_tx, _rx) = broadcast::channel(1);

        let (handle, join) = ChangeProcessor::spawn(
            client,
            "token".to_string(),
            "space1".to_string(),
            dir.path().to_path_buf(),
            store.clone(),
            manifest_with_one_doc(),
            Duration::from_millis(3_000),
            Duration::from_millis(600_000),
            Duration::from_millis(2_000),
            _tx.subscribe(),
        );

        for _ in 0..5 {
            handle.notify_remote_event("d1", RemoteEventKind::Edit);
            tokio::time::advance(Duration::from_millis(200)).await;
        }
        tokio::time::advance(Duration::from_millis(3_500)).await;
        tokio::task::yield_now().await;

        drop(handle);
        let _ = tokio::time::timeout(Duration::from_millis(50), join).await;

        let manifest = store.load().unwrap().unwrap();
        assert_eq!(manifest.docs["d1"].revision_id.as_deref(), Some("r2"));
        let written = std::fs::read_to_string(dir.path().join("Hello.md")).unwrap();
        assert!(written.contains("New content."));
    }

    #[tokio::test]
    async fn dedupe_drops_identical_action_within_window() {
        let mut dedupe = Dedupe::new(Duration::from_millis(600_000));
        let now = Instant::now();
        assert!(dedupe.accept("d1", DocAction::Refresh, now));
        assert!(!dedupe.accept("d1", DocAction::Refresh, now + Duration::from_millis(10)));
        assert!(dedupe.accept("d1", DocAction::Refresh, now + Duration::from_millis(700_000)));
    }

    #[test]
    fn debouncer_coalesces_repeated_pushes_into_one_pending_action() {
        let mut debouncer = ActionDebouncer::new(Duration::from_millis(100));
        let t0 = Instant::now();
        debouncer.push_at("d1".to_string(), DocAction::Refresh, t0);
        debouncer.push_at("d1".to_string(), DocAction::Refresh, t0 + Duration::from_millis(50));

        assert!(debouncer.drain_ready_at(t0 + Duration::from_millis(80)).is_empty());
        let ready = debouncer.drain_ready_at(t0 + Duration::from_millis(160));
        assert_eq!(ready, vec![("d1".to_string(), DocAction::Refresh)]);
    }

    #[test]
    fn ignore_state_suppresses_only_matching_hash_within_window() {
        let state = IgnoreState::default();
        state.mark_engine_write("Hello.md", "abc");
        assert!(state.should_ignore("Hello.md", "abc", Duration::from_millis(2_000)));
        assert!(!state.should_ignore("Hello.md", "different", Duration::from_millis(2_000)));
        assert!(!state.should_ignore("Other.md", "abc", Duration::from_millis(2_000)));
    }
}
