// Orchestrator (C9): wires the change processor (C7) and the three event
// sources (C8) together and runs the startup sequence from SPEC_FULL.md
// §4.9. `ignoreLocalChanges`/`lastProcessCompletedAt` live inside the
// change processor's own `IgnoreState` (see processor.rs) rather than being
// duplicated here — every engine-driven write already routes through
// `ChangeProcessor`, so there is exactly one place that marks them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use feishu_sync_common::manifest::Manifest;

use crate::client::{ApiClient, HttpTransport, ReqwestHttpTransport};
use crate::config::EffectiveConfig;
use crate::events::{run_poller, run_websocket_dispatcher, subscribe_known_documents, TungsteniteTransport};
use crate::manifest_store::ManifestStore;
use crate::processor::ChangeProcessor;
use crate::reconcile::reconcile;
use crate::watcher::{run_local_watcher, FileWatcher};

const WEBSOCKET_URL: &str = "wss://open.feishu.cn/callback/ws";

/// A running engine: every background task spawned during startup, plus the
/// shutdown sender used to stop them together.
pub struct Orchestrator {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Run the full startup sequence and return the running engine. The
    /// returned value keeps every background task handle; call
    /// [`Orchestrator::shutdown`] to stop them all and wait for exit.
    pub async fn start(config: &EffectiveConfig) -> Result<Self> {
        let client = Arc::new(ApiClient::<ReqwestHttpTransport>::new().context("failed to build api client")?);
        Self::start_with_client(config, client).await
    }

    pub async fn start_with_client<T: HttpTransport + 'static>(
        config: &EffectiveConfig,
        client: Arc<ApiClient<T>>,
    ) -> Result<Self> {
        let token = config.bearer_token().context("failed to read bearer token")?;
        let store = ManifestStore::new(&config.folder_path);

        // 2. Initial reconciliation pass, if configured.
        if config.initial_sync {
            let report = reconcile(&client, &token, &config.wiki_space_id, &config.folder_path, &store, "startup")
                .await
                .context("initial reconciliation failed")?;
            tracing::info!(total = report.counts.total(), "initial sync complete");
        }

        let manifest = store.load().context("failed to load manifest after startup sync")?.unwrap_or_else(|| {
            Manifest::empty(&config.wiki_space_id, chrono::Utc::now())
        });

        // 3. Subscribe every manifested document to remote events.
        let known_ids: std::collections::HashSet<String> = manifest.docs.keys().cloned().collect();
        subscribe_known_documents(&client, &token, &known_ids).await;

        let (shutdown_tx, _) = broadcast::channel(8);
        let mut tasks = Vec::new();

        // 4. Change processor (C7), every event source feeds this.
        let (processor_handle, processor_task) = ChangeProcessor::spawn(
            client.clone(),
            token.clone(),
            config.wiki_space_id.clone(),
            config.folder_path.clone(),
            store.clone(),
            manifest,
            Duration::from_millis(crate::config::DEBOUNCE_MS),
            Duration::from_millis(crate::config::DEDUPE_WINDOW_MS),
            Duration::from_millis(crate::config::LOCAL_IGNORE_WINDOW_MS),
            shutdown_tx.subscribe(),
        );
        tasks.push(processor_task);

        // 4. Poller.
        let poller_task = tokio::spawn(run_poller(
            client.clone(),
            token.clone(),
            config.wiki_space_id.clone(),
            config.folder_path.clone(),
            store.clone(),
            config.poll_interval_seconds,
            processor_handle.clone(),
            shutdown_tx.subscribe(),
        ));
        tasks.push(poller_task);

        // 5. Local watcher.
        let (watcher, watcher_rx) = FileWatcher::start(&config.folder_path)?;
        let watch_root = watcher.root().to_path_buf();
        let watcher_task = tokio::spawn(run_local_watcher(
            watch_root,
            watcher_rx,
            processor_handle.clone(),
            shutdown_tx.subscribe(),
        ));
        tasks.push(watcher_task);
        // The watcher itself must outlive the bridge task; park it in a task
        // that exits only at shutdown so it isn't dropped early.
        let mut watcher_lifetime_shutdown = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let _watcher = watcher;
            let _ = watcher_lifetime_shutdown.recv().await;
        }));

        // 6. WebSocket dispatcher.
        let ws_transport = Arc::new(TungsteniteTransport::new(WEBSOCKET_URL));
        let ws_task = tokio::spawn(run_websocket_dispatcher(
            ws_transport,
            token.clone(),
            processor_handle,
            shutdown_tx.subscribe(),
        ));
        tasks.push(ws_task);

        Ok(Self { shutdown_tx, tasks })
    }

    /// Broadcast shutdown and wait for every background task to exit. Any
    /// action already in flight either completes (its manifest write lands)
    /// or is abandoned cleanly, since the manifest is only ever written
    /// after the corresponding remote/local write has fully succeeded.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::{HttpMethod, TransportRequest, TransportResponse};
    use serde_json::{json, Value};
    use tempfile::TempDir;

    struct EmptySpaceTransport;

    impl HttpTransport for EmptySpaceTransport {
        async fn send(&self, request: TransportRequest) -> anyhow::Result<TransportResponse> {
            let body: Value = if request.method == HttpMethod::Get && request.url.contains("/nodes") {
                json!({ "code": 0, "data": { "items": [], "has_more": false } })
            } else {
                json!({ "code": 0, "data": {} })
            };
            Ok(TransportResponse { status: 200, retry_after: None, body: Some(body) })
        }
    }

    #[tokio::test]
    async fn startup_sequence_runs_initial_sync_and_spawns_every_task() {
        let dir = TempDir::new().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "secret").unwrap();
        let folder = dir.path().join("wiki");
        std::fs::create_dir_all(&folder).unwrap();

        let config = EffectiveConfig {
            wiki_space_id: "space1".to_string(),
            token_path,
            client_id: None,
            client_secret: None,
            folder_path: folder,
            poll_interval_seconds: 0,
            initial_sync: true,
        };

        let client = Arc::new(ApiClient::with_transport("https://example.test", EmptySpaceTransport));
        let orchestrator = Orchestrator::start_with_client(&config, client).await.unwrap();
        assert_eq!(orchestrator.tasks.len(), 5);
        orchestrator.shutdown().await;

        let manifest_path = config.folder_path.join(feishu_sync_common::manifest::MANIFEST_FILE_NAME);
        assert!(manifest_path.exists());
    }
}
