// Remote event sources (C8): a WebSocket listener for the four document
// event kinds, and a periodic poller that discovers new documents. Both
// forward into the change processor (C7) rather than touching the manifest
// themselves.
//
// The WebSocket connection is behind the `WebSocketTransport` trait so the
// parsing/dispatch/reconnect logic is testable without a live socket, the
// same shape `HttpTransport` gives the API client.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio_tungstenite::tungstenite::Message;

use crate::client::{ApiClient, HttpTransport};
use crate::manifest_store::ManifestStore;
use crate::processor::{ProcessorHandle, RemoteEventKind};
use crate::reconcile::reconcile;

const RECONNECT_BASE_MS: u64 = 1_000;
const RECONNECT_MAX_MS: u64 = 30_000;

/// One decoded remote document event. Payload field names are not fully
/// pinned down by the upstream API docs, so parsing tolerates either
/// `file_token` or `document_id` identifying the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEvent {
    pub document_id: String,
    pub kind: RemoteEventKind,
}

/// Parse one inbound WebSocket text frame into a [`RemoteEvent`], if it's a
/// recognized event type with a usable document id. Unknown event types and
/// frames missing both id fields are silently dropped — the poller and
/// on-demand fallback sync cover anything missed here.
pub fn parse_event(raw: &str) -> Option<RemoteEvent> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let event_type = value.get("type").or_else(|| value.get("event_type")).and_then(Value::as_str)?;
    let kind = match event_type {
        "drive.file.created_in_folder_v1" => RemoteEventKind::CreatedInFolder,
        "drive.file.edit_v1" => RemoteEventKind::Edit,
        "drive.file.title_updated_v1" => RemoteEventKind::TitleUpdated,
        "drive.file.trashed_v1" => RemoteEventKind::Trashed,
        _ => return None,
    };

    let payload = value.get("event").unwrap_or(&value);
    let document_id = payload
        .get("file_token")
        .or_else(|| payload.get("document_id"))
        .and_then(Value::as_str)?
        .to_string();

    Some(RemoteEvent { document_id, kind })
}

/// A live or mock WebSocket connection, abstracted so reconnect/dispatch
/// logic can be exercised without a real socket.
pub trait WebSocketTransport: Send + Sync + 'static {
    fn connect(&self, token: &str) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;

    /// Receive the next text frame, or `None` on a clean/unclean close.
    fn recv(&self) -> impl std::future::Future<Output = anyhow::Result<Option<String>>> + Send;
}

/// Real transport over `tokio-tungstenite`, reconnecting to the configured
/// Feishu long-connection endpoint.
pub struct TungsteniteTransport {
    url: String,
    stream: Mutex<Option<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>>>,
}

impl TungsteniteTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), stream: Mutex::new(None) }
    }
}

impl WebSocketTransport for TungsteniteTransport {
    async fn connect(&self, token: &str) -> anyhow::Result<()> {
        let request = format!("{}?access_token={token}", self.url);
        let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
        *self.stream.lock().await = Some(stream);
        Ok(())
    }

    async fn recv(&self) -> anyhow::Result<Option<String>> {
        use futures_util::StreamExt;

        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Err(anyhow::anyhow!("websocket not connected"));
        };
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(error)) => return Err(error.into()),
            }
        }
    }
}

/// Exponential reconnect backoff starting at 1s, doubling, capped at 30s.
fn reconnect_delay(attempt: u32) -> Duration {
    let exp = attempt.min(5); // 1000 * 2^5 = 32000, clamped below to the 30s cap
    Duration::from_millis(RECONNECT_BASE_MS.saturating_mul(1u64 << exp).min(RECONNECT_MAX_MS))
}

/// Runs the WebSocket dispatcher until `shutdown` fires: connects, forwards
/// every parseable event to the processor, and reconnects with backoff on
/// any disconnect or connect failure.
pub async fn run_websocket_dispatcher<W: WebSocketTransport>(
    transport: Arc<W>,
    token: String,
    processor: ProcessorHandle,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut attempt = 0u32;
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                tracing::info!("websocket dispatcher shutting down");
                return;
            }
            connect_result = transport.connect(&token) => {
                if let Err(error) = connect_result {
                    tracing::warn!(error = %error, attempt, "websocket connect failed, retrying");
                    let delay = reconnect_delay(attempt);
                    attempt += 1;
                    tokio::select! {
                        biased;
                        _ = shutdown.recv() => return,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            }
        }

        attempt = 0;
        tracing::info!("websocket connected");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("websocket dispatcher shutting down");
                    return;
                }
                message = transport.recv() => {
                    match message {
                        Ok(Some(text)) => {
                            if let Some(event) = parse_event(&text) {
                                processor.notify_remote_event(event.document_id, event.kind);
                            } else {
                                tracing::trace!("dropping unrecognized websocket frame");
                            }
                        }
                        Ok(None) => {
                            tracing::warn!("websocket closed, reconnecting");
                            break;
                        }
                        Err(error) => {
                            tracing::warn!(error = %error, "websocket recv failed, reconnecting");
                            break;
                        }
                    }
                }
            }
        }

        let delay = reconnect_delay(attempt);
        attempt += 1;
        tokio::select! {
            biased;
            _ = shutdown.recv() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Runs the periodic poller until `shutdown` fires. Every `interval_seconds`
/// (never if `0`), walks the wiki and runs a full reconciliation to pick up
/// documents created outside this process's watch. Skips a tick entirely if
/// the previous one is still in flight — a slow reconciliation must not
/// pile up overlapping passes.
pub async fn run_poller<T: HttpTransport>(
    client: Arc<ApiClient<T>>,
    token: String,
    space_id: String,
    root_dir: PathBuf,
    store: ManifestStore,
    interval_seconds: u64,
    processor: ProcessorHandle,
    mut shutdown: broadcast::Receiver<()>,
) {
    if interval_seconds == 0 {
        tracing::info!("poller disabled (pollIntervalSeconds=0)");
        return;
    }

    let in_flight = Arc::new(AtomicBool::new(false));
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // first tick fires immediately; the orchestrator already ran initial sync

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                tracing::info!("poller shutting down");
                return;
            }
            _ = ticker.tick() => {
                if in_flight.swap(true, Ordering::SeqCst) {
                    tracing::debug!("poller tick skipped: previous pass still in flight");
                    continue;
                }

                let client = client.clone();
                let token = token.clone();
                let space_id = space_id.clone();
                let root_dir = root_dir.clone();
                let store = store.clone();
                let processor = processor.clone();
                let in_flight = in_flight.clone();

                tokio::spawn(async move {
                    run_poller_tick(&client, &token, &space_id, &root_dir, &store, &processor).await;
                    in_flight.store(false, Ordering::SeqCst);
                });
            }
        }
    }
}

async fn run_poller_tick<T: HttpTransport>(
    client: &ApiClient<T>,
    token: &str,
    space_id: &str,
    root_dir: &std::path::Path,
    store: &ManifestStore,
    processor: &ProcessorHandle,
) {
    match reconcile(client, token, space_id, root_dir, store, "poller").await {
        Ok(report) => {
            processor.request_full_sync("poller-completed");
            tracing::info!(total = report.counts.total(), "poller reconciliation complete");
        }
        Err(error) => tracing::warn!(error = %error, "poller reconciliation failed"),
    }
}

/// Document ids already known to the manifest at startup, used so the
/// orchestrator subscribes each one exactly once per process lifetime.
pub async fn subscribe_known_documents<T: HttpTransport>(
    client: &ApiClient<T>,
    token: &str,
    document_ids: &HashSet<String>,
) {
    for document_id in document_ids {
        if let Err(error) = client.subscribe_document(token, document_id).await {
            tracing::warn!(document_id, error = %error, "failed to subscribe document to events");
        }
    }
}
