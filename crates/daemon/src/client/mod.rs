// Typed wiki API operations, with retry/backoff and pagination built over
// the transport abstraction.

pub mod blocks;
pub mod transport;

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use feishu_sync_common::domain::{FileType, RawWikiNode, RemoteDocument, WikiNode};
use serde_json::{json, Value};

pub use transport::{HttpMethod, HttpTransport, ReqwestHttpTransport, TransportRequest, TransportResponse};

pub const DEFAULT_BASE_URL: &str = "https://open.feishu.cn/open-apis";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const RETRY_BASE_MS: u64 = 1_000;
const RETRY_MAX_MS: u64 = 8_000;
const MAX_RETRIES: u32 = 5;

const WIKI_NODES_PAGE_SIZE: u32 = 50;
const BLOCKS_PAGE_SIZE: u32 = 100;
const MAX_CHILDREN_BATCH: usize = 100;

/// Exponential backoff starting at 1s, doubling, capped at 8s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.min(3); // 1000 * 2^3 = 8000, matches the 8s cap
    let delay_ms = RETRY_BASE_MS.saturating_mul(1u64 << exp).min(RETRY_MAX_MS);
    Duration::from_millis(delay_ms)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    /// Exhausted retries on a 429 or a network-level failure.
    Transient { operation: String, message: String },
    /// Non-zero `code` that isn't a rate-limit signal.
    Permanent { operation: String, code: i64, message: String },
    /// Non-zero `code` whose message indicates the target no longer exists.
    NotFound { operation: String, message: String },
    /// Empty or non-JSON response body.
    Protocol { operation: String, message: String },
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Transient { operation, message } => {
                write!(f, "{operation}: exhausted retries: {message}")
            }
            ApiError::Permanent { operation, code, message } => {
                write!(f, "{operation}: api error {code}: {message}")
            }
            ApiError::NotFound { operation, message } => {
                write!(f, "{operation}: not found: {message}")
            }
            ApiError::Protocol { operation, message } => {
                write!(f, "{operation}: {message}")
            }
        }
    }
}

impl Error for ApiError {}

impl ApiError {
    /// Whether this failure should escalate to a full-sync fallback
    /// (error taxonomy category 5).
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }
}

fn revision_id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn looks_like_not_found(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("not found") || lower.contains("not exist") || lower.contains("no longer exists")
}

/// A single page of wiki nodes. `nodes` includes non-document nodes (plain
/// folders) so the walker can still descend into them via `has_child`; only
/// `RawWikiNode::into_document` narrows to an actual document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiNodePage {
    pub nodes: Vec<RawWikiNode>,
    pub next_page_token: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMeta {
    pub document_id: String,
    pub title: String,
    pub revision_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlocksPage {
    pub blocks: Vec<Value>,
    pub next_page_token: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableBlockResult {
    pub block_id: String,
    pub cell_ids: Vec<String>,
}

/// Typed wiki API operations. Generic over the transport so tests can
/// substitute a mock without a network.
#[derive(Debug, Clone)]
pub struct ApiClient<T: HttpTransport = ReqwestHttpTransport> {
    base_url: String,
    transport: T,
}

impl ApiClient<ReqwestHttpTransport> {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self { base_url: DEFAULT_BASE_URL.to_string(), transport: ReqwestHttpTransport::new(DEFAULT_TIMEOUT)? })
    }
}

impl<T: HttpTransport> ApiClient<T> {
    pub fn with_transport(base_url: impl Into<String>, transport: T) -> Self {
        Self { base_url: base_url.into(), transport }
    }

    async fn call(
        &self,
        operation: &str,
        token: &str,
        method: HttpMethod,
        path: &str,
        query: &[(String, String)],
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;

        loop {
            let request = TransportRequest {
                method,
                url: url.clone(),
                bearer_token: token.to_string(),
                query: query.to_vec(),
                json_body: body.clone(),
            };

            tracing::debug!(operation, %url, attempt, "sending api request");

            let response = self.transport.send(request).await;
            let response = match response {
                Ok(response) => response,
                Err(error) => {
                    if attempt >= MAX_RETRIES {
                        return Err(ApiError::Transient { operation: operation.to_string(), message: error.to_string() });
                    }
                    tracing::warn!(operation, attempt, error = %error, "api call failed, retrying");
                    tokio::time::sleep(backoff_delay(attempt)).await;
                    attempt += 1;
                    continue;
                }
            };

            if response.status == 429 {
                if attempt >= MAX_RETRIES {
                    return Err(ApiError::Transient {
                        operation: operation.to_string(),
                        message: "rate limited after exhausting retries".to_string(),
                    });
                }
                let delay = response.retry_after.unwrap_or_else(|| backoff_delay(attempt));
                tracing::warn!(operation, attempt, delay_ms = delay.as_millis() as u64, "rate limited, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let body = response.body.ok_or_else(|| ApiError::Protocol {
                operation: operation.to_string(),
                message: format!("empty or non-JSON body (http status {})", response.status),
            })?;

            let code = body.get("code").and_then(Value::as_i64).unwrap_or(0);
            if code != 0 {
                let message =
                    body.get("msg").and_then(Value::as_str).unwrap_or("unknown error").to_string();
                tracing::warn!(operation, code, message = %message, "api call returned error code");
                return Err(if looks_like_not_found(&message) {
                    ApiError::NotFound { operation: operation.to_string(), message }
                } else {
                    ApiError::Permanent { operation: operation.to_string(), code, message }
                });
            }

            return Ok(body);
        }
    }

    /// One page of child nodes under `parentNodeToken` (root if `None`).
    pub async fn list_space_nodes_page(
        &self,
        token: &str,
        space_id: &str,
        parent_node_token: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<WikiNodePage, ApiError> {
        let mut query = vec![("page_size".to_string(), WIKI_NODES_PAGE_SIZE.to_string())];
        if let Some(parent) = parent_node_token {
            query.push(("parent_node_token".to_string(), parent.to_string()));
        }
        if let Some(page_token) = page_token {
            query.push(("page_token".to_string(), page_token.to_string()));
        }

        let path = format!("/wiki/v2/spaces/{space_id}/nodes");
        let body = self.call("list_space_nodes", token, HttpMethod::Get, &path, &query, None).await?;

        let data = body.get("data").cloned().unwrap_or(Value::Null);
        let items = data.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
        let nodes = items
            .iter()
            .filter_map(|item| {
                let obj_type = match item.get("obj_type").and_then(Value::as_str) {
                    Some("doc") => Some(FileType::Doc),
                    Some("docx") => Some(FileType::Docx),
                    _ => None,
                };
                Some(RawWikiNode {
                    node_token: item.get("node_token").and_then(Value::as_str)?.to_string(),
                    document_id: item.get("obj_token").and_then(Value::as_str)?.to_string(),
                    title: item.get("title").and_then(Value::as_str).unwrap_or_default().to_string(),
                    obj_type,
                    has_child: item.get("has_child").and_then(Value::as_bool).unwrap_or(false),
                })
            })
            .collect();

        let next_page_token = data.get("page_token").and_then(Value::as_str).map(str::to_string);
        let has_more = data
            .get("has_more")
            .and_then(Value::as_bool)
            .unwrap_or_else(|| next_page_token.as_deref().is_some_and(|s| !s.is_empty()));

        Ok(WikiNodePage { nodes, next_page_token, has_more })
    }

    pub async fn move_docs_to_wiki(
        &self,
        token: &str,
        space_id: &str,
        file_type: FileType,
        obj_token: &str,
    ) -> Result<(), ApiError> {
        let path = format!("/wiki/v2/spaces/{space_id}/nodes/move_docs_to_wiki");
        let body = json!({ "obj_type": file_type.as_str(), "obj_token": obj_token });
        self.call("move_docs_to_wiki", token, HttpMethod::Post, &path, &[], Some(body)).await?;
        Ok(())
    }

    pub async fn get_document(&self, token: &str, document_id: &str) -> Result<DocumentMeta, ApiError> {
        let path = format!("/docx/v1/documents/{document_id}");
        let body = self.call("get_document", token, HttpMethod::Get, &path, &[], None).await?;
        let data = body.get("data").and_then(|d| d.get("document")).cloned().unwrap_or(Value::Null);
        Ok(DocumentMeta {
            document_id: document_id.to_string(),
            title: data.get("title").and_then(Value::as_str).unwrap_or_default().to_string(),
            revision_id: data.get("revision_id").and_then(revision_id_to_string),
        })
    }

    pub async fn get_document_blocks_page(
        &self,
        token: &str,
        document_id: &str,
        page_token: Option<&str>,
    ) -> Result<BlocksPage, ApiError> {
        let mut query = vec![
            ("page_size".to_string(), BLOCKS_PAGE_SIZE.to_string()),
            ("document_revision_id".to_string(), "-1".to_string()),
        ];
        if let Some(page_token) = page_token {
            query.push(("page_token".to_string(), page_token.to_string()));
        }

        let path = format!("/docx/v1/documents/{document_id}/blocks");
        let body = self.call("get_document_blocks", token, HttpMethod::Get, &path, &query, None).await?;
        let data = body.get("data").cloned().unwrap_or(Value::Null);
        let blocks = data.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
        let next_page_token = data.get("page_token").and_then(Value::as_str).map(str::to_string);
        let has_more = data
            .get("has_more")
            .and_then(Value::as_bool)
            .unwrap_or_else(|| next_page_token.as_deref().is_some_and(|s| !s.is_empty()));

        Ok(BlocksPage { blocks, next_page_token, has_more })
    }

    pub async fn get_all_document_blocks(&self, token: &str, document_id: &str) -> Result<Vec<Value>, ApiError> {
        let mut blocks = Vec::new();
        let mut page_token = None;
        loop {
            let page = self.get_document_blocks_page(token, document_id, page_token.as_deref()).await?;
            blocks.extend(page.blocks);
            if !page.has_more {
                break;
            }
            page_token = page.next_page_token;
            if page_token.as_deref().is_none_or(str::is_empty) {
                break;
            }
        }
        Ok(blocks)
    }

    /// Create a document. On failure with a title, retries once without it
    /// (the caller is expected to prepend a heading block afterward).
    pub async fn create_document(&self, token: &str, title: Option<&str>) -> Result<String, ApiError> {
        let body = title.map(|title| json!({ "title": title }));
        let result = self.call("create_document", token, HttpMethod::Post, "/docx/v1/documents", &[], body).await;

        let result = match result {
            Err(_) if title.is_some() => {
                self.call("create_document", token, HttpMethod::Post, "/docx/v1/documents", &[], None).await?
            }
            other => other?,
        };

        let document_id = result
            .get("data")
            .and_then(|d| d.get("document"))
            .and_then(|d| d.get("document_id"))
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::Protocol {
                operation: "create_document".to_string(),
                message: "response missing data.document.document_id".to_string(),
            })?;
        Ok(document_id.to_string())
    }

    /// Appends `children` at `index` under `parent_id`, in batches of ≤100.
    pub async fn append_block_children(
        &self,
        token: &str,
        document_id: &str,
        parent_id: &str,
        index: usize,
        children: &[Value],
    ) -> Result<(), ApiError> {
        let path = format!("/docx/v1/documents/{document_id}/blocks/{parent_id}/children");
        for (batch_index, batch) in children.chunks(MAX_CHILDREN_BATCH).enumerate() {
            let body = json!({ "index": index + batch_index * MAX_CHILDREN_BATCH, "children": batch });
            self.call("append_block_children", token, HttpMethod::Post, &path, &[], Some(body)).await?;
        }
        Ok(())
    }

    /// Deletes all of `parent_id`'s children, `[0, total)` in batches of
    /// ≤100. Deleting always targets the first remaining batch, because
    /// each delete shifts later indices down.
    pub async fn delete_all_children(
        &self,
        token: &str,
        document_id: &str,
        parent_id: &str,
        total: usize,
    ) -> Result<(), ApiError> {
        let path = format!("/docx/v1/documents/{document_id}/blocks/{parent_id}/children/batch_delete");
        let mut remaining = total;
        while remaining > 0 {
            let batch = remaining.min(MAX_CHILDREN_BATCH);
            let body = json!({ "start_index": 0, "end_index": batch });
            let query = vec![("document_revision_id".to_string(), "-1".to_string())];
            self.call("batch_delete_children", token, HttpMethod::Delete, &path, &query, Some(body)).await?;
            remaining -= batch;
        }
        Ok(())
    }

    pub async fn create_table_block(
        &self,
        token: &str,
        document_id: &str,
        parent_id: &str,
        index: usize,
        rows: usize,
        columns: usize,
        header_row: bool,
    ) -> Result<TableBlockResult, ApiError> {
        let path = format!("/docx/v1/documents/{document_id}/blocks/{parent_id}/children");
        let body = json!({
            "index": index,
            "children": [{
                "block_type": "table",
                "table": { "property": { "row_size": rows, "column_size": columns, "header_row": header_row } },
            }],
        });
        let result =
            self.call("create_table_block", token, HttpMethod::Post, &path, &[], Some(body)).await?;

        let children = result.get("data").and_then(|d| d.get("children")).and_then(Value::as_array);
        let table_block = children.and_then(|c| c.first()).ok_or_else(|| ApiError::Protocol {
            operation: "create_table_block".to_string(),
            message: "response missing created table block".to_string(),
        })?;
        let block_id = table_block
            .get("block_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::Protocol {
                operation: "create_table_block".to_string(),
                message: "table block missing block_id".to_string(),
            })?
            .to_string();
        let cell_ids = table_block
            .get("table")
            .and_then(|t| t.get("cells"))
            .and_then(Value::as_array)
            .map(|cells| cells.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        Ok(TableBlockResult { block_id, cell_ids })
    }

    pub async fn subscribe_document(&self, token: &str, document_id: &str) -> Result<(), ApiError> {
        let path = format!("/docx/v1/documents/{document_id}/subscribe");
        self.call("subscribe_document", token, HttpMethod::Post, &path, &[], Some(json!({}))).await?;
        Ok(())
    }

    pub async fn delete_document(&self, token: &str, document_id: &str, file_type: FileType) -> Result<(), ApiError> {
        let path = match file_type {
            FileType::Docx => format!("/docx/v1/documents/{document_id}"),
            FileType::Doc => format!("/doc/v2/{document_id}"),
        };
        self.call("delete_document", token, HttpMethod::Delete, &path, &[], None).await?;
        Ok(())
    }
}

/// Full remote document metadata, as surfaced to the reconciler, built from
/// [`ApiClient::get_document`] plus the wiki-walker-discovered node token.
pub fn to_remote_document(node: &WikiNode, meta: DocumentMeta) -> RemoteDocument {
    RemoteDocument {
        document_id: meta.document_id,
        node_token: node.node_token.clone(),
        title: meta.title,
        revision_id: meta.revision_id,
        file_type: node.obj_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    struct ScriptedTransport {
        responses: Mutex<Vec<Result<TransportResponse, String>>>,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<TransportResponse, String>>) -> Arc<Self> {
            Arc::new(Self { responses: Mutex::new(responses), calls: AtomicU32::new(0) })
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HttpTransport for Arc<ScriptedTransport> {
        async fn send(&self, request: TransportRequest) -> anyhow::Result<TransportResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                panic!("scripted transport ran out of responses");
            }
            match responses.remove(0) {
                Ok(response) => Ok(response),
                Err(message) => Err(anyhow::anyhow!(message)),
            }
        }
    }

    fn ok_response(body: Value) -> TransportResponse {
        TransportResponse { status: 200, retry_after: None, body: Some(body) }
    }

    fn rate_limited(retry_after: Option<Duration>) -> TransportResponse {
        TransportResponse { status: 429, retry_after, body: None }
    }

    #[tokio::test]
    async fn successful_call_returns_body() {
        let transport =
            ScriptedTransport::new(vec![Ok(ok_response(json!({ "code": 0, "msg": "ok", "data": {} })))]);
        let client = ApiClient::with_transport("https://example.test", transport);

        let result = client.get_document("token", "doc1").await.unwrap();
        assert_eq!(result.document_id, "doc1");
    }

    #[tokio::test]
    async fn nonzero_code_fails_immediately_without_retry() {
        let transport = ScriptedTransport::new(vec![Ok(ok_response(
            json!({ "code": 99999, "msg": "permission denied" }),
        ))]);
        let client = ApiClient::with_transport("https://example.test", transport.clone());

        let error = client.get_document("token", "doc1").await.unwrap_err();
        assert!(matches!(error, ApiError::Permanent { code: 99999, .. }));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn not_found_message_is_classified_as_not_found() {
        let transport = ScriptedTransport::new(vec![Ok(ok_response(
            json!({ "code": 1, "msg": "document not found" }),
        ))]);
        let client = ApiClient::with_transport("https://example.test", transport);

        let error = client.get_document("token", "doc1").await.unwrap_err();
        assert!(error.is_not_found());
    }

    #[tokio::test]
    async fn rate_limit_retries_then_succeeds() {
        let transport = ScriptedTransport::new(vec![
            Ok(rate_limited(Some(Duration::from_millis(1)))),
            Ok(rate_limited(None)),
            Ok(ok_response(json!({ "code": 0, "data": {} }))),
        ]);
        let client = ApiClient::with_transport("https://example.test", transport);

        let result = client.get_document("token", "doc1").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn exhausting_retries_on_rate_limit_fails_transiently() {
        let responses = (0..=MAX_RETRIES).map(|_| Ok(rate_limited(Some(Duration::from_millis(1))))).collect();
        let transport = ScriptedTransport::new(responses);
        let client = ApiClient::with_transport("https://example.test", transport);

        let error = client.get_document("token", "doc1").await.unwrap_err();
        assert!(matches!(error, ApiError::Transient { .. }));
    }

    #[tokio::test]
    async fn empty_body_is_a_protocol_error() {
        let transport = ScriptedTransport::new(vec![Ok(TransportResponse {
            status: 200,
            retry_after: None,
            body: None,
        })]);
        let client = ApiClient::with_transport("https://example.test", transport);

        let error = client.get_document("token", "doc1").await.unwrap_err();
        assert!(matches!(error, ApiError::Protocol { .. }));
    }

    #[tokio::test]
    async fn list_space_nodes_page_parses_items() {
        let transport = ScriptedTransport::new(vec![Ok(ok_response(json!({
            "code": 0,
            "data": {
                "items": [
                    { "node_token": "n1", "obj_token": "d1", "obj_type": "docx", "title": "Hello", "has_child": false },
                    { "node_token": "n2", "obj_token": "d2", "obj_type": "folder", "title": "Sub", "has_child": true },
                ],
                "has_more": false,
            },
        })))]);
        let client = ApiClient::with_transport("https://example.test", transport);

        let page = client.list_space_nodes_page("token", "space1", None, None).await.unwrap();
        assert_eq!(page.nodes.len(), 2);
        let documents: Vec<_> = page.nodes.iter().filter(|n| n.obj_type.is_some()).collect();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].document_id, "d1");
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn append_block_children_splits_into_batches() {
        let children: Vec<Value> = (0..150).map(|i| json!({ "block_type": "text", "text": i })).collect();
        let responses = vec![
            Ok(ok_response(json!({ "code": 0, "data": {} }))),
            Ok(ok_response(json!({ "code": 0, "data": {} }))),
        ];
        let transport = ScriptedTransport::new(responses);
        let client = ApiClient::with_transport("https://example.test", transport);

        client.append_block_children("token", "doc1", "doc1", 0, &children).await.unwrap();
    }

    #[tokio::test]
    async fn delete_all_children_batches_until_exhausted() {
        let responses = vec![
            Ok(ok_response(json!({ "code": 0, "data": {} }))),
            Ok(ok_response(json!({ "code": 0, "data": {} }))),
        ];
        let transport = ScriptedTransport::new(responses);
        let client = ApiClient::with_transport("https://example.test", transport);

        client.delete_all_children("token", "doc1", "doc1", 150).await.unwrap();
    }

    #[test]
    fn backoff_delay_doubles_and_caps_at_eight_seconds() {
        assert_eq!(backoff_delay(0), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(1), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(2), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(3), Duration::from_millis(8_000));
        assert_eq!(backoff_delay(10), Duration::from_millis(8_000));
    }
}
