// Transport abstraction for the wiki API client: the real HTTP transport and
// a mock used in tests implement the same trait, so retry/pagination logic
// exercises without a network.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub bearer_token: String,
    pub query: Vec<(String, String)>,
    pub json_body: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub body: Option<Value>,
}

pub trait HttpTransport: Send + Sync {
    fn send(&self, request: TransportRequest) -> impl Future<Output = Result<TransportResponse>> + Send;
}

/// The real transport, backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpTransport {
    client: reqwest::Client,
}

impl ReqwestHttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client =
            reqwest::Client::builder().timeout(timeout).build().context("failed to build http client")?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestHttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };
        builder = builder.bearer_auth(&request.bearer_token);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.json_body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("request to `{}` failed", request.url))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response.json::<Value>().await.ok();

        Ok(TransportResponse { status, retry_after, body })
    }
}
