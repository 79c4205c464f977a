//! RPC transport layer
//!
//! The gateway talks JSON-RPC through this trait so endpoint selection,
//! backoff, and failover can be exercised against scripted transports in
//! tests. The production implementation is a reqwest client with gzip and
//! an explicit per-request timeout.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, USER_AGENT};
use std::time::Duration;

use crate::models::errors::{EngineError, EngineResult};
use crate::utils::constants::USER_AGENT as USER_AGENT_CONST;

/// One JSON-RPC exchange against one endpoint URL. Implementations return
/// the raw response body; classification of the JSON-RPC error object is
/// the gateway's job.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn send(&self, url: &str, payload: &serde_json::Value)
        -> EngineResult<serde_json::Value>;
}

/// Production HTTP transport
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build the client with gzip compression and a hard request timeout.
    /// Exceeding the timeout is a provider failure, never a hang.
    pub fn new(timeout: Duration) -> EngineResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_CONST));
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| {
                EngineError::config_invalid(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> EngineResult<serde_json::Value> {
        let response = self.client.post(url).json(payload).send().await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(EngineError::rpc_rate_limited());
        }
        if !status.is_success() {
            return Err(EngineError::rpc_error(format!("HTTP error: {}", status)));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::rpc_invalid_response(format!("body parse failed: {}", e)))?;

        Ok(body)
    }
}
