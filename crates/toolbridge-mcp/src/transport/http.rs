//! Network adapter: one JSON-RPC envelope per HTTP POST.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use super::Transport;
use crate::address::TransportKind;
use crate::error::{McpError, Result};
use crate::protocol::{self, EncodedRequest, JsonRpcNotification, JsonRpcResponse};

/// Ceiling for one exchange unless configured otherwise.
pub const DEFAULT_CEILING: Duration = Duration::from_secs(30);

/// Where and how to POST.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub url: String,
    /// No exchange may take longer than this, whatever the caller asks for.
    pub ceiling: Duration,
    /// Sent on every POST, in order.
    pub headers: Vec<(String, String)>,
}

impl HttpTransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ceiling: DEFAULT_CEILING,
            headers: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Stateless HTTP transport. Holds nothing but the client and the address.
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// Build the transport. No network traffic happens here.
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.ceiling)
            .build()
            .map_err(|e| McpError::transport(format!("cannot build HTTP client: {}", e)))?;
        tracing::debug!(url = %config.url, ceiling_ms = config.ceiling.as_millis() as u64, "network transport ready");

        Ok(Self { client, config })
    }

    fn post(&self, body: Vec<u8>, timeout: Duration) -> reqwest::RequestBuilder {
        self.config.headers.iter().fold(
            self.client
                .post(&self.config.url)
                .timeout(timeout.min(self.config.ceiling))
                .header(CONTENT_TYPE, "application/json")
                .body(body),
            |req, (name, value)| req.header(name, value),
        )
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &EncodedRequest, timeout: Duration) -> Result<JsonRpcResponse> {
        tracing::trace!(
            url = %self.config.url,
            method = %request.method,
            request_id = %request.id,
            "sending HTTP request"
        );

        let resp = self
            .post(request.bytes.clone(), timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    McpError::timeout(&request.method, timeout.min(self.config.ceiling))
                } else if is_unreachable(&e) {
                    McpError::Unreachable(e.to_string())
                } else {
                    McpError::transport(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(McpError::transport(format!("HTTP error {}: {}", status, body)));
        }

        let bytes = resp.bytes().await.map_err(|e| {
            if is_unreachable(&e) {
                McpError::Unreachable(e.to_string())
            } else {
                McpError::transport(format!("failed to read response body: {}", e))
            }
        })?;

        // A single response is the entire payload, so an undecodable body fails the call.
        let response = protocol::decode(&bytes)?;
        if response.id != request.id {
            return Err(McpError::malformed(format!(
                "response id {} does not match request id {}",
                response.id, request.id
            )));
        }

        tracing::trace!(request_id = %response.id, "received HTTP response");
        Ok(response)
    }

    async fn try_notify(&self, notification: &JsonRpcNotification) -> Result<()> {
        let body = serde_json::to_vec(notification)?;
        let resp = self
            .post(body, self.config.ceiling)
            .send()
            .await
            .map_err(|e| McpError::transport(format!("HTTP notification failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(McpError::transport(format!(
                "HTTP notification rejected with {}",
                resp.status()
            )));
        }
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Network
    }

    fn is_alive(&self) -> bool {
        true
    }

    async fn try_close(&self) -> Result<()> {
        Ok(())
    }
}

/// Connection refused, or the socket dropped under an exchange.
fn is_unreachable(err: &reqwest::Error) -> bool {
    if err.is_connect() {
        return true;
    }
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>()
            && matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            )
        {
            return true;
        }
        source = cause.source();
    }
    false
}
