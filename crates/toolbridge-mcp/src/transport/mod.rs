//! Transport adapters.
//!
//! Both adapters expose the same contract: send one request envelope, get
//! back the response envelope carrying the same id.
//!
//! - [`HttpTransport`]: one HTTP POST per call, stateless between calls.
//! - [`StdioTransport`]: newline-delimited JSON over a subprocess's
//!   stdin/stdout, with responses correlated purely by id.

use std::time::Duration;

use async_trait::async_trait;

use crate::address::TransportKind;
use crate::error::Result;
use crate::protocol::{EncodedRequest, JsonRpcNotification, JsonRpcResponse};

pub mod framing;
mod http;
mod stdio;

pub use http::{HttpTransport, HttpTransportConfig};
pub use stdio::StdioTransport;

/// A channel capable of exchanging envelopes with one endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send an encoded request and wait for the response with the same id.
    ///
    /// Fails with [`crate::McpError::CallTimeout`] if nothing matching
    /// arrives within `timeout`.
    async fn send(&self, request: &EncodedRequest, timeout: Duration) -> Result<JsonRpcResponse>;

    /// Send a notification. Best effort: callers log and discard failures.
    async fn try_notify(&self, notification: &JsonRpcNotification) -> Result<()>;

    /// Which transport this is.
    fn kind(&self) -> TransportKind;

    /// Whether the transport can still carry calls.
    fn is_alive(&self) -> bool;

    /// Release transport resources. Best effort.
    async fn try_close(&self) -> Result<()>;
}
