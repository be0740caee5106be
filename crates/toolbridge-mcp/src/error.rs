//! Error types for tool-protocol operations.

use std::time::Duration;

use thiserror::Error;

/// Result type for tool-protocol operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Error type for tool-protocol operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// The endpoint address is malformed or not allowed.
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress {
        /// The address as given by the caller.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Failed to start the endpoint process.
    #[error("failed to spawn endpoint process: {0}")]
    SpawnFailure(String),

    /// The endpoint was reachable but protocol negotiation failed or timed out.
    #[error("handshake failed: {0}")]
    HandshakeFailure(String),

    /// Tool discovery failed. Never fatal for a connect.
    #[error("tool discovery failed: {0}")]
    DiscoveryFailure(String),

    /// No connection with this id exists.
    #[error("connection '{0}' not found")]
    ConnectionNotFound(String),

    /// The connection exists but is not ready for calls.
    #[error("connection '{id}' is not connected (state: {state})")]
    NotConnected {
        /// Connection id.
        id: String,
        /// State the connection was found in.
        state: String,
    },

    /// The tool is not among the connection's discovered tools.
    #[error("tool '{tool}' not found on connection '{id}'")]
    ToolNotFound {
        /// Connection id.
        id: String,
        /// Requested tool name.
        tool: String,
    },

    /// No matching response arrived in time.
    #[error("'{method}' timed out after {}ms", timeout.as_millis())]
    CallTimeout {
        /// Protocol method that timed out.
        method: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The endpoint answered with a structured error envelope.
    #[error("endpoint error {code}: {message}")]
    ProtocolError {
        /// Error code from the endpoint.
        code: i64,
        /// Error message from the endpoint.
        message: String,
        /// Optional additional data.
        data: Option<serde_json::Value>,
    },

    /// Bytes that could not be decoded as a response envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Failed to communicate with the endpoint.
    #[error("transport error: {0}")]
    Transport(String),

    /// The byte stream to the endpoint closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The network endpoint refused the connection or reset it mid-exchange.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    /// A required action parameter was not supplied.
    #[error("missing parameter '{0}'")]
    MissingParameter(String),

    /// An action parameter was supplied with an unusable value.
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The capability entry point does not know the action.
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl McpError {
    /// Create an invalid address error.
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Create a spawn failure error.
    pub fn spawn_failure(msg: impl Into<String>) -> Self {
        Self::SpawnFailure(msg.into())
    }

    /// Create a handshake failure error.
    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::HandshakeFailure(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a malformed envelope error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedEnvelope(msg.into())
    }

    /// Create a protocol error from an error envelope.
    pub fn protocol(code: i64, message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self::ProtocolError {
            code,
            message: message.into(),
            data,
        }
    }

    /// Create a not-connected error.
    pub fn not_connected(id: impl Into<String>, state: impl std::fmt::Display) -> Self {
        Self::NotConnected {
            id: id.into(),
            state: state.to_string(),
        }
    }

    /// Create a call timeout error.
    pub fn timeout(method: impl Into<String>, timeout: Duration) -> Self {
        Self::CallTimeout {
            method: method.into(),
            timeout,
        }
    }

    /// Whether this error means the underlying transport can no longer carry calls.
    pub fn is_transport_dead(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::Unreachable(_))
    }
}
