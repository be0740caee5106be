//! JSON-RPC 2.0 envelope types and the wire codec.
//!
//! Both transports exchange the same envelopes. The Stream transport adds
//! newline framing on top (see [`crate::transport::framing`]); the codec itself
//! never appends a terminator.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{McpError, Result};

/// Value of the `jsonrpc` member on every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version advertised during the handshake.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Protocol method names used by this client.
pub mod methods {
    /// Handshake request.
    pub const INITIALIZE: &str = "initialize";
    /// Sent after a successful handshake.
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Tool discovery.
    pub const LIST_TOOLS: &str = "tools/list";
    /// Tool invocation.
    pub const CALL_TOOL: &str = "tools/call";
    /// Liveness check.
    pub const PING: &str = "ping";
    /// Graceful shutdown notice for network endpoints.
    pub const SHUTDOWN: &str = "notifications/shutdown";
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next process-wide request id.
///
/// Ids are unique across every connection and never reused.
pub fn next_request_id() -> RequestId {
    RequestId::Number(NEXT_REQUEST_ID.fetch_add(1, Ordering::SeqCst))
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON-RPC Base Types
// ─────────────────────────────────────────────────────────────────────────────

/// Correlation id of a request. Endpoints may echo numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id (the only kind this client allocates).
    Number(u64),
    /// String id.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self::Number(id)
    }
}

/// An outbound call. `id` ties the eventual response back to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// A request with a caller-chosen id. Live calls use [`Self::next`].
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Create a request carrying the next process-wide id.
    pub fn next(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::new(next_request_id(), method, params)
    }
}

/// A fire-and-forget message: no id, never answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// An inbound answer. Exactly one of `result` and `error` is expected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The result value, or the error object as [`McpError::ProtocolError`].
    ///
    /// A success envelope without `result` yields `null`.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(error) => Err(McpError::protocol(error.code, error.message, error.data)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// The `error` member of a failed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Codec
// ─────────────────────────────────────────────────────────────────────────────

/// A request serialized for the wire, unframed.
#[derive(Debug, Clone)]
pub struct EncodedRequest {
    pub id: RequestId,
    /// Kept for logs and timeout errors.
    pub method: String,
    pub bytes: Vec<u8>,
}

/// Encode a call: allocates the next id and serializes the request envelope.
pub fn encode(method: &str, params: Option<Value>) -> Result<EncodedRequest> {
    encode_request(JsonRpcRequest::next(method, params))
}

pub(crate) fn encode_request(request: JsonRpcRequest) -> Result<EncodedRequest> {
    let bytes = serde_json::to_vec(&request)?;
    Ok(EncodedRequest {
        id: request.id,
        method: request.method,
        bytes,
    })
}

/// Shape used only to reject inbound requests/notifications during decode.
#[derive(Deserialize)]
struct InboundShape {
    #[serde(default)]
    method: Option<String>,
}

/// Decode a raw response envelope.
///
/// Anything that is not a response carrying an id (invalid JSON, a
/// notification, a server-initiated request) is reported as
/// [`McpError::MalformedEnvelope`]. Whether that is fatal is up to the caller.
pub fn decode(bytes: &[u8]) -> Result<JsonRpcResponse> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| McpError::malformed(format!("invalid JSON: {}", e)))?;

    if let Ok(shape) = InboundShape::deserialize(&value)
        && let Some(method) = shape.method
    {
        return Err(McpError::malformed(format!(
            "expected a response, got message for method '{}'",
            method
        )));
    }

    serde_json::from_value(value).map_err(|e| McpError::malformed(e.to_string()))
}

/// Render a raw tool result as display text.
///
/// Text-typed content items are joined with newlines; anything else falls
/// back to pretty-printed JSON of the whole result.
pub fn normalize_result(result: &Value) -> String {
    if let Some(items) = result.get("content").and_then(Value::as_array) {
        let texts: Vec<&str> = items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect();
        if !texts.is_empty() {
            return texts.join("\n");
        }
    }
    serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Protocol Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Who is connecting. Sent as `clientInfo` in the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "toolbridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// `initialize` request body. The client advertises no optional capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: Value::Object(Default::default()),
            client_info: ClientInfo::default(),
        }
    }
}

/// Endpoint identity from the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    /// Some endpoints omit it.
    #[serde(default)]
    pub version: String,
}

/// `initialize` response body.
///
/// Capabilities are kept as raw JSON; nothing here negotiates on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

/// One discovered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    /// Unique within its connection.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for the arguments, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// `tools/list` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolInfo>,
}

/// `tools/call` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// Whether a raw `tools/call` result reports a tool-level failure.
pub fn reports_error(result: &Value) -> bool {
    result.get("isError").and_then(Value::as_bool).unwrap_or(false)
}
