//! Call dispatcher: validated tool calls over a connection's transport.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::manager::ConnectionManager;
use crate::protocol::{self, CallToolParams, methods};

/// Output of a tool call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutput {
    /// The endpoint's result, unchanged.
    pub raw: Value,
    /// Display text: joined text content, or pretty JSON of `raw`.
    pub text: String,
    /// Whether the tool itself reported failure (`isError`).
    pub is_error: bool,
}

/// Routes tool calls to their connection. Never retries.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    manager: ConnectionManager,
}

impl Dispatcher {
    /// Create a dispatcher over a manager's connections.
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    /// Call `tool` on connection `id`.
    ///
    /// Fails without touching the transport when the connection is unknown,
    /// not `Ready`, or has no such tool. Failures are recorded as the
    /// connection's `last_error` and returned as-is.
    pub async fn call_tool(&self, id: &str, tool: &str, args: Map<String, Value>) -> Result<ToolOutput> {
        let transport = self.manager.checkout(id, Some(tool))?;
        let timeout = self.manager.config().call_timeout(transport.kind());

        let params = serde_json::to_value(CallToolParams {
            name: tool.to_string(),
            arguments: Some(Value::Object(args)),
        })?;
        let request = protocol::encode(methods::CALL_TOOL, Some(params))?;
        tracing::debug!(
            connection = %id,
            tool = %tool,
            request_id = %request.id,
            "calling tool"
        );

        let result = transport
            .send(&request, timeout)
            .await
            .and_then(|response| response.into_result());

        match result {
            Ok(raw) => {
                self.manager.record_success(id);
                let is_error = protocol::reports_error(&raw);
                if is_error {
                    tracing::debug!(connection = %id, tool = %tool, "tool reported an error");
                }
                Ok(ToolOutput {
                    text: protocol::normalize_result(&raw),
                    raw,
                    is_error,
                })
            }
            Err(e) => {
                tracing::warn!(connection = %id, tool = %tool, error = %e, "tool call failed");
                self.manager.record_failure(id, &e);
                Err(e)
            }
        }
    }
}
