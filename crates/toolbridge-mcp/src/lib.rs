//! Multi-transport tool-protocol client for toolbridge.
//!
//! Connects to external tool endpoints that speak JSON-RPC 2.0, either over
//! HTTP or over a subprocess's stdin/stdout, discovers their tools and routes
//! tool calls to them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpCapability                                              │
//! │  - action name + loose arguments → display string           │
//! └─────────────────────────────────────────────────────────────┘
//!            │                    │                    │
//!            ▼                    ▼                    ▼
//! ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────┐
//! │ ConnectionManager│ │ Dispatcher       │ │ HealthMonitor    │
//! │ - connect/dedup  │ │ - tools/call     │ │ - ping, observe  │
//! │ - state machine  │ │ - no retries     │ │   only           │
//! └──────────────────┘ └──────────────────┘ └──────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Transport                                                  │
//! │  - HttpTransport: one POST per envelope                     │
//! │  - StdioTransport: newline-delimited JSON, id correlation   │
//! └─────────────────────────────────────────────────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ProcessSupervisor (LocalSupervisor on tokio::process)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use toolbridge_mcp::{ConnectionManager, Dispatcher, LocalSupervisor, ManagerConfig};
//!
//! let manager = ConnectionManager::new(ManagerConfig::default(), Arc::new(LocalSupervisor::new()));
//! let conn = manager.connect("mcp-server-sqlite --db /tmp/app.db", None).await?;
//!
//! let dispatcher = Dispatcher::new(manager.clone());
//! let args = serde_json::json!({"sql": "SELECT 1"});
//! let output = dispatcher
//!     .call_tool(&conn.id, "query", args.as_object().cloned().unwrap_or_default())
//!     .await?;
//! println!("{}", output.text);
//!
//! manager.disconnect_all().await;
//! ```
//!
//! # Protocol flow
//!
//! 1. Client sends `initialize`; the endpoint answers with its capabilities
//! 2. Client sends `notifications/initialized`
//! 3. Client calls `tools/list`, then `tools/call` as needed
//! 4. `ping` is used for health checks

pub mod address;
pub mod capability;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod manager;
pub mod protocol;
pub mod supervisor;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types
pub use address::{Endpoint, TransportKind};
pub use capability::{Action, ActionInput, McpCapability};
pub use dispatcher::{Dispatcher, ToolOutput};
pub use error::{McpError, Result};
pub use health::{HealthMonitor, HealthReport, HealthStatus};
pub use manager::{
    ConnectOutcome, Connection, ConnectionManager, ConnectionState, DisconnectOutcome,
    ManagerConfig,
};
pub use protocol::{
    CallToolParams, ClientInfo, EncodedRequest, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult, RequestId, ServerInfo,
    ToolInfo,
};
pub use supervisor::{
    LocalSupervisor, ProcessId, ProcessInfo, ProcessStatus, ProcessStream, ProcessSupervisor,
};
pub use transport::{HttpTransport, HttpTransportConfig, StdioTransport, Transport};
