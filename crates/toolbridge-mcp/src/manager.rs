//! Connection manager: the table of live endpoint connections.
//!
//! The [`ConnectionManager`] owns every connection record and runs the
//! per-connection state machine:
//!
//! ```text
//!   connect ──► Pending ──handshake ok──► Ready ──transport dies──► Error
//!                  │                        │                        │
//!                  └──handshake fails──► Error                        │
//!                                           └──────── disconnect ◄────┘ (removed)
//! ```
//!
//! Tool discovery runs after the handshake but never blocks the move to
//! `Ready`; a failed discovery just leaves the tool list empty.
//!
//! The manager is cheap to clone. The [`crate::Dispatcher`] and
//! [`crate::HealthMonitor`] hold clones and only touch the narrow
//! `last_error`/`last_activity_at` fields through it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;

use crate::address::{Endpoint, TransportKind, generate_connection_id, normalize_address};
use crate::error::{McpError, Result};
use crate::protocol::{
    self, ClientInfo, InitializeParams, InitializeResult, JsonRpcNotification, ListToolsResult,
    ServerInfo, ToolInfo, methods,
};
use crate::supervisor::{ProcessId, ProcessStatus, ProcessSupervisor};
use crate::transport::{HttpTransport, HttpTransportConfig, StdioTransport, Transport};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Transport acquired, handshake in progress.
    Pending,
    /// Handshake done; callable.
    Ready,
    /// Handshake failed or the transport died.
    Error,
    /// Disconnected. Closed records are removed from the table.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Timeouts and policy for the manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Allow loop-back and private network addresses.
    pub dev_mode: bool,
    /// Handshake deadline. Kept short so dead endpoints fail fast.
    pub handshake_timeout: Duration,
    /// Tool discovery deadline.
    pub discovery_timeout: Duration,
    /// Tool call deadline on Stream connections.
    pub stream_call_timeout: Duration,
    /// Tool call deadline (and overall ceiling) on Network connections.
    pub network_call_timeout: Duration,
    /// Health check deadline.
    pub ping_timeout: Duration,
    /// Extra headers sent to Network endpoints.
    pub http_headers: Vec<(String, String)>,
    /// Client name announced in the handshake.
    pub client_name: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            dev_mode: false,
            handshake_timeout: Duration::from_secs(3),
            discovery_timeout: Duration::from_secs(3),
            stream_call_timeout: Duration::from_secs(5),
            network_call_timeout: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(3),
            http_headers: Vec::new(),
            client_name: ClientInfo::default().name,
        }
    }
}

impl ManagerConfig {
    /// Enable or disable development mode.
    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    /// Set the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the discovery timeout.
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the Stream call timeout.
    pub fn with_stream_call_timeout(mut self, timeout: Duration) -> Self {
        self.stream_call_timeout = timeout;
        self
    }

    /// Set the Network call timeout.
    pub fn with_network_call_timeout(mut self, timeout: Duration) -> Self {
        self.network_call_timeout = timeout;
        self
    }

    /// Set the health check timeout.
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Add a header for Network endpoints.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.http_headers.push((key.into(), value.into()));
        self
    }

    /// Set the client name announced in the handshake.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Call deadline for a transport kind.
    pub fn call_timeout(&self, kind: TransportKind) -> Duration {
        match kind {
            TransportKind::Network => self.network_call_timeout,
            TransportKind::Stream => self.stream_call_timeout,
        }
    }
}

/// A connection record as seen from outside the manager.
#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    /// Opaque id, fixed for the connection's lifetime.
    pub id: String,
    /// Normalized connect target; the deduplication key.
    pub address: String,
    /// Human label.
    pub display_name: String,
    /// Transport in use.
    pub transport: TransportKind,
    /// Current state.
    pub state: ConnectionState,
    /// Tools found by discovery, in endpoint order.
    pub tools: Vec<ToolInfo>,
    /// Last error seen; cleared on the next success.
    pub last_error: Option<String>,
    /// When the connection was created.
    pub connected_at: DateTime<Utc>,
    /// Last successful exchange.
    pub last_activity_at: DateTime<Utc>,
    /// Server identity from the handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    /// Supervisor process backing a Stream connection.
    #[serde(skip)]
    pub process: Option<ProcessId>,
}

impl Connection {
    /// Whether a tool with this name was discovered.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }
}

/// Result of [`ConnectionManager::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOutcome {
    /// Connection id.
    pub id: String,
    /// True if an existing ready connection was returned.
    pub reused: bool,
}

/// Result of [`ConnectionManager::disconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// The connection was closed and removed.
    Disconnected,
    /// The id belonged to a connection that was already removed.
    AlreadyDisconnected,
}

struct ConnectionEntry {
    record: Connection,
    transport: Arc<dyn Transport>,
}

struct Inner {
    config: ManagerConfig,
    supervisor: Arc<dyn ProcessSupervisor>,
    connections: RwLock<HashMap<String, ConnectionEntry>>,
    /// Ids removed by disconnect. Kept outside the table so repeat
    /// disconnects can be told apart from unknown ids.
    retired: Mutex<HashSet<String>>,
    /// One async lock per normalized address; serializes concurrent connects.
    connect_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Inner {
    fn mark_error(&self, id: &str, message: &str) {
        let mut connections = self.connections.write();
        if let Some(entry) = connections.get_mut(id)
            && matches!(
                entry.record.state,
                ConnectionState::Pending | ConnectionState::Ready
            )
        {
            tracing::warn!(connection = %id, error = %message, "connection marked as failed");
            entry.record.state = ConnectionState::Error;
            entry.record.last_error = Some(message.to_string());
        }
    }
}

/// Owner of all endpoint connections.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager that starts Stream endpoints through `supervisor`.
    pub fn new(config: ManagerConfig, supervisor: Arc<dyn ProcessSupervisor>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                supervisor,
                connections: RwLock::new(HashMap::new()),
                retired: Mutex::new(HashSet::new()),
                connect_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The manager's configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Connect to an address, or return the existing ready connection for it.
    ///
    /// Concurrent connects to the same address are serialized: the second
    /// caller waits for the first and then reuses its connection.
    pub async fn connect(&self, address: &str, display_name: Option<&str>) -> Result<ConnectOutcome> {
        let key = normalize_address(address);
        let endpoint = Endpoint::parse(&key, self.inner.config.dev_mode)?;

        let lock = self.connect_lock(&key);
        let guard = lock.lock().await;
        let outcome = self.connect_locked(&key, endpoint, display_name).await;
        drop(guard);
        self.release_connect_lock(&key, lock);
        outcome
    }

    async fn connect_locked(
        &self,
        key: &str,
        endpoint: Endpoint,
        display_name: Option<&str>,
    ) -> Result<ConnectOutcome> {
        if let Some(id) = self.find_ready(key) {
            tracing::debug!(connection = %id, address = %key, "reusing ready connection");
            return Ok(ConnectOutcome { id, reused: true });
        }

        let kind = endpoint.kind();
        let name = display_name
            .map(str::to_string)
            .unwrap_or_else(|| endpoint.default_name());
        let acquired = self.acquire(&endpoint, &name).await?;

        let id = generate_connection_id(key);
        let now = Utc::now();
        let record = Connection {
            id: id.clone(),
            address: key.to_string(),
            display_name: name,
            transport: kind,
            state: ConnectionState::Pending,
            tools: Vec::new(),
            last_error: None,
            connected_at: now,
            last_activity_at: now,
            server_info: None,
            process: acquired.process,
        };
        self.inner.connections.write().insert(
            id.clone(),
            ConnectionEntry {
                record,
                transport: Arc::clone(&acquired.transport),
            },
        );
        tracing::info!(connection = %id, address = %key, transport = %kind, "connecting");

        let server_info = match self.handshake(acquired.transport.as_ref()).await {
            Ok(info) => info,
            Err(e) => {
                let err = McpError::handshake(e.to_string());
                self.inner.mark_error(&id, &err.to_string());
                self.release_transport(&id, acquired.transport.as_ref(), acquired.process)
                    .await;
                return Err(err);
            }
        };

        let tools = match self.try_discover(acquired.transport.as_ref()).await {
            Ok(tools) => tools,
            Err(e) => {
                tracing::warn!(connection = %id, error = %e, "tool discovery failed, continuing without tools");
                Vec::new()
            }
        };

        {
            let mut connections = self.inner.connections.write();
            if let Some(entry) = connections.get_mut(&id) {
                entry.record.state = ConnectionState::Ready;
                entry.record.tools = tools;
                entry.record.server_info = server_info;
                entry.record.last_error = None;
                entry.record.last_activity_at = Utc::now();
                tracing::info!(
                    connection = %id,
                    tool_count = entry.record.tools.len(),
                    "connection ready"
                );
            }
        }

        if let Some(exited) = acquired.exit_signal {
            self.watch_exit(id.clone(), exited);
        }

        Ok(ConnectOutcome { id, reused: false })
    }

    fn connect_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.inner.connect_locks.lock();
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    fn release_connect_lock(&self, key: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.inner.connect_locks.lock();
        // Only the map and this caller hold it: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
    }

    fn find_ready(&self, key: &str) -> Option<String> {
        self.inner
            .connections
            .read()
            .values()
            .find(|e| e.record.state == ConnectionState::Ready && e.record.address == key)
            .map(|e| e.record.id.clone())
    }

    async fn acquire(&self, endpoint: &Endpoint, name: &str) -> Result<AcquiredTransport> {
        match endpoint {
            Endpoint::Network { url } => {
                let mut config = HttpTransportConfig::new(url.as_str())
                    .with_timeout(self.inner.config.network_call_timeout);
                for (key, value) in &self.inner.config.http_headers {
                    config = config.with_header(key, value);
                }
                Ok(AcquiredTransport {
                    transport: Arc::new(HttpTransport::new(config)?),
                    process: None,
                    exit_signal: None,
                })
            }
            Endpoint::Stream { program, args } => {
                let supervisor = &self.inner.supervisor;
                let pid = supervisor.start_process(program, args).await?;

                let info = supervisor.get_process(pid);
                if let Some(info) = info.filter(|i| i.status == ProcessStatus::Exited) {
                    let _ = supervisor.stop_process(pid).await;
                    return Err(McpError::spawn_failure(
                        info.error
                            .unwrap_or_else(|| format!("'{}' exited immediately", program)),
                    ));
                }

                let stream = match supervisor.take_stream(pid) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = supervisor.stop_process(pid).await;
                        return Err(e);
                    }
                };
                let transport = StdioTransport::new(stream, name);
                let exit_signal = transport.exit_signal();
                Ok(AcquiredTransport {
                    transport: Arc::new(transport),
                    process: Some(pid),
                    exit_signal: Some(exit_signal),
                })
            }
        }
    }

    async fn handshake(&self, transport: &dyn Transport) -> Result<Option<ServerInfo>> {
        let mut params = InitializeParams::default();
        params.client_info.name = self.inner.config.client_name.clone();
        let params = serde_json::to_value(params)?;
        let request = protocol::encode(methods::INITIALIZE, Some(params))?;
        let result = transport
            .send(&request, self.inner.config.handshake_timeout)
            .await?
            .into_result()?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::malformed(format!("invalid initialize result: {}", e)))?;

        if let Some(ref info) = init.server_info {
            tracing::info!(
                server = %info.name,
                version = %info.version,
                protocol = %init.protocol_version,
                "endpoint initialized"
            );
        }

        let initialized = JsonRpcNotification::new(methods::INITIALIZED, None);
        if let Err(e) = transport.try_notify(&initialized).await {
            tracing::debug!(error = %e, "initialized notification not delivered");
        }

        Ok(init.server_info)
    }

    /// Ask an endpoint for its tools. Failures are for the caller to log.
    async fn try_discover(&self, transport: &dyn Transport) -> Result<Vec<ToolInfo>> {
        let request = protocol::encode(methods::LIST_TOOLS, None)
            .map_err(|e| McpError::DiscoveryFailure(e.to_string()))?;
        let result = transport
            .send(&request, self.inner.config.discovery_timeout)
            .await
            .and_then(|response| response.into_result())
            .map_err(|e| McpError::DiscoveryFailure(e.to_string()))?;
        let list: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| McpError::DiscoveryFailure(format!("invalid tools/list result: {}", e)))?;
        Ok(list.tools)
    }

    fn watch_exit(&self, id: String, mut exited: watch::Receiver<bool>) {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            // An Err means the transport was dropped, which also ends the process stream.
            let _ = exited.wait_for(|&done| done).await;
            if let Some(inner) = inner.upgrade() {
                inner.mark_error(&id, "process exited");
            }
        });
    }

    /// Close a connection and remove it from the table.
    ///
    /// Network endpoints get a best-effort shutdown notice, abandoned after
    /// the handshake timeout.
    ///
    /// Repeating the call for an id this manager already removed returns
    /// [`DisconnectOutcome::AlreadyDisconnected`]; unknown ids fail with
    /// [`McpError::ConnectionNotFound`].
    pub async fn disconnect(&self, id: &str) -> Result<DisconnectOutcome> {
        let entry = self.inner.connections.write().remove(id);
        let Some(mut entry) = entry else {
            if self.inner.retired.lock().contains(id) {
                return Ok(DisconnectOutcome::AlreadyDisconnected);
            }
            return Err(McpError::ConnectionNotFound(id.to_string()));
        };
        self.inner.retired.lock().insert(id.to_string());

        if entry.record.transport == TransportKind::Network {
            let shutdown = JsonRpcNotification::new(methods::SHUTDOWN, None);
            let notice = entry.transport.try_notify(&shutdown);
            match tokio::time::timeout(self.inner.config.handshake_timeout, notice).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(connection = %id, error = %e, "shutdown notification not delivered");
                }
                Err(_) => {
                    tracing::debug!(connection = %id, "shutdown notification abandoned");
                }
            }
        }
        self.release_transport(id, entry.transport.as_ref(), entry.record.process)
            .await;

        entry.record.state = ConnectionState::Closed;
        tracing::info!(connection = %id, address = %entry.record.address, "disconnected");
        Ok(DisconnectOutcome::Disconnected)
    }

    async fn release_transport(&self, id: &str, transport: &dyn Transport, process: Option<ProcessId>) {
        if let Err(e) = transport.try_close().await {
            tracing::debug!(connection = %id, error = %e, "transport close failed");
        }
        if let Some(pid) = process
            && let Err(e) = self.inner.supervisor.stop_process(pid).await
        {
            tracing::warn!(connection = %id, process = %pid, error = %e, "failed to stop process");
        }
    }

    /// Disconnect everything. Returns how many connections were closed.
    pub async fn disconnect_all(&self) -> usize {
        let ids: Vec<String> = self.inner.connections.read().keys().cloned().collect();
        tracing::info!(count = ids.len(), "disconnecting all connections");

        let mut closed = 0;
        for id in ids {
            if let Ok(DisconnectOutcome::Disconnected) = self.disconnect(&id).await {
                closed += 1;
            }
        }
        closed
    }

    /// Snapshot of every connection, oldest first.
    pub fn list(&self) -> Vec<Connection> {
        let mut all: Vec<Connection> = self
            .inner
            .connections
            .read()
            .values()
            .map(|e| e.record.clone())
            .collect();
        all.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then(a.id.cmp(&b.id)));
        all
    }

    /// Snapshot of one connection.
    pub fn get(&self, id: &str) -> Result<Connection> {
        self.inner
            .connections
            .read()
            .get(id)
            .map(|e| e.record.clone())
            .ok_or_else(|| McpError::ConnectionNotFound(id.to_string()))
    }

    /// Number of connections in the table, in any state.
    pub fn len(&self) -> usize {
        self.inner.connections.read().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.connections.read().is_empty()
    }

    /// Discovered tools of a ready connection.
    pub fn tools(&self, id: &str) -> Result<Vec<ToolInfo>> {
        let connections = self.inner.connections.read();
        let entry = connections
            .get(id)
            .ok_or_else(|| McpError::ConnectionNotFound(id.to_string()))?;
        if entry.record.state != ConnectionState::Ready {
            return Err(McpError::not_connected(id, entry.record.state));
        }
        Ok(entry.record.tools.clone())
    }

    /// Re-run discovery on a ready connection. Returns the new tool count.
    ///
    /// Unlike discovery during connect, a failure here is returned.
    pub async fn refresh_tools(&self, id: &str) -> Result<usize> {
        let transport = self.checkout(id, None)?;
        match self.try_discover(transport.as_ref()).await {
            Ok(tools) => {
                let count = tools.len();
                if let Some(entry) = self.inner.connections.write().get_mut(id) {
                    entry.record.tools = tools;
                }
                self.record_success(id);
                tracing::debug!(connection = %id, tool_count = count, "refreshed tools");
                Ok(count)
            }
            Err(e) => {
                self.record_failure(id, &e);
                Err(e)
            }
        }
    }

    /// Validate a connection for a call and hand out its transport.
    ///
    /// Checks, in order: existence, `Ready` state, tool presence (when
    /// `tool` is given). A Ready connection whose transport has died is
    /// moved to `Error` and reported as not connected.
    pub(crate) fn checkout(&self, id: &str, tool: Option<&str>) -> Result<Arc<dyn Transport>> {
        let transport = self.ready_transport(id, tool)?;
        if !transport.is_alive() {
            self.inner.mark_error(id, "transport is no longer alive");
            return Err(McpError::not_connected(id, ConnectionState::Error));
        }
        Ok(transport)
    }

    /// Like [`Self::checkout`] but never changes state.
    pub(crate) fn ready_transport(&self, id: &str, tool: Option<&str>) -> Result<Arc<dyn Transport>> {
        let connections = self.inner.connections.read();
        let entry = connections
            .get(id)
            .ok_or_else(|| McpError::ConnectionNotFound(id.to_string()))?;
        if entry.record.state != ConnectionState::Ready {
            return Err(McpError::not_connected(id, entry.record.state));
        }
        if let Some(tool) = tool
            && !entry.record.has_tool(tool)
        {
            return Err(McpError::ToolNotFound {
                id: id.to_string(),
                tool: tool.to_string(),
            });
        }
        Ok(Arc::clone(&entry.transport))
    }

    /// Record a successful exchange: refresh activity, clear the last error.
    pub(crate) fn record_success(&self, id: &str) {
        if let Some(entry) = self.inner.connections.write().get_mut(id) {
            entry.record.last_activity_at = Utc::now();
            entry.record.last_error = None;
        }
    }

    /// Record a failed call. A dead transport moves the connection to `Error`.
    pub(crate) fn record_failure(&self, id: &str, error: &McpError) {
        if error.is_transport_dead() {
            self.inner.mark_error(id, &error.to_string());
            return;
        }
        self.record_check_failure(id, error);
    }

    /// Record a failed health check. Never changes state.
    pub(crate) fn record_check_failure(&self, id: &str, error: &McpError) {
        if let Some(entry) = self.inner.connections.write().get_mut(id) {
            entry.record.last_error = Some(error.to_string());
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let connections = self.inner.connections.read();
        f.debug_struct("ConnectionManager")
            .field("connections", &connections.keys().collect::<Vec<_>>())
            .field("dev_mode", &self.inner.config.dev_mode)
            .finish()
    }
}

struct AcquiredTransport {
    transport: Arc<dyn Transport>,
    process: Option<ProcessId>,
    exit_signal: Option<watch::Receiver<bool>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSupervisor, Reply, rpc_responder, tool_server};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer};

    fn manager_with(supervisor: Arc<FakeSupervisor>) -> ConnectionManager {
        let config = ManagerConfig::default()
            .with_handshake_timeout(Duration::from_millis(300))
            .with_discovery_timeout(Duration::from_millis(300));
        ConnectionManager::new(config, supervisor)
    }

    #[tokio::test]
    async fn test_connect_stream_reaches_ready() {
        let supervisor = Arc::new(FakeSupervisor::new(tool_server(&["add", "echo"])));
        let manager = manager_with(Arc::clone(&supervisor));

        let outcome = manager.connect("echo-tool --fast", None).await.unwrap();
        assert!(!outcome.reused);

        let conn = manager.get(&outcome.id).unwrap();
        assert_eq!(conn.state, ConnectionState::Ready);
        assert_eq!(conn.transport, TransportKind::Stream);
        assert_eq!(conn.display_name, "echo-tool");
        assert_eq!(conn.tools.len(), 2);
        assert_eq!(conn.server_info.as_ref().unwrap().name, "scripted");
        assert!(conn.process.is_some());
        assert_eq!(supervisor.spawned(), vec!["echo-tool --fast".to_string()]);
    }

    #[tokio::test]
    async fn test_connect_twice_reuses_ready_connection() {
        let supervisor = Arc::new(FakeSupervisor::new(tool_server(&["add"])));
        let manager = manager_with(Arc::clone(&supervisor));

        let first = manager.connect("echo-tool", None).await.unwrap();
        let second = manager.connect("  echo-tool ", Some("other")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.reused);
        assert_eq!(manager.len(), 1);
        assert_eq!(supervisor.spawned().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_connects_coalesce() {
        let supervisor = Arc::new(FakeSupervisor::new(tool_server(&["add"])));
        let manager = manager_with(Arc::clone(&supervisor));

        let (a, b) = tokio::join!(
            manager.connect("echo-tool", None),
            manager.connect("echo-tool", None)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.id, b.id);
        assert!(a.reused ^ b.reused);
        assert_eq!(manager.len(), 1);
        assert_eq!(supervisor.spawned().len(), 1);
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_no_entry() {
        let supervisor = Arc::new(FakeSupervisor::failing());
        let manager = manager_with(supervisor);

        let err = manager.connect("missing-tool", None).await.unwrap_err();
        assert!(matches!(err, McpError::SpawnFailure(_)));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_process_that_exits_immediately_never_ready() {
        let supervisor = Arc::new(FakeSupervisor::new(Arc::new(|_: &str, _: &serde_json::Value| {
            Reply::Exit
        })));
        let manager = manager_with(Arc::clone(&supervisor));

        let err = manager.connect("echo-tool", None).await.unwrap_err();
        assert!(matches!(
            err,
            McpError::SpawnFailure(_) | McpError::HandshakeFailure(_)
        ));
        assert!(
            manager
                .list()
                .iter()
                .all(|c| c.state != ConnectionState::Ready)
        );
    }

    #[tokio::test]
    async fn test_silent_handshake_fails_fast_and_is_retained() {
        let supervisor = Arc::new(FakeSupervisor::new(Arc::new(|_: &str, _: &serde_json::Value| {
            Reply::Silent
        })));
        let manager = manager_with(Arc::clone(&supervisor));

        let started = tokio::time::Instant::now();
        let err = manager.connect("stuck-tool", None).await.unwrap_err();
        assert!(matches!(err, McpError::HandshakeFailure(_)));
        assert!(started.elapsed() < Duration::from_millis(300) + Duration::from_millis(500));

        let all = manager.list();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].state, ConnectionState::Error);
        assert!(all[0].last_error.as_ref().unwrap().contains("timed out"));
        // The process is stopped even though the record stays for status.
        assert_eq!(supervisor.stopped().len(), 1);
    }

    #[tokio::test]
    async fn test_discovery_failure_does_not_block_ready() {
        let supervisor = Arc::new(FakeSupervisor::new(Arc::new(
            |method: &str, _: &serde_json::Value| match method {
                "initialize" => Reply::Result(json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "serverInfo": {"name": "no-tools", "version": "0.1"}
                })),
                _ => Reply::Error(-32601, "Method not found".to_string()),
            },
        )));
        let manager = manager_with(supervisor);

        let outcome = manager.connect("bare-tool", None).await.unwrap();
        let conn = manager.get(&outcome.id).unwrap();
        assert_eq!(conn.state, ConnectionState::Ready);
        assert!(conn.tools.is_empty());
        assert!(conn.last_error.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_semantics() {
        let supervisor = Arc::new(FakeSupervisor::new(tool_server(&["add"])));
        let manager = manager_with(Arc::clone(&supervisor));
        let id = manager.connect("echo-tool", None).await.unwrap().id;

        assert_eq!(
            manager.disconnect(&id).await.unwrap(),
            DisconnectOutcome::Disconnected
        );
        assert!(manager.is_empty());
        assert_eq!(supervisor.stopped().len(), 1);

        assert_eq!(
            manager.disconnect(&id).await.unwrap(),
            DisconnectOutcome::AlreadyDisconnected
        );
        assert!(matches!(
            manager.disconnect("never-existed").await.unwrap_err(),
            McpError::ConnectionNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_process_exit_marks_error() {
        let supervisor = Arc::new(FakeSupervisor::new(tool_server(&["add"])));
        let manager = manager_with(Arc::clone(&supervisor));
        let id = manager.connect("echo-tool", None).await.unwrap().id;

        supervisor.kill_all();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let conn = manager.get(&id).unwrap();
            if conn.state == ConnectionState::Error {
                assert_eq!(conn.last_error.as_deref(), Some("process exited"));
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "exit never observed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Still listed until explicitly disconnected.
        assert_eq!(manager.len(), 1);
        assert!(matches!(
            manager.tools(&id).unwrap_err(),
            McpError::NotConnected { .. }
        ));
        manager.disconnect(&id).await.unwrap();
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_addresses_rejected_without_entry() {
        let manager = manager_with(Arc::new(FakeSupervisor::new(tool_server(&[]))));
        for address in ["", "ftp://example.com", "http://127.0.0.1:9000"] {
            assert!(matches!(
                manager.connect(address, None).await.unwrap_err(),
                McpError::InvalidAddress { .. }
            ));
        }
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_network_connect_and_graceful_disconnect() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "initialize"})))
            .respond_with(rpc_responder(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "remote", "version": "2.0"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "tools/list"})))
            .respond_with(rpc_responder(json!({"tools": [{"name": "add"}, {"name": "sub"}]})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "notifications/shutdown"})))
            .respond_with(wiremock::ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "notifications/initialized"})))
            .respond_with(wiremock::ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let manager = ConnectionManager::new(
            ManagerConfig::default().with_dev_mode(true),
            Arc::new(FakeSupervisor::new(tool_server(&[]))),
        );
        let outcome = manager.connect(&server.uri(), Some("remote tools")).await.unwrap();
        let conn = manager.get(&outcome.id).unwrap();
        assert_eq!(conn.transport, TransportKind::Network);
        assert_eq!(conn.display_name, "remote tools");
        assert_eq!(
            conn.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            vec!["add", "sub"]
        );

        manager.disconnect(&outcome.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_network_handshake_error_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(|req: &wiremock::Request| {
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
                wiremock::ResponseTemplate::new(200).set_body_json(json!({
                    "jsonrpc": "2.0",
                    "id": body["id"],
                    "error": {"code": -32600, "message": "unsupported protocol version"}
                }))
            })
            .mount(&server)
            .await;

        let manager = ConnectionManager::new(
            ManagerConfig::default().with_dev_mode(true),
            Arc::new(FakeSupervisor::new(tool_server(&[]))),
        );
        let err = manager.connect(&server.uri(), None).await.unwrap_err();
        match err {
            McpError::HandshakeFailure(msg) => assert!(msg.contains("unsupported protocol")),
            other => panic!("expected HandshakeFailure, got {:?}", other),
        }
        assert_eq!(manager.list()[0].state, ConnectionState::Error);
    }

    #[tokio::test]
    async fn test_refresh_tools() {
        let supervisor = Arc::new(FakeSupervisor::new(tool_server(&["add", "echo"])));
        let manager = manager_with(supervisor);
        let id = manager.connect("echo-tool", None).await.unwrap().id;
        assert_eq!(manager.refresh_tools(&id).await.unwrap(), 2);
        assert!(matches!(
            manager.refresh_tools("nope").await.unwrap_err(),
            McpError::ConnectionNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_all() {
        let supervisor = Arc::new(FakeSupervisor::new(tool_server(&["add"])));
        let manager = manager_with(Arc::clone(&supervisor));
        manager.connect("tool-a", None).await.unwrap();
        manager.connect("tool-b", None).await.unwrap();
        assert_eq!(manager.disconnect_all().await, 2);
        assert!(manager.is_empty());
        assert_eq!(supervisor.stopped().len(), 2);
    }

    #[tokio::test]
    async fn test_unanswered_shutdown_notice_does_not_stall_disconnect() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "notifications/shutdown"})))
            .respond_with(wiremock::ResponseTemplate::new(202).set_delay(Duration::from_secs(4)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(rpc_responder(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "tools": []
            })))
            .mount(&server)
            .await;

        let config = ManagerConfig::default()
            .with_dev_mode(true)
            .with_handshake_timeout(Duration::from_millis(300));
        let manager = ConnectionManager::new(config, Arc::new(FakeSupervisor::new(tool_server(&[]))));
        let id = manager.connect(&server.uri(), None).await.unwrap().id;

        let started = std::time::Instant::now();
        assert_eq!(
            manager.disconnect(&id).await.unwrap(),
            DisconnectOutcome::Disconnected
        );
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_only_dead_transport_failures_leave_ready() {
        let supervisor = Arc::new(FakeSupervisor::new(tool_server(&["add"])));
        let manager = manager_with(supervisor);
        let id = manager.connect("calc-tool", None).await.unwrap().id;

        manager.record_failure(&id, &McpError::transport("HTTP error 500"));
        let conn = manager.get(&id).unwrap();
        assert_eq!(conn.state, ConnectionState::Ready);
        assert!(conn.last_error.unwrap().contains("500"));

        manager.record_failure(&id, &McpError::Unreachable("connection refused".to_string()));
        let conn = manager.get(&id).unwrap();
        assert_eq!(conn.state, ConnectionState::Error);
        assert!(conn.last_error.unwrap().contains("unreachable"));
    }
}
