//! Integration tests against the mock tool server subprocess.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};
use toolbridge_mcp::{
    ActionInput, ConnectionManager, ConnectionState, DisconnectOutcome, Dispatcher, HealthMonitor,
    HealthStatus, LocalSupervisor, ManagerConfig, McpCapability, McpError, TransportKind,
};

/// Path to the mock tool server built alongside these tests.
fn mock_server() -> &'static str {
    env!("CARGO_BIN_EXE_mock-tool-server")
}

fn address(flags: &str) -> String {
    format!("{} {}", mock_server(), flags).trim().to_string()
}

fn manager() -> ConnectionManager {
    let config = ManagerConfig::default()
        .with_handshake_timeout(Duration::from_secs(5))
        .with_stream_call_timeout(Duration::from_millis(400));
    ConnectionManager::new(config, Arc::new(LocalSupervisor::new()))
}

fn args(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

async fn wait_for_state(manager: &ConnectionManager, id: &str, state: ConnectionState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while manager.get(id).map(|c| c.state).ok() != Some(state) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "connection {} never reached {}",
            id,
            state
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_connect_discover_and_call() {
    let manager = manager();
    let outcome = manager.connect(&address(""), Some("mock")).await.unwrap();
    assert!(!outcome.reused);

    let conn = manager.get(&outcome.id).unwrap();
    assert_eq!(conn.state, ConnectionState::Ready);
    assert_eq!(conn.transport, TransportKind::Stream);
    assert_eq!(conn.server_info.as_ref().unwrap().name, "mock-tool-server");
    let names: Vec<&str> = conn.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "add", "slow", "crash"]);

    let dispatcher = Dispatcher::new(manager.clone());
    let echoed = dispatcher
        .call_tool(&outcome.id, "echo", args(json!({"message": "Hello, tools!"})))
        .await
        .unwrap();
    assert_eq!(echoed.text, "Hello, tools!");

    let sum = dispatcher
        .call_tool(&outcome.id, "add", args(json!({"a": 5, "b": 7})))
        .await
        .unwrap();
    assert_eq!(sum.text, "12");
    assert!(!sum.is_error);

    assert_eq!(manager.disconnect_all().await, 1);
}

#[tokio::test]
async fn test_stdout_noise_is_skipped() {
    let manager = manager();
    let id = manager.connect(&address("--noise"), None).await.unwrap().id;
    assert_eq!(manager.tools(&id).unwrap().len(), 4);

    let output = Dispatcher::new(manager.clone())
        .call_tool(&id, "add", args(json!({"a": 1, "b": 2})))
        .await
        .unwrap();
    assert_eq!(output.text, "3");
    manager.disconnect(&id).await.unwrap();
}

#[tokio::test]
async fn test_same_address_is_deduplicated() {
    let manager = manager();
    let addr = address("");
    let (a, b) = tokio::join!(
        manager.connect(&addr, None),
        manager.connect(&addr, None)
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.id, b.id);

    let c = manager.connect(&address(""), None).await.unwrap();
    assert_eq!(c.id, a.id);
    assert!(c.reused);
    assert_eq!(manager.len(), 1);

    // Different arguments are a different endpoint.
    let other = manager.connect(&address("--delay-ms 1"), None).await.unwrap();
    assert_ne!(other.id, a.id);
    assert_eq!(manager.len(), 2);
    manager.disconnect_all().await;
}

#[tokio::test]
async fn test_unlisted_tool_rejected() {
    let manager = manager();
    let id = manager.connect(&address(""), None).await.unwrap().id;
    let err = Dispatcher::new(manager.clone())
        .call_tool(&id, "mul", Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::ToolNotFound { .. }));
    assert_eq!(manager.get(&id).unwrap().state, ConnectionState::Ready);
    manager.disconnect(&id).await.unwrap();
}

#[tokio::test]
async fn test_timeout_then_recover() {
    let manager = manager();
    let id = manager.connect(&address(""), None).await.unwrap().id;
    let dispatcher = Dispatcher::new(manager.clone());

    let err = dispatcher
        .call_tool(&id, "slow", args(json!({"delay_ms": 700})))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::CallTimeout { .. }));
    assert_eq!(manager.get(&id).unwrap().state, ConnectionState::Ready);

    // Let the late response arrive; it must be ignored.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let output = dispatcher
        .call_tool(&id, "add", args(json!({"a": 2, "b": 2})))
        .await
        .unwrap();
    assert_eq!(output.text, "4");
    manager.disconnect(&id).await.unwrap();
}

#[tokio::test]
async fn test_crash_fails_fast_afterwards() {
    let manager = manager();
    let id = manager.connect(&address(""), None).await.unwrap().id;
    let dispatcher = Dispatcher::new(manager.clone());

    let err = dispatcher.call_tool(&id, "crash", Map::new()).await.unwrap_err();
    assert!(matches!(err, McpError::ConnectionClosed | McpError::CallTimeout { .. }));
    wait_for_state(&manager, &id, ConnectionState::Error).await;

    let started = std::time::Instant::now();
    let err = dispatcher
        .call_tool(&id, "echo", args(json!({"message": "anyone?"})))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::NotConnected { .. }));
    assert!(started.elapsed() < Duration::from_millis(100));

    assert_eq!(
        manager.disconnect(&id).await.unwrap(),
        DisconnectOutcome::Disconnected
    );
}

#[tokio::test]
async fn test_exiting_process_never_ready() {
    let manager = manager();
    let err = manager
        .connect(&address("--exit-immediately"), None)
        .await
        .unwrap_err();
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
async fn test_missing_program_is_spawn_failure() {
    let manager = manager();
    let err = manager
        .connect("nonexistent-tool-server-12345 --flag", None)
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::SpawnFailure(_)));
    assert!(manager.is_empty());
}

#[tokio::test]
async fn test_disconnect_twice_and_unknown() {
    let manager = manager();
    let id = manager.connect(&address(""), None).await.unwrap().id;

    assert_eq!(
        manager.disconnect(&id).await.unwrap(),
        DisconnectOutcome::Disconnected
    );
    assert_eq!(
        manager.disconnect(&id).await.unwrap(),
        DisconnectOutcome::AlreadyDisconnected
    );
    assert!(matches!(
        manager.disconnect("made-up-id").await.unwrap_err(),
        McpError::ConnectionNotFound(_)
    ));
}

#[tokio::test]
async fn test_disconnect_releases_supervised_processes() {
    let supervisor = Arc::new(LocalSupervisor::new());
    let manager = ConnectionManager::new(
        ManagerConfig::default().with_handshake_timeout(Duration::from_secs(5)),
        supervisor.clone(),
    );

    for _ in 0..3 {
        let id = manager.connect(&address(""), None).await.unwrap().id;
        assert_eq!(supervisor.process_count(), 1);
        manager.disconnect(&id).await.unwrap();
        assert_eq!(supervisor.process_count(), 0);
    }
}

#[tokio::test]
async fn test_multiple_servers_health() {
    let manager = manager();
    for delay in ["0", "1", "2"] {
        manager
            .connect(&address(&format!("--delay-ms {}", delay)), None)
            .await
            .unwrap();
    }
    assert_eq!(manager.len(), 3);

    let reports = HealthMonitor::new(manager.clone()).check().await;
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.status == HealthStatus::Healthy));

    assert_eq!(manager.disconnect_all().await, 3);
    assert!(manager.is_empty());
}

#[tokio::test]
async fn test_capability_round_trip() {
    let capability = McpCapability::new(manager());
    let connected = capability
        .execute("connect", ActionInput::FreeText(address("")))
        .await
        .unwrap();
    assert!(connected.contains("4 tool(s)"));

    let id = capability.manager().list()[0].id.clone();
    let echoed = capability
        .execute(
            "call_tool",
            ActionInput::Structured(args(json!({
                "connection_id": id,
                "tool_name": "echo",
                "arguments": {"message": "via capability"}
            }))),
        )
        .await
        .unwrap();
    assert_eq!(echoed, "via capability");

    let unknown = capability
        .execute(
            "call_tool",
            ActionInput::Structured(args(json!({"connection_id": id, "tool_name": "crash2"}))),
        )
        .await
        .unwrap_err();
    assert!(matches!(unknown, McpError::ToolNotFound { .. }));

    capability
        .execute("disconnect", ActionInput::FreeText(id))
        .await
        .unwrap();
}
