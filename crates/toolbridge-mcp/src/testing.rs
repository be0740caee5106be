//! Scripted endpoints for unit tests.
//!
//! [`FakeSupervisor`] hands out in-memory `tokio::io::duplex` pipes instead
//! of real processes. Each "process" is a task that reads newline-delimited
//! requests and answers through a [`Handler`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

use crate::error::{McpError, Result};
use crate::supervisor::{ProcessId, ProcessInfo, ProcessStatus, ProcessStream, ProcessSupervisor};

/// What a scripted endpoint does with one request.
pub(crate) enum Reply {
    Result(Value),
    Error(i64, String),
    /// Answer after a pause. Blocks the endpoint meanwhile.
    Delayed(Duration, Value),
    /// Never answer.
    Silent,
    /// Close the pipes without answering.
    Exit,
}

pub(crate) type Handler = Arc<dyn Fn(&str, &Value) -> Reply + Send + Sync>;

/// A well-behaved endpoint exposing `tools`.
///
/// `add` sums `a` and `b`, `echo` returns `text`, `fail` reports a tool-level
/// error, `slow` answers after two seconds, `crash` exits.
pub(crate) fn tool_server(tools: &[&str]) -> Handler {
    let tools: Vec<Value> = tools
        .iter()
        .map(|name| json!({"name": name, "description": format!("{} tool", name)}))
        .collect();
    Arc::new(move |method: &str, params: &Value| match method {
        "initialize" => Reply::Result(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "scripted", "version": "1.0"}
        })),
        "tools/list" => Reply::Result(json!({"tools": tools})),
        "ping" => Reply::Result(json!({})),
        "tools/call" => {
            let args = &params["arguments"];
            match params["name"].as_str().unwrap_or_default() {
                "add" => {
                    let sum = args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0);
                    Reply::Result(json!({"content": [{"type": "text", "text": sum.to_string()}]}))
                }
                "echo" => Reply::Result(json!({
                    "content": [{"type": "text", "text": args["text"].as_str().unwrap_or_default()}]
                })),
                "fail" => Reply::Result(json!({
                    "content": [{"type": "text", "text": "tool blew up"}],
                    "isError": true
                })),
                "slow" => Reply::Delayed(Duration::from_secs(2), json!({"content": []})),
                "crash" => Reply::Exit,
                other => Reply::Error(-32602, format!("unknown tool {}", other)),
            }
        }
        _ => Reply::Error(-32601, format!("Method not found: {}", method)),
    })
}

/// Run a scripted endpoint and return the client side of its pipes.
pub(crate) fn scripted_stream(handler: Handler) -> (ProcessStream, JoinHandle<()>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client);
    let task = tokio::spawn(serve(server, handler));
    (ProcessStream::new(client_write, client_read), task)
}

async fn serve(io: tokio::io::DuplexStream, handler: Handler) {
    let (read, mut write) = tokio::io::split(io);
    let mut lines = BufReader::new(read).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        // Notifications carry no id and get no answer.
        let Some(id) = message.get("id").cloned() else {
            continue;
        };
        let method = message["method"].as_str().unwrap_or_default();

        let envelope = match handler(method, &message["params"]) {
            Reply::Result(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Reply::Error(code, msg) => {
                json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": msg}})
            }
            Reply::Delayed(pause, result) => {
                tokio::time::sleep(pause).await;
                json!({"jsonrpc": "2.0", "id": id, "result": result})
            }
            Reply::Silent => continue,
            Reply::Exit => break,
        };

        let mut bytes = envelope.to_string().into_bytes();
        bytes.push(b'\n');
        if write.write_all(&bytes).await.is_err() {
            break;
        }
    }
}

struct FakeProcess {
    stream: Option<ProcessStream>,
    task: JoinHandle<()>,
}

/// Supervisor whose processes are scripted in-memory endpoints.
pub(crate) struct FakeSupervisor {
    handler: Option<Handler>,
    next_id: AtomicU64,
    processes: Mutex<HashMap<ProcessId, FakeProcess>>,
    spawned: Mutex<Vec<String>>,
    stopped: Mutex<Vec<ProcessId>>,
}

impl FakeSupervisor {
    pub(crate) fn new(handler: Handler) -> Self {
        Self {
            handler: Some(handler),
            next_id: AtomicU64::new(0),
            processes: Mutex::new(HashMap::new()),
            spawned: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
        }
    }

    /// A supervisor on which every spawn fails.
    pub(crate) fn failing() -> Self {
        Self {
            handler: None,
            ..Self::new(tool_server(&[]))
        }
    }

    /// Command lines passed to `start_process`, in order.
    pub(crate) fn spawned(&self) -> Vec<String> {
        self.spawned.lock().clone()
    }

    /// Processes passed to `stop_process`, in order.
    pub(crate) fn stopped(&self) -> Vec<ProcessId> {
        self.stopped.lock().clone()
    }

    /// Simulate every process dying.
    pub(crate) fn kill_all(&self) {
        for process in self.processes.lock().values() {
            process.task.abort();
        }
    }
}

#[async_trait]
impl ProcessSupervisor for FakeSupervisor {
    async fn start_process(&self, program: &str, args: &[String]) -> Result<ProcessId> {
        let command = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        self.spawned.lock().push(command);

        let Some(handler) = self.handler.as_ref().map(Arc::clone) else {
            return Err(McpError::spawn_failure(format!(
                "failed to spawn '{}': No such file or directory",
                program
            )));
        };

        let id = ProcessId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (stream, task) = scripted_stream(handler);
        self.processes.lock().insert(
            id,
            FakeProcess {
                stream: Some(stream),
                task,
            },
        );
        Ok(id)
    }

    fn get_process(&self, id: ProcessId) -> Option<ProcessInfo> {
        self.processes.lock().get(&id).map(|process| {
            if process.task.is_finished() {
                ProcessInfo {
                    status: ProcessStatus::Exited,
                    error: Some("process exited".to_string()),
                }
            } else {
                ProcessInfo {
                    status: ProcessStatus::Running,
                    error: None,
                }
            }
        })
    }

    fn take_stream(&self, id: ProcessId) -> Result<ProcessStream> {
        self.processes
            .lock()
            .get_mut(&id)
            .and_then(|process| process.stream.take())
            .ok_or_else(|| McpError::spawn_failure(format!("no stream for {}", id)))
    }

    async fn stop_process(&self, id: ProcessId) -> Result<()> {
        if let Some(process) = self.processes.lock().get(&id) {
            process.task.abort();
            self.stopped.lock().push(id);
        }
        Ok(())
    }
}

/// A wiremock responder that answers every JSON-RPC request with `result`,
/// echoing the request id.
pub(crate) fn rpc_responder(
    result: Value,
) -> impl Fn(&wiremock::Request) -> wiremock::ResponseTemplate + Send + Sync + 'static {
    move |req: &wiremock::Request| {
        let body: Value = serde_json::from_slice(&req.body).unwrap_or(Value::Null);
        wiremock::ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": body["id"],
            "result": result
        }))
    }
}
