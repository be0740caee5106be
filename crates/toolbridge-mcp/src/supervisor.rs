//! Process supervision contract for Stream-transport endpoints.
//!
//! The connection manager never touches OS processes directly. It asks a
//! [`ProcessSupervisor`] to start a process, borrows its stdio pair once via
//! [`ProcessSupervisor::take_stream`], and asks the supervisor to stop it on
//! disconnect. [`LocalSupervisor`] is the default implementation on top of
//! `tokio::process`.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{McpError, Result};

/// How long `stop_process` waits for a killed process to be reaped.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Identifier handed out by a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u64);

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "proc-{}", self.0)
    }
}

/// Lifecycle status of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Running.
    Running,
    /// Exited, killed, or failed.
    Exited,
}

/// Snapshot of a supervised process.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    /// Current status.
    pub status: ProcessStatus,
    /// Exit or failure description, if any.
    pub error: Option<String>,
}

/// The byte-oriented duplex channel to a process.
pub struct ProcessStream {
    /// Process input.
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    /// Process output.
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
}

impl ProcessStream {
    /// Wrap a writer/reader pair.
    pub fn new(
        stdin: impl AsyncWrite + Send + Unpin + 'static,
        stdout: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
        }
    }
}

impl std::fmt::Debug for ProcessStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessStream").finish_non_exhaustive()
    }
}

/// Owner of OS process lifecycle for Stream endpoints.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Start a process. Fails with [`McpError::SpawnFailure`].
    async fn start_process(&self, program: &str, args: &[String]) -> Result<ProcessId>;

    /// Current status of a process, or `None` if the id is unknown.
    fn get_process(&self, id: ProcessId) -> Option<ProcessInfo>;

    /// Hand out the process's stdio pair. Succeeds at most once per process.
    fn take_stream(&self, id: ProcessId) -> Result<ProcessStream>;

    /// Stop a process. Safe to call on exited or unknown processes.
    async fn stop_process(&self, id: ProcessId) -> Result<()>;
}

struct ManagedProcess {
    program: String,
    state: Arc<Mutex<ProcessInfo>>,
    stream: Option<ProcessStream>,
    kill: Option<oneshot::Sender<()>>,
    waiter: Option<JoinHandle<()>>,
}

type ProcessTable = Arc<Mutex<HashMap<ProcessId, ManagedProcess>>>;

/// Supervisor that spawns real child processes with `tokio::process`.
///
/// A process is forgotten when it is stopped, or when it exits after its
/// stream was handed out. An exit before that stays visible through
/// [`ProcessSupervisor::get_process`] until `stop_process`.
#[derive(Default)]
pub struct LocalSupervisor {
    processes: ProcessTable,
    next_id: AtomicU64,
    env: Vec<(String, String)>,
}

impl LocalSupervisor {
    /// Create a supervisor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set extra environment variables for every spawned process.
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Number of processes this supervisor still tracks.
    pub fn process_count(&self) -> usize {
        self.processes.lock().len()
    }
}

#[async_trait]
impl ProcessSupervisor for LocalSupervisor {
    async fn start_process(&self, program: &str, args: &[String]) -> Result<ProcessId> {
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::spawn_failure(format!("failed to spawn '{}': {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::spawn_failure("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::spawn_failure("failed to capture stdout"))?;

        let id = ProcessId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);

        if let Some(stderr) = child.stderr.take() {
            let program = program.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(process = %id, program = %program, "stderr: {}", line);
                }
            });
        }

        let state = Arc::new(Mutex::new(ProcessInfo {
            status: ProcessStatus::Running,
            error: None,
        }));
        let (kill_tx, kill_rx) = oneshot::channel();
        let waiter_state = Arc::clone(&state);
        let table = Arc::clone(&self.processes);
        let waiter = tokio::spawn(async move {
            let outcome = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            {
                let mut info = waiter_state.lock();
                info.status = ProcessStatus::Exited;
                info.error = Some(match outcome {
                    Ok(status) => format!("process exited: {}", status),
                    Err(e) => format!("failed to wait on process: {}", e),
                });
            }
            tracing::debug!(process = %id, "process exited");

            let mut processes = table.lock();
            if processes.get(&id).is_some_and(|p| p.stream.is_none()) {
                processes.remove(&id);
            }
        });

        tracing::info!(process = %id, program = %program, "started endpoint process");

        self.processes.lock().insert(
            id,
            ManagedProcess {
                program: program.to_string(),
                state,
                stream: Some(ProcessStream::new(stdin, stdout)),
                kill: Some(kill_tx),
                waiter: Some(waiter),
            },
        );
        Ok(id)
    }

    fn get_process(&self, id: ProcessId) -> Option<ProcessInfo> {
        self.processes
            .lock()
            .get(&id)
            .map(|process| process.state.lock().clone())
    }

    fn take_stream(&self, id: ProcessId) -> Result<ProcessStream> {
        let mut processes = self.processes.lock();
        let process = processes
            .get_mut(&id)
            .ok_or_else(|| McpError::spawn_failure(format!("unknown process {}", id)))?;
        process
            .stream
            .take()
            .ok_or_else(|| McpError::spawn_failure(format!("stream for {} already taken", id)))
    }

    async fn stop_process(&self, id: ProcessId) -> Result<()> {
        let removed = self.processes.lock().remove(&id);
        let Some(mut process) = removed else {
            return Ok(());
        };

        if let Some(kill) = process.kill.take() {
            let _ = kill.send(());
        }
        if let Some(waiter) = process.waiter.take()
            && tokio::time::timeout(STOP_GRACE, waiter).await.is_err()
        {
            tracing::warn!(process = %id, program = %process.program, "process did not exit after kill");
        }

        tracing::info!(process = %id, program = %process.program, "stopped endpoint process");
        Ok(())
    }
}
