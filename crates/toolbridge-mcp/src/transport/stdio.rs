//! Stream adapter: newline-delimited JSON-RPC over a subprocess's stdio.
//!
//! One background task owns the process output. It reassembles lines with a
//! [`LineBuffer`], decodes each complete line, and hands the response to the
//! pending call registered under the same id. Lines that do not decode are
//! skipped, so diagnostic chatter on stdout cannot break correlation.
//!
//! A second task owns the process input. Callers queue framed lines to it
//! and only their wait for the response is timed, so every line reaches the
//! process whole even when the caller has given up on it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::Transport;
use super::framing::{self, LineBuffer};
use crate::address::TransportKind;
use crate::error::{McpError, Result};
use crate::protocol::{self, EncodedRequest, JsonRpcNotification, JsonRpcResponse, RequestId};
use crate::supervisor::ProcessStream;

const READ_CHUNK: usize = 8 * 1024;

/// A call waiting for its response.
struct PendingCall {
    method: String,
    issued_at: Instant,
    tx: oneshot::Sender<JsonRpcResponse>,
}

type PendingCalls = Arc<Mutex<HashMap<RequestId, PendingCall>>>;

/// Transport over a process's stdin/stdout.
pub struct StdioTransport {
    label: String,
    /// Framed lines for the writer task. `None` once closed.
    outbox: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    pending: PendingCalls,
    alive: Arc<AtomicBool>,
    exited: watch::Receiver<bool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Take over a process stream and start the reader and writer tasks.
    ///
    /// `label` only appears in logs.
    pub fn new(stream: ProcessStream, label: impl Into<String>) -> Self {
        let label = label.into();
        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let (exit_tx, exited) = watch::channel(false);
        let (outbox, queued) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(
            stream.stdout,
            Arc::clone(&pending),
            Arc::clone(&alive),
            exit_tx,
            label.clone(),
        ));
        let writer = tokio::spawn(write_loop(
            stream.stdin,
            queued,
            Arc::clone(&pending),
            Arc::clone(&alive),
            label.clone(),
        ));

        Self {
            label,
            outbox: Mutex::new(Some(outbox)),
            pending,
            alive,
            exited,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        }
    }

    /// A receiver that flips to `true` once the process output has closed.
    pub fn exit_signal(&self) -> watch::Receiver<bool> {
        self.exited.clone()
    }

    fn enqueue(&self, payload: Vec<u8>) -> Result<()> {
        let outbox = self.outbox.lock();
        let sender = outbox.as_ref().ok_or(McpError::ConnectionClosed)?;
        sender
            .send(framing::frame(payload))
            .map_err(|_| McpError::ConnectionClosed)
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, request: &EncodedRequest, timeout: Duration) -> Result<JsonRpcResponse> {
        if !self.is_alive() {
            return Err(McpError::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            request.id.clone(),
            PendingCall {
                method: request.method.clone(),
                issued_at: Instant::now(),
                tx,
            },
        );

        // Both tasks flip `alive` before draining the map, so an entry
        // inserted after the drain is caught here.
        if !self.is_alive() {
            self.pending.lock().remove(&request.id);
            return Err(McpError::ConnectionClosed);
        }

        tracing::trace!(
            endpoint = %self.label,
            method = %request.method,
            request_id = %request.id,
            "sending stdio request"
        );
        if let Err(e) = self.enqueue(request.bytes.clone()) {
            self.pending.lock().remove(&request.id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            // Sender dropped: the stream closed with this call in flight.
            Ok(Err(_)) => Err(McpError::ConnectionClosed),
            Err(_) => {
                // Detach so a late response is ignored; already gone is fine.
                let detached = self.pending.lock().remove(&request.id);
                tracing::debug!(
                    endpoint = %self.label,
                    method = %request.method,
                    request_id = %request.id,
                    waited_ms = detached.map(|call| call.issued_at.elapsed().as_millis() as u64),
                    "stdio request timed out"
                );
                Err(McpError::timeout(&request.method, timeout))
            }
        }
    }

    async fn try_notify(&self, notification: &JsonRpcNotification) -> Result<()> {
        if !self.is_alive() {
            return Err(McpError::ConnectionClosed);
        }
        self.enqueue(serde_json::to_vec(notification)?)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Stops reading, fails pending calls, and lets the writer flush what is
    /// queued before it closes the process input.
    async fn try_close(&self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        self.outbox.lock().take();
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.pending.lock().clear();
        Ok(())
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        let tasks = [self.reader.lock().take(), self.writer.lock().take()];
        for task in tasks.into_iter().flatten() {
            task.abort();
        }
    }
}

async fn write_loop(
    mut stdin: Box<dyn AsyncWrite + Send + Unpin>,
    mut queued: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: PendingCalls,
    alive: Arc<AtomicBool>,
    label: String,
) {
    while let Some(line) = queued.recv().await {
        let written = match stdin.write_all(&line).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::warn!(endpoint = %label, error = %e, "failed to write process input");
            alive.store(false, Ordering::SeqCst);
            fail_pending(&pending, &label);
            return;
        }
    }
    let _ = stdin.shutdown().await;
}

async fn read_loop(
    mut stdout: Box<dyn AsyncRead + Send + Unpin>,
    pending: PendingCalls,
    alive: Arc<AtomicBool>,
    exit_tx: watch::Sender<bool>,
    label: String,
) {
    let mut buffer = LineBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => {
                tracing::debug!(endpoint = %label, "process output closed");
                break;
            }
            Ok(n) => {
                for line in buffer.push(&chunk[..n]) {
                    dispatch_line(&line, &pending, &label);
                }
            }
            Err(e) => {
                tracing::warn!(endpoint = %label, error = %e, "failed to read process output");
                break;
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    fail_pending(&pending, &label);
    let _ = exit_tx.send(true);
}

/// Drop every waiter, failing each call with `ConnectionClosed`.
fn fail_pending(pending: &PendingCalls, label: &str) {
    let orphaned: Vec<String> = pending.lock().drain().map(|(_, call)| call.method).collect();
    if !orphaned.is_empty() {
        tracing::warn!(endpoint = %label, ?orphaned, "process stream closed with calls in flight");
    }
}

fn dispatch_line(line: &[u8], pending: &PendingCalls, label: &str) {
    let response = match protocol::decode(line) {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(
                endpoint = %label,
                error = %e,
                line = %String::from_utf8_lossy(line),
                "skipping non-protocol output line"
            );
            return;
        }
    };

    let waiter = pending.lock().remove(&response.id);
    match waiter {
        Some(call) => {
            tracing::trace!(
                endpoint = %label,
                method = %call.method,
                request_id = %response.id,
                elapsed_ms = call.issued_at.elapsed().as_millis() as u64,
                "stdio response matched"
            );
            let _ = call.tx.send(response);
        }
        None => {
            tracing::debug!(
                endpoint = %label,
                request_id = %response.id,
                "no pending call for response (late or unsolicited)"
            );
        }
    }
}
