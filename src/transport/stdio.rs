//! Standard I/O transport implementation
//!
//! One JSON-RPC message per line. Requests run as separate tasks so a slow
//! backend call does not block the next message; replies are written as
//! they complete. `notifications/cancelled` aborts the matching task, and a
//! request reusing the id of one still running is refused.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter},
    sync::{Mutex, watch},
    task::{self, AbortHandle, JoinError, JoinSet},
};
use tracing::{debug, error, info, warn};

use super::{
    CancelledParams, INVALID_REQUEST, McpError, McpMessage, MessageHandler, RequestId, dispatch, parse_message,
};

type Reader = Box<dyn AsyncRead + Unpin + Send>;
type Writer = Arc<Mutex<BufWriter<Box<dyn AsyncWrite + Unpin + Send>>>>;

/// Request tasks still running, by request id and by task id
#[derive(Default)]
struct InFlight {
    tasks: JoinSet<()>,
    pending: HashMap<RequestId, AbortHandle>,
    owners: HashMap<task::Id, RequestId>,
}

impl InFlight {
    fn contains(&self, id: &RequestId) -> bool {
        self.pending.contains_key(id)
    }

    fn insert(&mut self, id: RequestId, abort: AbortHandle) {
        self.owners.insert(abort.id(), id.clone());
        self.pending.insert(id, abort);
    }

    /// Abort the task serving `id`, if it is still running
    fn cancel(&mut self, id: &RequestId) -> bool {
        match self.pending.remove(id) {
            Some(abort) => {
                abort.abort();
                true
            }
            None => false,
        }
    }

    /// Forget a finished task; the request id is freed only if this task still owns it
    fn finish(&mut self, task_id: task::Id) {
        let Some(id) = self.owners.remove(&task_id) else {
            return;
        };
        if self.pending.get(&id).is_some_and(|abort| abort.id() == task_id) {
            self.pending.remove(&id);
        }
    }

    fn joined(&mut self, joined: std::result::Result<(task::Id, ()), JoinError>) {
        match joined {
            Ok((task_id, ())) => self.finish(task_id),
            Err(e) => {
                let task_id = e.id();
                if !e.is_cancelled() {
                    error!(request_id = ?self.owners.get(&task_id), "Request task failed: {}", e);
                }
                self.finish(task_id);
            }
        }
    }
}

/// Standard I/O transport for local CLI integration with MCP clients
pub struct StdioTransport {
    reader: Mutex<Option<Reader>>,
    writer: Writer,
    shutdown: watch::Sender<bool>,
}

impl StdioTransport {
    /// Create a new stdio transport on the process stdin/stdout
    pub fn new() -> Self {
        Self::with_io(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Create a transport over arbitrary byte streams
    pub fn with_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer: Box<dyn AsyncWrite + Unpin + Send> = Box::new(writer);
        Self {
            reader: Mutex::new(Some(Box::new(reader))),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            shutdown: watch::channel(false).0,
        }
    }

    /// Main message processing loop
    async fn process_messages(&self, reader: Reader, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let mut lines = BufReader::new(reader).lines();
        let mut shutdown = self.shutdown.subscribe();
        let mut in_flight = InFlight::default();

        info!("Starting stdio message processing loop");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Shutdown requested, stopping message processing");
                    in_flight.tasks.abort_all();
                    break;
                }
                Some(joined) = in_flight.tasks.join_next_with_id(), if !in_flight.tasks.is_empty() => {
                    in_flight.joined(joined);
                }
                line = lines.next_line() => {
                    let Some(line) = line.context("Failed to read from stdin")? else {
                        debug!("EOF received on stdin");
                        break;
                    };
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    debug!("Received line: {}", trimmed);
                    self.handle_line(trimmed, &handler, &mut in_flight).await;
                }
            }
        }

        // Let requests that were already accepted finish and reply
        while let Some(joined) = in_flight.tasks.join_next_with_id().await {
            in_flight.joined(joined);
        }

        info!("Message processing loop ended");
        Ok(())
    }

    async fn handle_line(
        &self,
        line: &str,
        handler: &Arc<dyn MessageHandler>,
        in_flight: &mut InFlight,
    ) {
        let message = match parse_message(line) {
            Ok(message) => message,
            Err(reply) => {
                warn!("Rejected malformed message: {}", line);
                write_message(&self.writer, &reply).await;
                return;
            }
        };

        match message {
            McpMessage::Notification { ref method, ref params } if method == "notifications/cancelled" => {
                let cancelled = params
                    .clone()
                    .and_then(|p| serde_json::from_value::<CancelledParams>(p).ok());
                match cancelled {
                    Some(cancelled) if in_flight.cancel(&cancelled.request_id) => {
                        info!(
                            request_id = %cancelled.request_id,
                            reason = cancelled.reason.as_deref().unwrap_or("none"),
                            "Cancelled in-flight request"
                        );
                    }
                    _ => debug!("Cancellation for unknown or finished request ignored"),
                }
            }
            message @ (McpMessage::Notification { .. } | McpMessage::Response { .. }) => {
                if let Some(reply) = dispatch(handler.as_ref(), message).await {
                    write_message(&self.writer, &reply).await;
                }
            }
            message => {
                let Some(id) = message.request_id().cloned() else {
                    return;
                };
                if in_flight.contains(&id) {
                    warn!(request_id = %id, "Rejected request reusing an in-flight id");
                    let reply = McpMessage::error(
                        Some(id),
                        McpError::new(INVALID_REQUEST, "request id is already in flight"),
                    );
                    write_message(&self.writer, &reply).await;
                    return;
                }
                let handler = Arc::clone(handler);
                let writer = Arc::clone(&self.writer);
                let abort = in_flight.tasks.spawn(async move {
                    if let Some(reply) = dispatch(handler.as_ref(), message).await {
                        write_message(&writer, &reply).await;
                    }
                });
                in_flight.insert(id, abort);
            }
        }
    }
}

/// Write one message as a single line and flush
async fn write_message(writer: &Writer, message: &McpMessage) {
    let json_str = match serde_json::to_string(&message.to_jsonrpc()) {
        Ok(json_str) => json_str,
        Err(e) => {
            error!("Failed to serialize message to JSON: {}", e);
            return;
        }
    };
    debug!("Sending message: {}", json_str);

    let mut writer = writer.lock().await;
    let result = async {
        writer.write_all(json_str.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }
    .await;
    if let Err(e) = result {
        error!("Failed to write message to stdout: {}", e);
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl super::Transport for StdioTransport {
    /// Start the stdio transport and process messages until EOF or shutdown
    async fn start(&self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        info!("Starting stdio transport for MCP communication");
        let Some(reader) = self.reader.lock().await.take() else {
            bail!("stdio transport already started");
        };
        self.process_messages(reader, handler).await
    }

    /// Shutdown the stdio transport
    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down stdio transport");
        self.shutdown.send_replace(true);

        if let Err(e) = self.writer.lock().await.flush().await {
            warn!("Failed to flush output during shutdown: {}", e);
        }
        Ok(())
    }

    /// Send a message through the stdio transport
    async fn send_message(&self, message: McpMessage) -> Result<()> {
        write_message(&self.writer, &message).await;
        Ok(())
    }
}
