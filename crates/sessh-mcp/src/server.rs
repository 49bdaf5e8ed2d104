//! MCP server over newline-delimited JSON-RPC

use crate::error::{McpError, Result};
use crate::protocol::*;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{json, Value};
use sessh_config::Config;
use sessh_tool::{CancellationToken, Dispatcher, OperationRegistry, SesshInvoker};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub const SERVER_NAME: &str = "sessh-mcp";

type Outbox = mpsc::UnboundedSender<Response>;

/// A running call, numbered so a finished task only clears its own entry
#[derive(Debug)]
struct InFlight {
    call: u64,
    cancel: CancellationToken,
}

/// The sessh MCP server.
///
/// Each `tools/call` runs in its own task, so a slow sessh never blocks
/// other calls. Replies are funnelled through a single writer.
#[derive(Debug, Clone)]
pub struct McpServer {
    dispatcher: Dispatcher,
    in_flight: Arc<DashMap<RequestId, InFlight>>,
    next_call: Arc<AtomicU64>,
}

impl McpServer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            in_flight: Arc::new(DashMap::new()),
            next_call: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Server running the real sessh executable named in `config`
    pub fn from_config(config: &Config) -> Self {
        let invoker = SesshInvoker::from_config(config);
        Self::new(Dispatcher::new(OperationRegistry::sessh(), Arc::new(invoker)))
    }

    /// Serve on the process's stdin and stdout until stdin closes.
    pub async fn serve_stdio(self) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve one client until `reader` reaches end of input.
    ///
    /// Calls still running at end of input are allowed to finish and
    /// write their replies before this returns.
    pub async fn serve<R, W>(self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbox, replies) = mpsc::unbounded_channel();
        let mut writer_task = tokio::spawn(write_loop(writer, replies));
        let mut lines = BufReader::new(reader).split(b'\n');
        let mut calls = JoinSet::new();

        info!(server = SERVER_NAME, "MCP server ready");

        loop {
            tokio::select! {
                line = lines.next_segment() => match line? {
                    // Invalid UTF-8 is replaced so the line fails as JSON, not as I/O.
                    Some(line) => self.handle_line(&String::from_utf8_lossy(&line), &outbox, &mut calls),
                    None => break,
                },
                Some(joined) = calls.join_next(), if !calls.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Tool call task failed");
                    }
                }
                finished = &mut writer_task => {
                    return Err(writer_closed(finished));
                }
            }
        }

        info!(in_flight = calls.len(), "Input closed, draining calls");
        while let Some(joined) = calls.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Tool call task failed");
            }
        }
        drop(outbox);

        match writer_task.await {
            Ok(Ok(())) => {
                info!("MCP server stopped");
                Ok(())
            }
            finished => Err(writer_closed(finished)),
        }
    }

    fn handle_line(&self, line: &str, outbox: &Outbox, calls: &mut JoinSet<()>) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let message: IncomingMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Unparseable message");
                send(outbox, Response::failure(None, RpcError::parse_error(e.to_string())));
                return;
            }
        };

        if message.jsonrpc.as_deref().is_some_and(|v| v != JSONRPC_VERSION) {
            send(
                outbox,
                Response::failure(message.id, RpcError::invalid_request("jsonrpc must be \"2.0\"")),
            );
            return;
        }

        let Some(method) = message.method else {
            debug!(id = ?message.id, "Ignoring response from client");
            return;
        };

        match (method.as_str(), message.id) {
            (methods::INITIALIZE, Some(id)) => {
                send(outbox, Response::success(id, &self.initialize(message.params)));
            }
            (methods::PING, Some(id)) => send(outbox, Response::success(id, &json!({}))),
            (methods::TOOLS_LIST, Some(id)) => {
                send(outbox, Response::success(id, &self.list_tools()));
            }
            (methods::TOOLS_CALL, Some(id)) => self.spawn_call(id, message.params, outbox, calls),
            (methods::CANCELLED, _) => self.cancel(message.params),
            (methods::INITIALIZED, None) => debug!("Client initialized"),
            (other, Some(id)) => {
                debug!(method = other, "Unknown method");
                send(outbox, Response::failure(Some(id), RpcError::method_not_found(other)));
            }
            (other, None) => debug!(method = other, "Ignoring notification"),
        }
    }

    fn initialize(&self, params: Value) -> InitializeResult {
        let params: InitializeParams = serde_json::from_value(params).unwrap_or_default();
        if let Some(client) = &params.client_info {
            info!(client = %client.name, version = %client.version, "Client connected");
        }

        InitializeResult {
            protocol_version: params
                .protocol_version
                .unwrap_or_else(|| DEFAULT_PROTOCOL_VERSION.to_string()),
            capabilities: ServerCapabilities::default(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    fn list_tools(&self) -> ListToolsResult {
        let tools = self
            .dispatcher
            .registry()
            .list()
            .into_iter()
            .map(|op| ToolInfo {
                name: op.name.to_string(),
                description: op.description.to_string(),
                input_schema: op.input_schema(),
            })
            .collect();
        ListToolsResult { tools }
    }

    fn spawn_call(&self, id: RequestId, params: Value, outbox: &Outbox, calls: &mut JoinSet<()>) {
        let params: CallToolParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                send(outbox, Response::failure(Some(id), RpcError::invalid_params(e.to_string())));
                return;
            }
        };

        let cancel = CancellationToken::new();
        let call = self.next_call.fetch_add(1, Ordering::Relaxed);
        match self.in_flight.entry(id.clone()) {
            Entry::Occupied(_) => {
                warn!(request_id = %id, "Request id already in flight");
                send(
                    outbox,
                    Response::failure(Some(id), RpcError::invalid_request("request id is already in flight")),
                );
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(InFlight {
                    call,
                    cancel: cancel.clone(),
                });
            }
        }

        let dispatcher = self.dispatcher.clone();
        let in_flight = self.in_flight.clone();
        let outbox = outbox.clone();
        let span = info_span!("tool_call", tool = %params.name, request_id = %id);

        calls.spawn(
            async move {
                let outcome = dispatcher.call(&params.name, params.arguments, &cancel).await;
                in_flight.remove_if(&id, |_, entry| entry.call == call);

                // A cancelled request gets no reply.
                if cancel.is_cancelled() {
                    debug!("Dropping reply for cancelled call");
                    return;
                }

                let response = match outcome {
                    Ok(content) => Response::success(id, &CallToolResult::success(content)),
                    Err(e) if e.is_client_error() => {
                        Response::failure(Some(id), RpcError::invalid_params(e.to_string()))
                    }
                    Err(e) => Response::success(id, &CallToolResult::error(e.to_string())),
                };
                send(&outbox, response);
            }
            .instrument(span),
        );
    }

    fn cancel(&self, params: Value) {
        let params: CancelledParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                debug!(error = %e, "Malformed cancellation");
                return;
            }
        };

        match self.in_flight.remove(&params.request_id) {
            Some((id, entry)) => {
                info!(request_id = %id, reason = ?params.reason, "Cancelling tool call");
                entry.cancel.cancel();
            }
            None => debug!(request_id = %params.request_id, "Cancellation for unknown call"),
        }
    }
}

fn send(outbox: &Outbox, response: Response) {
    if outbox.send(response).is_err() {
        warn!("Reply dropped, writer has stopped");
    }
}

async fn write_loop<W>(mut writer: W, mut replies: mpsc::UnboundedReceiver<Response>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = replies.recv().await {
        let mut line = serde_json::to_vec(&response)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    Ok(())
}

fn writer_closed(
    finished: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) -> McpError {
    match finished {
        Ok(Ok(())) => McpError::Transport("writer stopped unexpectedly".to_string()),
        Ok(Err(e)) => McpError::Io(e),
        Err(e) => McpError::Transport(format!("writer task failed: {}", e)),
    }
}
