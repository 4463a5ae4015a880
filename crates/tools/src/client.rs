//! MCP client over a child process's stdio.
//!
//! One JSON-RPC message per line in each direction. A background task reads
//! the server's stdout, routes responses to the waiting request by id and
//! answers the few requests a server may send back (`ping`).

use crate::protocol::*;
use mcpchat_config::McpConfig;
use mcpchat_core::error::McpError;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// How to launch a stdio MCP server.
#[derive(Debug, Clone)]
pub struct McpServerSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub request_timeout: Duration,
}

impl McpServerSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl From<&McpConfig> for McpServerSpec {
    fn from(config: &McpConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type Pending = HashMap<u64, oneshot::Sender<Result<Value, McpError>>>;

/// State shared between the client handle and its reader task.
struct Shared {
    writer: Mutex<Writer>,
    pending: Mutex<Pending>,
    closed: AtomicBool,
}

impl Shared {
    async fn send<T: Serialize>(&self, message: &T) -> Result<(), McpError> {
        let mut line =
            serde_json::to_string(message).map_err(|e| McpError::Protocol(e.to_string()))?;
        trace!(line = %line, "MCP →");
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::Io(e.to_string()))?;
        writer.flush().await.map_err(|e| McpError::Io(e.to_string()))
    }

    async fn fail_pending(&self) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(McpError::Closed));
        }
    }

    async fn dispatch(self: &Arc<Self>, line: &str) {
        trace!(line = %line, "MCP ←");
        let message: IncomingMessage = match serde_json::from_str(line) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "Ignoring unparseable line from MCP server");
                return;
            }
        };

        match message.classify() {
            Incoming::Response { id: Some(id), outcome } => {
                let Some(tx) = self.pending.lock().await.remove(&id) else {
                    debug!(id, "Response for unknown request id");
                    return;
                };
                let _ = tx.send(outcome.map_err(|e| McpError::Rpc {
                    code: e.code,
                    message: e.message,
                }));
            }
            Incoming::Response { id: None, .. } => {
                warn!("MCP server sent a response without a usable id");
            }
            Incoming::Request { id, method } => {
                let response = if method == "ping" {
                    OutgoingResponse {
                        jsonrpc: JSONRPC_VERSION,
                        id,
                        result: Some(serde_json::json!({})),
                        error: None,
                    }
                } else {
                    debug!(method = %method, "Rejecting server request");
                    OutgoingResponse {
                        jsonrpc: JSONRPC_VERSION,
                        id,
                        result: None,
                        error: Some(RpcErrorObject {
                            code: METHOD_NOT_FOUND,
                            message: format!("method not found: {method}"),
                            data: None,
                        }),
                    }
                };
                // The writer may be busy with a large request; keep reading.
                let shared = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = shared.send(&response).await {
                        warn!(error = %e, "Failed to answer server request");
                    }
                });
            }
            Incoming::Notification { method, params } => {
                debug!(method = %method, params = ?params, "MCP server notification");
            }
        }
    }
}

async fn read_loop<R>(reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Send + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => shared.dispatch(&line).await,
            Ok(None) => {
                debug!("MCP server closed its output");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed reading from MCP server");
                break;
            }
        }
    }
    shared.closed.store(true, Ordering::SeqCst);
    shared.fail_pending().await;
}

/// A connected MCP client.
pub struct McpClient {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader_task: JoinHandle<()>,
    child: Mutex<Option<Child>>,
}

impl McpClient {
    /// Launch the server process and connect to its stdio.
    ///
    /// The child is killed when the client is closed or dropped.
    pub fn spawn(spec: &McpServerSpec) -> Result<Self, McpError> {
        let spawn_error = |reason: String| McpError::Spawn {
            command: spec.command.clone(),
            reason,
        };

        let mut child = Command::new(&spec.command)
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("stdin was not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("stdout was not captured".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(spec.command.clone(), stderr));
        }

        info!(command = %spec.command, pid = ?child.id(), "Spawned MCP server");

        let mut client = Self::connect(stdout, stdin).with_request_timeout(spec.request_timeout);
        client.child = Mutex::new(Some(child));
        Ok(client)
    }

    /// Speak MCP over an arbitrary byte stream pair.
    pub fn connect<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            writer: Mutex::new(Box::new(writer)),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });
        let reader_task = tokio::spawn(read_loop(reader, Arc::clone(&shared)));

        Self {
            shared,
            next_id: AtomicU64::new(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reader_task,
            child: Mutex::new(None),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Perform the MCP handshake.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "mcpchat",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let result: InitializeResult = self.request_as("initialize", Some(params)).await?;

        if result.protocol_version != PROTOCOL_VERSION {
            warn!(
                server = %result.protocol_version,
                client = PROTOCOL_VERSION,
                "MCP server negotiated a different protocol version"
            );
        }

        self.notify("notifications/initialized", None).await?;

        info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            "MCP session initialized"
        );
        Ok(result)
    }

    /// All tools the server offers, following pagination.
    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let params = match &cursor {
                Some(c) => serde_json::json!({ "cursor": c }),
                None => serde_json::json!({}),
            };
            let page: ListToolsResult = self.request_as("tools/list", Some(params)).await?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() && seen.insert(next.clone()) => {
                    cursor = Some(next);
                }
                Some(next) if !next.is_empty() => {
                    warn!(cursor = %next, "MCP server repeated a tools/list cursor");
                    break;
                }
                _ => break,
            }
        }

        debug!(count = tools.len(), "Listed MCP tools");
        Ok(tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        let arguments = if arguments.is_null() {
            serde_json::json!({})
        } else {
            arguments
        };
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        self.request_as("tools/call", Some(params)).await
    }

    /// Shut the session down: close the server's stdin, give it a moment to
    /// exit, then kill it.
    pub async fn close(&self) -> Result<(), McpError> {
        self.shared.closed.store(true, Ordering::SeqCst);
        {
            let mut writer = self.shared.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "Closing MCP server stdin");
            }
        }

        if let Some(mut child) = self.child.lock().await.take() {
            let exited = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
            match exited {
                Ok(Ok(status)) => debug!(%status, "MCP server exited"),
                _ => {
                    child
                        .kill()
                        .await
                        .map_err(|e| McpError::Io(e.to_string()))?;
                    debug!("MCP server killed");
                }
            }
        }

        self.reader_task.abort();
        self.shared.fail_pending().await;
        Ok(())
    }

    async fn request_as<T>(&self, method: &str, params: Option<Value>) -> Result<T, McpError>
    where
        T: serde::de::DeserializeOwned,
    {
        let value = self.request(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| McpError::Protocol(format!("invalid '{method}' result: {e}")))
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        if self.is_closed() {
            return Err(McpError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id, tx);

        // The reader may have hit EOF between the check above and the insert.
        if self.is_closed() {
            self.shared.pending.lock().await.remove(&id);
            return Err(McpError::Closed);
        }

        let message = OutgoingRequest {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            method,
            params,
        };
        if let Err(e) = self.shared.send(&message).await {
            self.shared.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::Closed),
            Err(_) => {
                self.shared.pending.lock().await.remove(&id);
                Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout_secs: self.request_timeout.as_secs(),
                })
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.shared
            .send(&OutgoingRequest {
                jsonrpc: JSONRPC_VERSION,
                id: None,
                method,
                params,
            })
            .await
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn forward_stderr<R>(command: String, stderr: R)
where
    R: AsyncRead + Send + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(server = %command, "{line}");
    }
}
