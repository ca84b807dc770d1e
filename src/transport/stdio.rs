//! Stdio transport implementation (subprocess)
//!
//! Newline-delimited JSON-RPC over the child's stdin/stdout. Responses are
//! paired with requests by id through a pending map, so concurrent calls on
//! one backend never see each other's replies. Anything on stdout that is
//! not a response (server logs, notifications, server-to-client requests) is
//! skipped.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot, watch};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info, warn};

use super::{BackendReply, BackendTransport, Connector};
use crate::config::BackendConfig;
use crate::protocol::{
    InitializeResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION,
    RequestId, Tool, ToolsListResult,
};
use crate::{Error, Result};

/// Upper bound on `tools/list` pages followed during capability discovery
const MAX_TOOL_PAGES: usize = 100;

/// Stdio transport for subprocess MCP servers
pub struct StdioTransport {
    /// Backend id, for logs
    backend_id: String,
    /// Child process
    child: Mutex<Option<Child>>,
    /// Pending requests waiting for response
    pending: DashMap<String, oneshot::Sender<JsonRpcResponse>>,
    /// Request ID counter
    request_id: AtomicU64,
    /// Connected flag
    connected: AtomicBool,
    /// Program to execute
    program: String,
    /// Program arguments
    args: Vec<String>,
    /// Environment variables
    env: HashMap<String, String>,
    /// Working directory
    cwd: Option<String>,
    /// Per-request timeout
    timeout: Duration,
    /// Writer handle
    writer: Mutex<Option<ChildStdin>>,
    /// Flips to `true` once the process is gone or closed
    stopped: watch::Sender<bool>,
}

impl StdioTransport {
    /// Create a transport for `config` without starting it
    ///
    /// # Errors
    ///
    /// Returns a config error if the command cannot be parsed.
    pub fn new(backend_id: &str, config: &BackendConfig) -> Result<Arc<Self>> {
        let (program, args) = config.program_and_args()?;
        Ok(Arc::new(Self {
            backend_id: backend_id.to_string(),
            child: Mutex::new(None),
            pending: DashMap::new(),
            request_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            program,
            args,
            env: config.env.clone(),
            cwd: config.cwd.clone(),
            timeout: config.timeout,
            writer: Mutex::new(None),
            stopped: watch::Sender::new(false),
        }))
    }

    /// Spawn the subprocess and run the `initialize` handshake
    ///
    /// # Errors
    ///
    /// Returns an error if spawning fails or the handshake is rejected.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Transport(format!("Failed to spawn '{}': {e}", self.program)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("Failed to get stdout".to_string()))?;
        let stderr = child.stderr.take();

        *self.writer.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);
        self.connected.store(true, Ordering::Relaxed);

        self.spawn_reader(stdout);
        if let Some(stderr) = stderr {
            self.spawn_stderr_logger(stderr);
        }

        self.initialize().await
    }

    fn spawn_reader(self: &Arc<Self>, stdout: ChildStdout) {
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            let mut lines = FramedRead::new(stdout, LinesCodec::new());
            while let Some(line) = lines.next().await {
                match line {
                    Ok(line) => transport.handle_line(&line),
                    Err(e) => {
                        warn!(backend = %transport.backend_id, error = %e, "Stdout read failed");
                        break;
                    }
                }
            }

            transport.connected.store(false, Ordering::Relaxed);
            // Dropping the senders fails every in-flight request
            transport.pending.clear();
            transport.stopped.send_replace(true);
            debug!(backend = %transport.backend_id, "Stdio reader task ended");
        });
    }

    fn spawn_stderr_logger(&self, stderr: ChildStderr) {
        let backend_id = self.backend_id.clone();
        tokio::spawn(async move {
            let mut lines = FramedRead::new(stderr, LinesCodec::new());
            while let Some(Ok(line)) = lines.next().await {
                debug!(backend = %backend_id, stderr = %line, "Backend stderr");
            }
        });
    }

    /// Initialize the MCP connection
    async fn initialize(&self) -> Result<()> {
        let response = self
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "mcp-toolhub",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            )
            .await?;

        if let Some(error) = response.error {
            return Err(Error::Protocol(format!(
                "Initialize rejected: {}",
                error.message
            )));
        }
        let result: InitializeResult = response
            .result
            .ok_or_else(|| Error::Protocol("Initialize returned no result".to_string()))
            .and_then(|r| serde_json::from_value(r).map_err(Error::from))?;

        self.notify("notifications/initialized", None).await?;

        info!(
            backend = %self.backend_id,
            server = %result.server_info.name,
            protocol = %result.protocol_version,
            "Stdio transport initialized"
        );
        Ok(())
    }

    /// Route one stdout line to its waiting request
    fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            debug!(backend = %self.backend_id, line = %line, "Ignoring non-JSON output");
            return;
        };
        let is_response = value.get("id").is_some_and(|id| !id.is_null())
            && (value.get("result").is_some() || value.get("error").is_some());
        if !is_response {
            debug!(backend = %self.backend_id, "Ignoring non-response message");
            return;
        }

        match serde_json::from_value::<JsonRpcResponse>(value) {
            Ok(response) => {
                let Some(key) = response.id.as_ref().map(ToString::to_string) else {
                    return;
                };
                if let Some((_, sender)) = self.pending.remove(&key) {
                    let _ = sender.send(response);
                } else {
                    debug!(backend = %self.backend_id, id = %key, "Response for unknown request");
                }
            }
            Err(e) => warn!(backend = %self.backend_id, error = %e, "Malformed response"),
        }
    }

    /// Write a message to stdin
    async fn write_message(&self, message: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(ref mut stdin) = *writer else {
            return Err(Error::Transport("Not connected".to_string()));
        };
        stdin
            .write_all(message.as_bytes())
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    /// Get next request ID
    fn next_id(&self) -> RequestId {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        RequestId::Number(i64::try_from(id).unwrap_or(i64::MAX))
    }

    /// Send a request and wait for its response
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let id = self.next_id();
        let key = id.to_string();
        let request = JsonRpcRequest::new(id, method, params);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(key.clone(), tx);

        let message = serde_json::to_string(&request)?;
        if let Err(e) = self.write_message(&message).await {
            self.pending.remove(&key);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::Transport(format!(
                "Backend '{}' closed the connection",
                self.backend_id
            ))),
            Err(_) => {
                self.pending.remove(&key);
                Err(Error::BackendTimeout(format!(
                    "{} '{method}' timed out after {:?}",
                    self.backend_id, self.timeout
                )))
            }
        }
    }

    /// Send a notification (no response expected)
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let message = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.write_message(&message).await
    }
}

#[async_trait]
impl BackendTransport for StdioTransport {
    async fn describe_capabilities(&self) -> Result<Vec<Tool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let response = self.request("tools/list", params).await?;
            if let Some(error) = response.error {
                return Err(Error::Protocol(format!(
                    "tools/list failed: {}",
                    error.message
                )));
            }
            let page: ToolsListResult = serde_json::from_value(
                response
                    .result
                    .ok_or_else(|| Error::Protocol("tools/list returned no result".to_string()))?,
            )?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        warn!(backend = %self.backend_id, pages = MAX_TOOL_PAGES, "tools/list pagination truncated");
        Ok(tools)
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<BackendReply> {
        if !self.is_connected() {
            return Err(Error::Transport(format!(
                "Backend '{}' is not running",
                self.backend_id
            )));
        }
        let response = self
            .request(
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await?;
        BackendReply::from_response(response)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        self.stopped.send_replace(true);

        // Closing stdin lets well-behaved servers exit on their own
        *self.writer.lock().await = None;

        if let Some(mut child) = self.child.lock().await.take() {
            if matches!(child.try_wait(), Ok(None)) {
                child
                    .kill()
                    .await
                    .map_err(|e| Error::Transport(format!("Failed to kill backend: {e}")))?;
            }
        }
        self.pending.clear();
        Ok(())
    }

    async fn closed(&self) {
        let mut rx = self.stopped.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Connector that launches every backend as a subprocess
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioConnector;

#[async_trait]
impl Connector for StdioConnector {
    async fn connect(
        &self,
        backend_id: &str,
        config: &BackendConfig,
    ) -> Result<Arc<dyn BackendTransport>> {
        let transport = StdioTransport::new(backend_id, config)?;
        match tokio::time::timeout(config.startup_timeout, transport.start()).await {
            Ok(Ok(())) => Ok(transport as Arc<dyn BackendTransport>),
            Ok(Err(e)) => {
                let _ = transport.close().await;
                Err(e)
            }
            Err(_) => {
                let _ = transport.close().await;
                Err(Error::BackendTimeout(format!(
                    "{backend_id} did not finish startup within {:?}",
                    config.startup_timeout
                )))
            }
        }
    }
}
