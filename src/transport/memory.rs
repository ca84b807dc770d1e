//! In-memory transport for tests and embedding
//!
//! A [`MemoryConnector`] holds scripted [`MemoryBackend`]s keyed by backend
//! id. Connecting to an id hands out a [`MemoryTransport`] that serves the
//! scripted tools without any I/O.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::watch;

use super::{BackendReply, BackendTransport, Connector};
use crate::config::BackendConfig;
use crate::error::rpc_codes;
use crate::protocol::{JsonRpcError, Tool};
use crate::{Error, Result};

/// Handler for one scripted tool
pub type ToolHandler = Arc<dyn Fn(Value) -> BackendReply + Send + Sync>;

/// Script for one in-memory backend
#[derive(Clone, Default)]
pub struct MemoryBackend {
    tools: Vec<Tool>,
    handlers: HashMap<String, ToolHandler>,
    connect_error: Option<String>,
    describe_error: Option<String>,
    invoke_error: Option<String>,
    close_error: Option<String>,
    delay: Option<Duration>,
    connect_delay: Option<Duration>,
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("tools", &self.tools.len())
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("connect_error", &self.connect_error)
            .field("describe_error", &self.describe_error)
            .finish_non_exhaustive()
    }
}

impl MemoryBackend {
    /// Empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool
    #[must_use]
    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Add a tool with only a name and description
    #[must_use]
    pub fn with_simple_tool(self, name: &str, description: &str) -> Self {
        self.with_tool(Tool {
            name: name.to_string(),
            description: Some(description.to_string()),
            input_schema: json!({ "type": "object" }),
            meta: None,
        })
    }

    /// Script the reply for one tool
    #[must_use]
    pub fn with_handler<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Value) -> BackendReply + Send + Sync + 'static,
    {
        self.handlers.insert(name.to_string(), Arc::new(handler));
        self
    }

    /// Refuse connections with `reason`
    #[must_use]
    pub fn failing_connect(mut self, reason: &str) -> Self {
        self.connect_error = Some(reason.to_string());
        self
    }

    /// Connect, then fail capability listing with `reason`
    #[must_use]
    pub fn failing_describe(mut self, reason: &str) -> Self {
        self.describe_error = Some(reason.to_string());
        self
    }

    /// Fail every invocation at the transport level with `reason`
    #[must_use]
    pub fn failing_invoke(mut self, reason: &str) -> Self {
        self.invoke_error = Some(reason.to_string());
        self
    }

    /// Fail `close` with `reason`
    #[must_use]
    pub fn failing_close(mut self, reason: &str) -> Self {
        self.close_error = Some(reason.to_string());
        self
    }

    /// Delay every invocation
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delay the connect handshake
    #[must_use]
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }
}

/// Transport serving one [`MemoryBackend`]
#[derive(Debug)]
pub struct MemoryTransport {
    backend_id: String,
    backend: MemoryBackend,
    connected: AtomicBool,
    calls: AtomicU64,
    completed: AtomicU64,
    stopped: watch::Sender<bool>,
}

impl MemoryTransport {
    /// Transport already in the connected state
    #[must_use]
    pub fn new(backend_id: &str, backend: MemoryBackend) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            backend,
            connected: AtomicBool::new(true),
            calls: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            stopped: watch::Sender::new(false),
        }
    }

    /// Invocations started
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Invocations that ran to completion
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Simulate the backend going away without being closed
    pub fn terminate(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.stopped.send_replace(true);
    }

    fn echo(name: &str, arguments: &Value) -> BackendReply {
        BackendReply::Success(json!({
            "content": [{ "type": "text", "text": format!("{name}: {arguments}") }],
            "isError": false
        }))
    }
}

#[async_trait]
impl BackendTransport for MemoryTransport {
    async fn describe_capabilities(&self) -> Result<Vec<Tool>> {
        if let Some(ref reason) = self.backend.describe_error {
            return Err(Error::Protocol(reason.clone()));
        }
        Ok(self.backend.tools.clone())
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<BackendReply> {
        if !self.is_connected() {
            return Err(Error::Transport(format!(
                "Backend '{}' is closed",
                self.backend_id
            )));
        }
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.backend.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(ref reason) = self.backend.invoke_error {
            return Err(Error::Transport(reason.clone()));
        }

        let reply = if let Some(handler) = self.backend.handlers.get(name) {
            handler(arguments)
        } else if self.backend.tools.iter().any(|t| t.name == name) {
            Self::echo(name, &arguments)
        } else {
            BackendReply::Error(JsonRpcError {
                code: rpc_codes::INVALID_PARAMS,
                message: format!("Unknown tool: {name}"),
                data: None,
            })
        };
        self.completed.fetch_add(1, Ordering::Relaxed);
        Ok(reply)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        self.stopped.send_replace(true);
        match self.backend.close_error {
            Some(ref reason) => Err(Error::Transport(reason.clone())),
            None => Ok(()),
        }
    }

    async fn closed(&self) {
        let mut rx = self.stopped.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Connector over scripted in-memory backends
#[derive(Debug, Default)]
pub struct MemoryConnector {
    backends: DashMap<String, MemoryBackend>,
    transports: DashMap<String, Arc<MemoryTransport>>,
    connects: AtomicU64,
}

impl MemoryConnector {
    /// Empty connector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MemoryConnector::insert`]
    #[must_use]
    pub fn with_backend(self, backend_id: &str, backend: MemoryBackend) -> Self {
        self.insert(backend_id, backend);
        self
    }

    /// Script (or re-script) a backend
    pub fn insert(&self, backend_id: &str, backend: MemoryBackend) {
        self.backends.insert(backend_id.to_string(), backend);
    }

    /// The most recent transport handed out for `backend_id`
    pub fn transport(&self, backend_id: &str) -> Option<Arc<MemoryTransport>> {
        self.transports.get(backend_id).map(|t| Arc::clone(t.value()))
    }

    /// Connect attempts so far, successful or not
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        backend_id: &str,
        _config: &BackendConfig,
    ) -> Result<Arc<dyn BackendTransport>> {
        self.connects.fetch_add(1, Ordering::Relaxed);
        let backend = self
            .backends
            .get(backend_id)
            .map(|b| b.value().clone())
            .ok_or_else(|| Error::ConnectionFailed {
                backend: backend_id.to_string(),
                reason: "no scripted backend".to_string(),
            })?;
        if let Some(ref reason) = backend.connect_error {
            return Err(Error::ConnectionFailed {
                backend: backend_id.to_string(),
                reason: reason.clone(),
            });
        }

        if let Some(delay) = backend.connect_delay {
            tokio::time::sleep(delay).await;
        }

        let transport = Arc::new(MemoryTransport::new(backend_id, backend));
        self.transports
            .insert(backend_id.to_string(), Arc::clone(&transport));
        Ok(transport as Arc<dyn BackendTransport>)
    }
}
