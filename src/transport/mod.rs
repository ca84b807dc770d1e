//! Backend transports
//!
//! The gateway talks to every backend through [`BackendTransport`], created
//! by a [`Connector`] chosen when the gateway is built. Two implementations
//! ship with the crate: [`StdioConnector`] spawns MCP servers as
//! subprocesses, [`MemoryConnector`] serves scripted in-memory backends.

mod memory;
mod stdio;

pub use self::memory::{MemoryBackend, MemoryConnector, MemoryTransport, ToolHandler};
pub use self::stdio::{StdioConnector, StdioTransport};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::BackendConfig;
use crate::protocol::{JsonRpcError, JsonRpcResponse, Tool};
use crate::{Error, Result};

/// What a backend answered to an invocation
///
/// Both variants are passed to the caller untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendReply {
    /// `result` payload
    Success(Value),
    /// Backend-reported JSON-RPC error
    Error(JsonRpcError),
}

impl BackendReply {
    /// Extract the reply from a JSON-RPC response.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] when the response carries neither result nor error.
    pub fn from_response(response: JsonRpcResponse) -> Result<Self> {
        match (response.result, response.error) {
            (_, Some(error)) => Ok(Self::Error(error)),
            (Some(result), None) => Ok(Self::Success(result)),
            (None, None) => Err(Error::Protocol(
                "Response has neither result nor error".to_string(),
            )),
        }
    }

    /// Whether the backend reported an error
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Narrow interface to one connected backend
#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// The backend's operations
    async fn describe_capabilities(&self) -> Result<Vec<Tool>>;

    /// Run one operation
    async fn invoke(&self, name: &str, arguments: Value) -> Result<BackendReply>;

    /// Check if transport is connected
    fn is_connected(&self) -> bool;

    /// Close the transport
    async fn close(&self) -> Result<()>;

    /// Resolves once the transport has stopped, whether closed or lost.
    ///
    /// Transports that cannot fail on their own never resolve.
    async fn closed(&self) {
        std::future::pending::<()>().await;
    }
}

/// Opens transports from launch descriptors
#[async_trait]
pub trait Connector: Send + Sync {
    /// Start the backend and complete any handshake.
    async fn connect(
        &self,
        backend_id: &str,
        config: &BackendConfig,
    ) -> Result<Arc<dyn BackendTransport>>;
}
