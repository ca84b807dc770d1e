//! Error types for the tool hub

use std::io;

use thiserror::Error;

/// Result type alias for the tool hub
pub type Result<T> = std::result::Result<T, Error>;

/// Tool hub errors
#[derive(Error, Debug)]
pub enum Error {
    /// Operation name already registered by another backend
    #[error("Duplicate operation '{name}' (already provided by backend '{existing_backend}')")]
    DuplicateOperation {
        /// Colliding operation name
        name: String,
        /// Backend that already owns the name
        existing_backend: String,
    },

    /// Operation not present in the catalog
    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    /// Owning backend is not connected
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Connect requested while connecting or connected
    #[error("Backend already connected: {0}")]
    AlreadyConnected(String),

    /// Connection state machine rejected a transition
    #[error("Invalid transition for backend '{backend}': {from} -> {to}")]
    InvalidTransition {
        /// Backend id
        backend: String,
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Backend startup or capability negotiation failed
    #[error("Connection to backend '{backend}' failed: {reason}")]
    ConnectionFailed {
        /// Backend id
        backend: String,
        /// Failure description
        reason: String,
    },

    /// Session id unknown
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Descriptor failed validation at registration
    #[error("Invalid operation descriptor: {0}")]
    InvalidDescriptor(#[from] gateway_core::DescriptorError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backend timeout
    #[error("Backend timeout: {0}")]
    BackendTimeout(String),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON-RPC error
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc {
        /// Error code
        code: i32,
        /// Error message
        message: String,
        /// Optional data
        data: Option<serde_json::Value>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a JSON-RPC error
    pub fn json_rpc(code: i32, message: impl Into<String>) -> Self {
        Self::JsonRpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Convert to JSON-RPC error code
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::JsonRpc { code, .. } => *code,
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::Protocol(_) => rpc_codes::INVALID_REQUEST,
            Self::InvalidDescriptor(_) => rpc_codes::INVALID_PARAMS,
            Self::OperationNotFound(_) => rpc_codes::OPERATION_NOT_FOUND,
            Self::SessionNotFound(_) => rpc_codes::SESSION_NOT_FOUND,
            Self::DuplicateOperation { .. } => rpc_codes::DUPLICATE_OPERATION,
            Self::AlreadyConnected(_) | Self::InvalidTransition { .. } => {
                rpc_codes::INVALID_TRANSITION
            }
            Self::BackendUnavailable(_)
            | Self::BackendTimeout(_)
            | Self::Transport(_)
            | Self::ConnectionFailed { .. } => rpc_codes::SERVER_ERROR_START,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }
}

/// Standard JSON-RPC error codes plus the hub's server-error range
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Server error range start (backend unavailable / transport failures)
    pub const SERVER_ERROR_START: i32 = -32000;
    /// Operation not in the catalog
    pub const OPERATION_NOT_FOUND: i32 = -32001;
    /// Session not tracked
    pub const SESSION_NOT_FOUND: i32 = -32002;
    /// Operation name collision
    pub const DUPLICATE_OPERATION: i32 = -32003;
    /// Connection state machine violation
    pub const INVALID_TRANSITION: i32 = -32004;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_map_to_distinct_codes() {
        assert_eq!(
            Error::OperationNotFound("x".into()).to_rpc_code(),
            rpc_codes::OPERATION_NOT_FOUND
        );
        assert_eq!(
            Error::BackendUnavailable("b".into()).to_rpc_code(),
            rpc_codes::SERVER_ERROR_START
        );
        assert_eq!(
            Error::AlreadyConnected("b".into()).to_rpc_code(),
            rpc_codes::INVALID_TRANSITION
        );
        assert_eq!(Error::json_rpc(-32099, "x").to_rpc_code(), -32099);
    }

    #[test]
    fn duplicate_operation_message_names_owner() {
        let err = Error::DuplicateOperation {
            name: "read_file".into(),
            existing_backend: "fs".into(),
        };
        assert!(err.to_string().contains("'fs'"));
    }
}
