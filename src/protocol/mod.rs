//! MCP protocol types (JSON-RPC 2.0 framing)

mod messages;
mod types;

pub use messages::*;
pub use types::*;

/// MCP protocol version spoken to backends and offered to callers
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Protocol versions accepted from callers, newest first
pub const SUPPORTED_VERSIONS: &[&str] = &["2025-03-26", "2024-11-05"];

/// Pick the protocol version to answer a caller with.
///
/// A supported client version is echoed back; anything else gets the latest.
#[must_use]
pub fn negotiate_version(client_version: &str) -> &'static str {
    SUPPORTED_VERSIONS
        .iter()
        .copied()
        .find(|v| *v == client_version)
        .unwrap_or(PROTOCOL_VERSION)
}
