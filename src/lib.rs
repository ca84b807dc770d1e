//! MCP Tool Hub Library
//!
//! A gateway that multiplexes many MCP tool servers behind one endpoint and
//! keeps the exposed tool list small.
//!
//! # Features
//!
//! - **Catalog**: one namespace of operations across all connected backends
//! - **Tiered exposure**: a fixed essential set plus query-matched operations
//!   ranked by text relevance and usage
//! - **Sessions**: per-caller activity, attached backends and metadata
//! - **Lifecycle**: connect / disconnect backends at runtime with a checked
//!   state machine
//! - **Transports**: stdio child processes, plus an in-memory backend for tests
//!
//! # Protocol Version
//!
//! Speaks MCP protocol versions 2024-11-05 and 2025-03-26 towards backends
//! and callers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod exposure;
pub mod gateway;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod usage;

pub use catalog::Catalog;
pub use error::{Error, Result};
pub use exposure::{Exposure, ExposureStrategy, ExposureTier};
pub use gateway::{Gateway, GatewayServer};
pub use gateway_core::{OperationDescriptor, ScoringWeights};
pub use session::{Session, SessionTracker};
pub use usage::UsageTracker;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer().with_writer(std::io::stderr)).try_init(),
    };

    result.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
