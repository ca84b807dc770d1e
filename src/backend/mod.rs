//! Backend management
//!
//! Each backend has one [`BackendConnection`] holding its launch descriptor,
//! its transport while connected, and a small state machine:
//!
//! ```text
//! disconnected -> connecting -> connected -> disconnected
//!                      |
//!                      +-> failed -> connecting (retry)
//!                                 -> disconnected
//! ```
//!
//! Transitions are checked under the connection's own mutex, which is what
//! keeps a connect and a disconnect for the same backend from interleaving.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::BackendConfig;
use crate::transport::BackendTransport;
use crate::{Error, Result};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not running
    Disconnected,
    /// Spawn / handshake / capability listing in progress
    Connecting,
    /// Operations registered, invocations allowed
    Connected,
    /// Last connect attempt failed
    Failed,
}

impl ConnectionState {
    /// Whether the state machine has an edge `self -> next`
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Connected, Connecting, Disconnected, Failed};
        matches!(
            (self, next),
            (Disconnected | Failed, Connecting)
                | (Connecting, Connected | Failed)
                | (Connected | Failed, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        })
    }
}

struct ConnectionInner {
    state: ConnectionState,
    config: BackendConfig,
    transport: Option<Arc<dyn BackendTransport>>,
    last_error: Option<String>,
    connected_at: Option<DateTime<Utc>>,
}

/// One backend known to the gateway
pub struct BackendConnection {
    /// Backend id
    pub id: String,
    inner: Mutex<ConnectionInner>,
    request_count: AtomicU64,
}

impl fmt::Debug for BackendConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConnection")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl BackendConnection {
    /// New connection in the `disconnected` state
    #[must_use]
    pub fn new(id: &str, config: BackendConfig) -> Self {
        Self {
            id: id.to_string(),
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Disconnected,
                config,
                transport: None,
                last_error: None,
                connected_at: None,
            }),
            request_count: AtomicU64::new(0),
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Current launch descriptor
    pub fn config(&self) -> BackendConfig {
        self.inner.lock().config.clone()
    }

    fn transition(&self, inner: &mut ConnectionInner, next: ConnectionState) -> Result<()> {
        if !inner.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                backend: self.id.clone(),
                from: inner.state.to_string(),
                to: next.to_string(),
            });
        }
        inner.state = next;
        Ok(())
    }

    /// Enter `connecting`, replacing the launch descriptor.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyConnected`] while connecting or connected.
    pub fn begin_connect(&self, config: BackendConfig) -> Result<()> {
        let mut inner = self.inner.lock();
        if matches!(
            inner.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Err(Error::AlreadyConnected(self.id.clone()));
        }
        self.transition(&mut inner, ConnectionState::Connecting)?;
        inner.config = config;
        inner.last_error = None;
        Ok(())
    }

    /// `connecting -> connected`
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] if not connecting.
    pub fn finish_connect(&self, transport: Arc<dyn BackendTransport>) -> Result<()> {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, ConnectionState::Connected)?;
        inner.transport = Some(transport);
        inner.connected_at = Some(Utc::now());
        Ok(())
    }

    /// `connecting -> failed`, remembering why
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] if not connecting.
    pub fn fail_connect(&self, reason: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, ConnectionState::Failed)?;
        inner.last_error = Some(reason.to_string());
        Ok(())
    }

    /// Enter `disconnected`, handing back the transport to close.
    ///
    /// `teardown` runs under the connection lock just before the
    /// transition, so no reconnect can interleave with it. It is skipped
    /// when the backend is already disconnected, in which case `Ok(None)`
    /// is returned.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] while a connect is in flight.
    pub fn begin_disconnect<F: FnOnce()>(
        &self,
        teardown: F,
    ) -> Result<Option<Arc<dyn BackendTransport>>> {
        let mut inner = self.inner.lock();
        match inner.state {
            ConnectionState::Disconnected => Ok(None),
            ConnectionState::Connecting => Err(Error::InvalidTransition {
                backend: self.id.clone(),
                from: ConnectionState::Connecting.to_string(),
                to: ConnectionState::Disconnected.to_string(),
            }),
            ConnectionState::Connected | ConnectionState::Failed => {
                teardown();
                self.transition(&mut inner, ConnectionState::Disconnected)?;
                inner.connected_at = None;
                Ok(inner.transport.take())
            }
        }
    }

    /// `connected -> disconnected` after `transport` stopped on its own.
    ///
    /// Only acts if `transport` is still the live one; a later reconnect or
    /// an explicit disconnect makes this a no-op. `teardown` runs under the
    /// connection lock. Returns whether the backend was marked lost.
    pub fn mark_lost<F: FnOnce()>(
        &self,
        transport: &Arc<dyn BackendTransport>,
        reason: &str,
        teardown: F,
    ) -> bool {
        let mut inner = self.inner.lock();
        let is_live = inner.state == ConnectionState::Connected
            && inner
                .transport
                .as_ref()
                .is_some_and(|t| Arc::ptr_eq(t, transport));
        if !is_live {
            return false;
        }
        teardown();
        inner.state = ConnectionState::Disconnected;
        inner.transport = None;
        inner.connected_at = None;
        inner.last_error = Some(reason.to_string());
        true
    }

    /// Record a teardown problem without changing state
    pub fn note_error(&self, reason: &str) {
        self.inner.lock().last_error = Some(reason.to_string());
    }

    /// The transport, only while `connected`
    pub fn transport(&self) -> Option<Arc<dyn BackendTransport>> {
        let inner = self.inner.lock();
        match inner.state {
            ConnectionState::Connected => inner.transport.clone(),
            _ => None,
        }
    }

    /// Count one forwarded request
    pub fn record_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Status record for reporting
    pub fn status(&self, operations: usize) -> BackendStatus {
        let inner = self.inner.lock();
        BackendStatus {
            id: self.id.clone(),
            state: inner.state,
            description: inner.config.description.clone(),
            operations,
            request_count: self.request_count.load(Ordering::Relaxed),
            last_error: inner.last_error.clone(),
            connected_at: inner.connected_at,
        }
    }
}

/// Backend status information
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
    /// Backend id
    pub id: String,
    /// Lifecycle state
    pub state: ConnectionState,
    /// Configured description
    pub description: String,
    /// Registered operation count
    pub operations: usize,
    /// Total forwarded requests
    pub request_count: u64,
    /// Most recent connect or teardown error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the current connection was established
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
}

/// Backend registry - every backend the gateway has seen
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: DashMap<String, Arc<BackendConnection>>,
}

impl BackendRegistry {
    /// Create a new registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing connection for `id`, or a new disconnected one
    pub fn get_or_insert(&self, id: &str, config: &BackendConfig) -> Arc<BackendConnection> {
        let entry = self
            .backends
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(BackendConnection::new(id, config.clone())));
        Arc::clone(entry.value())
    }

    /// Get a backend by id
    pub fn get(&self, id: &str) -> Option<Arc<BackendConnection>> {
        self.backends.get(id).map(|b| Arc::clone(b.value()))
    }

    /// All backends, sorted by id
    pub fn all(&self) -> Vec<Arc<BackendConnection>> {
        let mut all: Vec<Arc<BackendConnection>> =
            self.backends.iter().map(|b| Arc::clone(b.value())).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// State of every backend
    pub fn states(&self) -> HashMap<String, ConnectionState> {
        self.backends
            .iter()
            .map(|b| (b.key().clone(), b.state()))
            .collect()
    }

    /// Number of known backends
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Whether no backend is known
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
