//! The tool hub: one catalog over many backends
//!
//! [`Gateway`] owns the backend connections and the catalog, and shares the
//! session tracker with the HTTP layer. Connecting a backend fills the
//! catalog with its operations; disconnecting removes exactly those again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, warn};

use crate::backend::{BackendConnection, BackendRegistry, BackendStatus, ConnectionState};
use crate::catalog::Catalog;
use crate::config::{BackendConfig, Config};
use crate::exposure::{Exposure, ExposureStrategy};
use crate::session::SessionTracker;
use crate::transport::{BackendReply, BackendTransport, Connector};
use crate::{Error, Result};

/// Outcome of [`Gateway::shutdown`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShutdownReport {
    /// Backends that were torn down cleanly
    pub disconnected: Vec<String>,
    /// Backends whose teardown reported an error
    pub failures: Vec<ShutdownFailure>,
}

impl ShutdownReport {
    /// Whether every backend shut down without error
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One failed teardown
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShutdownFailure {
    /// Backend id
    pub backend: String,
    /// Error message
    pub error: String,
}

/// Top-level coordinator
pub struct Gateway {
    config: Config,
    catalog: Arc<Catalog>,
    backends: BackendRegistry,
    sessions: Arc<SessionTracker>,
    strategy: ExposureStrategy,
    essential: RwLock<Vec<String>>,
    connector: Arc<dyn Connector>,
    /// In-flight connect attempts
    connects: TaskTracker,
    closing: Arc<AtomicBool>,
}

impl Gateway {
    /// Create a gateway that opens backends through `connector`
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> Self {
        let strategy = ExposureStrategy::new(config.exposure.weights);
        let essential = RwLock::new(config.exposure.essential.clone());
        Self {
            config,
            catalog: Arc::new(Catalog::new()),
            backends: BackendRegistry::new(),
            sessions: Arc::new(SessionTracker::new()),
            strategy,
            essential,
            connector,
            connects: TaskTracker::new(),
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Configuration the gateway was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The operation catalog
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// The session tracker
    pub fn sessions(&self) -> &Arc<SessionTracker> {
        &self.sessions
    }

    /// Connect a backend and register its operations.
    ///
    /// Returns the number of operations registered. On any failure the
    /// backend ends up `failed` with nothing in the catalog. The attempt
    /// runs in its own task: dropping this future does not leave the
    /// backend stuck in `connecting`.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyConnected`] while connecting or connected;
    /// [`Error::ConnectionFailed`] for startup or capability failures, or
    /// once [`Gateway::shutdown`] has begun;
    /// [`Error::DuplicateOperation`] / [`Error::InvalidDescriptor`] when the
    /// reported operations cannot be registered.
    pub async fn connect(&self, backend_id: &str, config: BackendConfig) -> Result<usize> {
        if self.closing.load(Ordering::Acquire) {
            return Err(shutting_down(backend_id));
        }
        let conn = self.backends.get_or_insert(backend_id, &config);
        conn.begin_connect(config.clone())?;
        info!(backend = %backend_id, "Connecting backend");

        let attempt = ConnectAttempt {
            conn,
            config,
            connector: Arc::clone(&self.connector),
            catalog: Arc::clone(&self.catalog),
            sessions: Arc::clone(&self.sessions),
            closing: Arc::clone(&self.closing),
        };
        self.connects
            .spawn(attempt.run().in_current_span())
            .await
            .map_err(|e| Error::Internal(format!("Connect task failed: {e}")))?
    }

    /// Connect a backend declared in the configuration
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for an undeclared id, otherwise as [`Gateway::connect`].
    pub async fn connect_by_id(&self, backend_id: &str) -> Result<usize> {
        let config = self
            .config
            .backends
            .get(backend_id)
            .cloned()
            .or_else(|| self.backends.get(backend_id).map(|b| b.config()))
            .ok_or_else(|| Error::Config(format!("Unknown backend: {backend_id}")))?;
        self.connect(backend_id, config).await
    }

    /// Disconnect a backend and drop its operations.
    ///
    /// Unknown, disconnected and failed backends are a no-op (failed ones
    /// move to `disconnected`).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] while a connect is in flight;
    /// [`Error::Transport`] if closing the transport failed (the backend is
    /// still `disconnected` and its operations are gone).
    pub async fn disconnect(&self, backend_id: &str) -> Result<()> {
        let Some(conn) = self.backends.get(backend_id) else {
            return Ok(());
        };
        let mut removed = 0;
        let transport = conn.begin_disconnect(|| {
            removed = self.catalog.unregister_all(backend_id);
        })?;
        let detached = self.sessions.detach_backend_everywhere(backend_id);

        if let Some(transport) = transport {
            info!(backend = %backend_id, removed, sessions = detached, "Backend disconnected");
            if let Err(e) = transport.close().await {
                conn.note_error(&e.to_string());
                warn!(backend = %backend_id, error = %e, "Backend close failed");
                return Err(Error::Transport(format!(
                    "Closing backend '{backend_id}' failed: {e}"
                )));
            }
        }
        Ok(())
    }

    /// Operations visible to a caller.
    ///
    /// Only operations of `connected` backends are listed. `limit` defaults
    /// to the configured default and is capped at the configured maximum.
    pub fn list_operations(&self, query: Option<&str>, limit: Option<usize>) -> Exposure {
        let exposure = &self.config.exposure;
        let limit = limit
            .unwrap_or(exposure.default_limit)
            .min(exposure.max_limit);
        let essential = self.essential.read().clone();

        let states = self.backends.states();
        let visible = self
            .catalog
            .snapshot_with_usage()
            .into_iter()
            .filter(|(d, _)| states.get(&d.backend_id) == Some(&ConnectionState::Connected))
            .collect();
        self.strategy
            .expose_snapshot(visible, query, &essential, limit)
    }

    /// Forward an invocation to the owning backend.
    ///
    /// The backend call runs in its own task: if the caller drops this
    /// future, the call still completes and is counted.
    ///
    /// # Errors
    ///
    /// [`Error::OperationNotFound`], [`Error::BackendUnavailable`] (also when
    /// the backend has stopped but the loss is not yet processed),
    /// [`Error::SessionNotFound`] for an unknown session, or the transport's
    /// own error. Backend-reported errors come back as
    /// [`BackendReply::Error`], not as `Err`.
    #[tracing::instrument(skip(self, arguments), fields(backend))]
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Value,
        session: Option<&str>,
    ) -> Result<BackendReply> {
        let descriptor = self.catalog.resolve(name)?;
        let backend_id = descriptor.backend_id.clone();
        tracing::Span::current().record("backend", backend_id.as_str());

        let conn = self
            .backends
            .get(&backend_id)
            .ok_or_else(|| Error::BackendUnavailable(backend_id.clone()))?;
        let transport = conn
            .transport()
            .filter(|t| t.is_connected())
            .ok_or_else(|| Error::BackendUnavailable(backend_id.clone()))?;

        if let Some(session_id) = session {
            self.sessions.attach_backend(session_id, &backend_id)?;
        }
        conn.record_request();

        let catalog = Arc::clone(&self.catalog);
        let operation = name.to_string();
        let task = tokio::spawn(
            async move {
                let result = transport.invoke(&operation, arguments).await;
                catalog.record_invocation(&operation);
                result
            }
            .in_current_span(),
        );
        let result = task
            .await
            .map_err(|e| Error::Internal(format!("Invocation task failed: {e}")))?;

        let outcome = match &result {
            Ok(BackendReply::Success(_)) => "success",
            Ok(BackendReply::Error(_)) => "backend_error",
            Err(_) => "transport_error",
        };
        telemetry_metrics::counter!(
            "toolhub_invocations_total",
            "backend" => backend_id.clone(),
            "outcome" => outcome
        )
        .increment(1);
        debug!(operation = %name, outcome, "Invocation finished");

        result
    }

    /// Disconnect every backend concurrently, collecting failures.
    ///
    /// In-flight connects are allowed to settle first; connects that finish
    /// after shutdown began are rolled back. No new connects are accepted.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.closing.store(true, Ordering::Release);
        self.connects.close();
        self.connects.wait().await;

        let active: Vec<Arc<BackendConnection>> = self
            .backends
            .all()
            .into_iter()
            .filter(|b| b.state() != ConnectionState::Disconnected)
            .collect();

        let results = join_all(active.iter().map(|b| async move {
            (b.id.clone(), self.disconnect(&b.id).await)
        }))
        .await;

        let mut report = ShutdownReport::default();
        for (backend, result) in results {
            match result {
                Ok(()) => report.disconnected.push(backend),
                Err(e) => report.failures.push(ShutdownFailure {
                    backend,
                    error: e.to_string(),
                }),
            }
        }
        info!(
            disconnected = report.disconnected.len(),
            failures = report.failures.len(),
            "Gateway shut down"
        );
        report
    }

    /// Connect every enabled backend from the configuration.
    ///
    /// Failures are logged, not returned. Returns how many connected.
    pub async fn connect_configured(&self) -> usize {
        let mut enabled: Vec<(String, BackendConfig)> = self
            .config
            .enabled_backends()
            .map(|(id, c)| (id.clone(), c.clone()))
            .collect();
        enabled.sort_by(|a, b| a.0.cmp(&b.0));

        let results = join_all(
            enabled
                .into_iter()
                .map(|(id, config)| async move { (self.connect(&id, config).await, id) }),
        )
        .await;

        results
            .into_iter()
            .filter(|(result, id)| match result {
                Ok(_) => true,
                Err(e) => {
                    warn!(backend = %id, error = %e, "Configured backend not connected");
                    false
                }
            })
            .count()
    }

    /// Status of every known backend, sorted by id
    pub fn statuses(&self) -> Vec<BackendStatus> {
        self.backends
            .all()
            .iter()
            .map(|b| b.status(self.catalog.operations_for(&b.id).len()))
            .collect()
    }

    /// State of one backend, if known
    pub fn backend_state(&self, backend_id: &str) -> Option<ConnectionState> {
        self.backends.get(backend_id).map(|b| b.state())
    }

    /// Replace the essential operation names
    pub fn set_essential(&self, names: Vec<String>) {
        *self.essential.write() = names;
    }

    /// Current essential operation names
    pub fn essential(&self) -> Vec<String> {
        self.essential.read().clone()
    }
}

/// One connect, owned by its own task
struct ConnectAttempt {
    conn: Arc<BackendConnection>,
    config: BackendConfig,
    connector: Arc<dyn Connector>,
    catalog: Arc<Catalog>,
    sessions: Arc<SessionTracker>,
    closing: Arc<AtomicBool>,
}

impl ConnectAttempt {
    async fn run(self) -> Result<usize> {
        let backend_id = self.conn.id.clone();
        let established = self.establish(&backend_id).await;

        let outcome = match established {
            Ok((transport, count)) => {
                let finished = if self.closing.load(Ordering::Acquire) {
                    Err(shutting_down(&backend_id))
                } else {
                    self.conn.finish_connect(Arc::clone(&transport))
                };
                match finished {
                    Ok(()) => {
                        watch_backend(
                            Arc::clone(&self.conn),
                            transport,
                            Arc::clone(&self.catalog),
                            Arc::clone(&self.sessions),
                        );
                        Ok(count)
                    }
                    Err(e) => {
                        self.catalog.unregister_all(&backend_id);
                        if let Err(close_err) = transport.close().await {
                            debug!(backend = %backend_id, error = %close_err, "Close after aborted connect");
                        }
                        Err(e)
                    }
                }
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(count) => {
                telemetry_metrics::counter!("toolhub_backend_connects_total", "outcome" => "success")
                    .increment(1);
                info!(backend = %backend_id, operations = count, "Backend connected");
                Ok(count)
            }
            Err(e) => {
                let _ = self.conn.fail_connect(&e.to_string());
                telemetry_metrics::counter!("toolhub_backend_connects_total", "outcome" => "failure")
                    .increment(1);
                warn!(backend = %backend_id, error = %e, "Backend connect failed");
                Err(e)
            }
        }
    }

    /// Spawn, list capabilities, register. Closes the transport on failure.
    async fn establish(&self, backend_id: &str) -> Result<(Arc<dyn BackendTransport>, usize)> {
        let transport = self
            .connector
            .connect(backend_id, &self.config)
            .await
            .map_err(|e| connection_failed(backend_id, e))?;

        let registered = match transport.describe_capabilities().await {
            Ok(tools) => {
                let descriptors = tools
                    .into_iter()
                    .map(|tool| tool.into_descriptor(backend_id))
                    .collect();
                self.catalog.register_batch(backend_id, descriptors)
            }
            Err(e) => Err(connection_failed(backend_id, e)),
        };

        match registered {
            Ok(count) => Ok((transport, count)),
            Err(e) => {
                if let Err(close_err) = transport.close().await {
                    debug!(backend = %backend_id, error = %close_err, "Close after failed connect");
                }
                Err(e)
            }
        }
    }
}

/// Tear a backend down when its transport stops without being asked to
fn watch_backend(
    conn: Arc<BackendConnection>,
    transport: Arc<dyn BackendTransport>,
    catalog: Arc<Catalog>,
    sessions: Arc<SessionTracker>,
) {
    tokio::spawn(async move {
        transport.closed().await;
        let mut removed = 0;
        let lost = conn.mark_lost(&transport, "backend stopped unexpectedly", || {
            removed = catalog.unregister_all(&conn.id);
        });
        if !lost {
            return;
        }
        let detached = sessions.detach_backend_everywhere(&conn.id);
        telemetry_metrics::counter!("toolhub_backends_lost_total").increment(1);
        warn!(backend = %conn.id, removed, sessions = detached, "Backend stopped unexpectedly");
        if let Err(e) = transport.close().await {
            debug!(backend = %conn.id, error = %e, "Close after backend loss");
        }
    });
}

fn shutting_down(backend_id: &str) -> Error {
    Error::ConnectionFailed {
        backend: backend_id.to_string(),
        reason: "gateway is shutting down".to_string(),
    }
}

/// Wrap startup errors as `ConnectionFailed`, keeping those that already are
fn connection_failed(backend_id: &str, error: Error) -> Error {
    match error {
        Error::ConnectionFailed { .. } => error,
        other => Error::ConnectionFailed {
            backend: backend_id.to_string(),
            reason: other.to_string(),
        },
    }
}
