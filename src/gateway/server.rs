//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::hub::Gateway;
use super::router::{AppState, create_router};
use crate::config::Config;
use crate::transport::Connector;
use crate::{Error, Result};

/// HTTP front end over a [`Gateway`]
pub struct GatewayServer {
    gateway: Arc<Gateway>,
}

impl GatewayServer {
    /// Create a server whose backends are opened through `connector`
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> Self {
        Self {
            gateway: Arc::new(Gateway::new(config, connector)),
        }
    }

    /// The hub behind this server
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Bind the configured address and serve until Ctrl+C / SIGTERM
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run(self) -> Result<()> {
        let server = &self.gateway.config().server;
        let addr = SocketAddr::new(
            server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            server.port,
        );
        let listener = TcpListener::bind(addr).await?;
        let (shutdown_tx, _) = broadcast::channel(1);
        self.serve(listener, shutdown_signal(shutdown_tx.clone()), shutdown_tx)
            .await
    }

    /// Serve on an already-bound listener until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn serve<F>(
        self,
        listener: TcpListener,
        shutdown: F,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = self.gateway.config().clone();
        let app = create_router(Arc::new(AppState::new(Arc::clone(&self.gateway))));

        info!("============================================================");
        info!("MCP TOOL HUB v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "Listening");
            info!("  POST http://{addr}/mcp  (JSON-RPC)");
            info!("  GET  http://{addr}/health");
        }
        info!(
            backends = config.enabled_backends().count(),
            essential = config.exposure.essential.len(),
            "Backends configured"
        );
        info!("============================================================");

        // Connect configured backends in the background
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            let connected = gateway.connect_configured().await;
            info!(connected, operations = gateway.catalog().len(), "Configured backends ready");
        });

        // Session expiry sweep
        let gateway = Arc::clone(&self.gateway);
        let sessions_config = config.sessions.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sessions_config.sweep_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = gateway.sessions().sweep_expired(sessions_config.max_age);
                        if removed > 0 {
                            telemetry_metrics::counter!("toolhub_sessions_swept_total")
                                .increment(u64::try_from(removed).unwrap_or(u64::MAX));
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        let _ = shutdown_tx.send(());

        info!("Shutting down backends...");
        match tokio::time::timeout(config.server.shutdown_timeout, self.gateway.shutdown()).await {
            Ok(report) => {
                for failure in &report.failures {
                    warn!(backend = %failure.backend, error = %failure.error, "Backend shutdown failed");
                }
            }
            Err(_) => warn!(
                timeout = ?config.server.shutdown_timeout,
                "Backend shutdown timed out"
            ),
        }

        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
