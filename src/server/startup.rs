//! Server startup and graceful shutdown
//!
//! [`run_server`] binds the listener and serves in a background task; the
//! returned [`ServerHandle`] stops it and tears the artifact store down.

use super::{create_router, AppState};
use crate::error::{Result, ServerError};
use crate::store::ArtifactStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long in-flight requests get to finish once shutdown starts
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to a running server
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    store: Arc<dyn ArtifactStore>,
    server_task: JoinHandle<std::io::Result<()>>,
}

impl ServerHandle {
    /// The port the server actually bound to (useful when binding to port 0)
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `http://ip:port` base URL for the running server
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Stop accepting connections, wait for in-flight requests, then remove
    /// all artifacts
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.server_task).await {
            Ok(Ok(Ok(()))) => {},
            Ok(Ok(Err(e))) => error!("Server task returned error: {}", e),
            Ok(Err(e)) => error!("Server task panicked: {}", e),
            Err(_) => warn!(
                "Server task did not finish within {}s",
                SHUTDOWN_TIMEOUT.as_secs()
            ),
        }

        self.store.teardown().await;
    }
}

/// Bind `bind_address` and serve the application in a background task
///
/// # Errors
/// - `ServerError::InvalidConfig` when the address cannot be bound
pub async fn run_server(state: AppState, bind_address: SocketAddr) -> Result<ServerHandle> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| ServerError::invalid_config(format!("Failed to bind {bind_address}: {e}")))?;
    let local_addr = listener.local_addr()?;

    let store = Arc::clone(state.store());
    let app = create_router(state);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
    });

    info!(address = %local_addr, storage = %store.describe(), "Server listening");
    Ok(ServerHandle {
        local_addr,
        shutdown_tx,
        store,
        server_task,
    })
}

/// Wait for either Ctrl+C or SIGTERM (Unix only) and return a label for logging
#[cfg(unix)]
pub async fn await_shutdown_trigger() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "ctrl-c",
                _ = sigterm.recv() => "SIGTERM",
            }
        },
        Err(e) => {
            warn!(
                "Failed to install SIGTERM handler: {}; falling back to Ctrl+C only",
                e
            );
            ctrl_c().await
        },
    }
}

/// On non-Unix platforms, only Ctrl+C is available
#[cfg(not(unix))]
pub async fn await_shutdown_trigger() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl-c",
        Err(e) => {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending().await
        },
    }
}
