//! HTTP server for composite rendering.

pub mod routes;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub use state::AppState;

use crate::error::CompositeResult;

/// Shutdown signal for the HTTP server.
pub(crate) struct ShutdownSignal {
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    /// Create a new shutdown signal.
    pub(crate) fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
        }
    }

    /// Signal shutdown.
    pub(crate) fn shutdown(&self) {
        self.notify.notify_one();
    }

    /// Clone the internal notify for sharing.
    fn clone_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }
}

/// A running server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: ShutdownSignal,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address actually bound (resolves port 0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Trigger graceful shutdown and wait for in-flight responses to finish.
    pub async fn stop(self) {
        self.shutdown.shutdown();
        if let Err(e) = self.task.await {
            log::error!("[SERVER] Server task failed: {}", e);
        }
    }
}

/// Build the router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/convert", get(routes::convert))
        .route("/convert/fixed", get(routes::convert_fixed))
        .route("/health", get(routes::health))
        .with_state(state)
}

/// Bind the configured address and serve on a background task.
pub async fn start_server(state: AppState) -> CompositeResult<ServerHandle> {
    let bind_addr = state.config().bind_addr;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    log::info!("[SERVER] Listening on http://{}", addr);

    let shutdown = ShutdownSignal::new();
    let shutdown_notify = shutdown.clone_notify();

    let task = tokio::spawn(async move {
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_notify.notified().await;
            log::info!("[SERVER] Shutting down");
        })
        .await;

        if let Err(e) = result {
            log::error!("[SERVER] Server error: {}", e);
        }
    });

    Ok(ServerHandle {
        addr,
        shutdown,
        task,
    })
}
