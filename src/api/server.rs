//! API server lifecycle: bind, spawn the axum server task, and hand back a
//! handle with a shutdown channel.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::api::router::api_router;
use crate::api::types::ApiContext;
use crate::core_state::CoreError;

/// Handle to a running API server.
pub struct ApiServer {
    pub addr: SocketAddr,
    pub started_at: DateTime<Utc>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl ApiServer {
    /// Send the shutdown signal. In-flight requests are allowed to finish.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("API server shutdown signal sent");
        }
    }

    /// Wait for the server task to exit.
    pub async fn wait(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("API server task failed: {e}");
            }
        }
    }
}

/// Bind `bind_addr` and serve the API router in a background task.
pub async fn start_api_server(ctx: ApiContext, bind_addr: &str) -> Result<ApiServer, CoreError> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| CoreError::Server(format!("Failed to bind {bind_addr}: {e}")))?;

    let addr = listener
        .local_addr()
        .map_err(|e| CoreError::Server(format!("Failed to get server address: {e}")))?;

    let app = api_router(ctx);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
            tracing::info!("API server received shutdown signal");
        };

        tracing::info!(%addr, "API server started");

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
        {
            tracing::error!("API server error: {e}");
        }

        tracing::info!("API server stopped");
    });

    Ok(ApiServer {
        addr,
        started_at: Utc::now(),
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}
