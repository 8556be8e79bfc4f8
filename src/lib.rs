pub mod api; // HTTP API
pub mod config;
pub mod core_state; // Shared application state
pub mod db;
pub mod models;
pub mod pipeline; // Preprocess, classify, store, retrain

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use crate::api::{start_api_server, ApiContext, StaticTokenGate};
use crate::config::AppConfig;
use crate::core_state::{CoreError, CoreState};
use crate::pipeline::training::{start_retrain_scheduler, WeeklySchedule};

/// Start the service and block until Ctrl+C or SIGTERM.
///
/// The classifier is loaded before the listener binds; any startup failure
/// is returned and nothing is served.
pub async fn run() -> Result<(), CoreError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = AppConfig::load()?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        bind = %config.bind_addr,
        threshold = config.confidence_threshold,
        "Configuration loaded"
    );

    let gate = StaticTokenGate::from_config(&config.actors)?;
    let schedule = config
        .schedule
        .enabled
        .then(|| WeeklySchedule::from_config(&config.schedule))
        .transpose()?;
    let bind_addr = config.bind_addr.clone();

    let core = Arc::new(CoreState::initialize(config)?);

    let scheduler = match schedule {
        Some(schedule) => Some(start_retrain_scheduler(core.retrain_job().clone(), schedule)),
        None => {
            tracing::info!("Scheduled retraining disabled");
            None
        }
    };

    let mut server = start_api_server(ApiContext::new(core, Arc::new(gate)), &bind_addr).await?;
    tracing::info!(addr = %server.addr, started_at = %server.started_at, "Listening");

    shutdown_signal().await;
    server.shutdown();
    server.wait().await;

    // Joins the scheduler thread; an in-progress run completes first.
    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}
