pub mod api;
pub mod config;
pub mod kv;
pub mod metrics;
pub mod metrics_defs;
pub mod store;
pub mod types;

#[cfg(test)]
mod testutils;

use shared::admin_service::{AdminService, Readiness};
use shared::http::{bind, run_http_service};
use std::future::{Future, IntoFuture};
use std::time::Duration;
use tokio::sync::oneshot;

/// In-flight requests get this long to finish once shutdown starts.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Config(#[from] config::ValidationError),
    #[error("kv client error: {0}")]
    Kv(#[from] kv::KvError),
}

/// Serves the API and admin listeners until `shutdown` resolves, then drains
/// the API server.
pub async fn run<F>(config: config::Config, shutdown: F) -> Result<(), ServiceError>
where
    F: Future<Output = ()> + Send + 'static,
{
    config.validate()?;

    let kv = kv::from_config(&config.kv)?;
    let state = api::AppState::new(store::ConfigStore::new(kv), crate::metrics::ApiMetrics::new());
    let readiness = Readiness::new();

    let admin_listener = bind(&config.admin_listener.host, config.admin_listener.port).await?;
    let api_listener = bind(&config.listener.host, config.listener.port).await?;

    let admin_service = AdminService::new(readiness.clone());
    let admin_task = tokio::spawn(async move {
        if let Err(e) = run_http_service::<_, _, ServiceError>(admin_listener, admin_service).await {
            tracing::error!(error = %e, "admin listener failed");
        }
    });

    readiness.mark_ready();
    tracing::info!("config service started");

    let (drain_tx, drain_rx) = oneshot::channel::<()>();
    let server = axum::serve(api_listener, api::router(state))
        .with_graceful_shutdown({
            let readiness = readiness.clone();
            async move {
                shutdown.await;
                tracing::info!("shutting down, draining in-flight requests");
                readiness.mark_not_ready();
                let _ = drain_tx.send(());
            }
        })
        .into_future();

    let grace_period = async {
        match drain_rx.await {
            Ok(()) => tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await,
            // Server exited on its own
            Err(_) => std::future::pending().await,
        }
    };

    let result = tokio::select! {
        res = server => res.map_err(ServiceError::from),
        _ = grace_period => {
            tracing::warn!("grace period elapsed with requests still in flight");
            Ok(())
        }
    };

    admin_task.abort();
    tracing::info!("config service stopped");
    result
}
