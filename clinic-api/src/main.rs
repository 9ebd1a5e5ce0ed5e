//! Clinic Queue API Server Entry Point
//!
//! Loads configuration, builds the store, metrics, broadcaster and engine,
//! and serves the Axum router until Ctrl-C or SIGTERM.

use std::sync::Arc;

use axum::Router;
use clinic_api::{
    jobs::{counter_reset_task, CounterResetConfig},
    telemetry::{init_tracer, TelemetryConfig},
    ApiConfig, ApiError, ApiResult, AuthConfig, Broadcaster, DbConfig, PgQueueStore, QueueEngine,
    QueueMetrics, SecureRouterBuilder, StoreBackend, TokenCounter,
};
use clinic_storage::{CounterStore, InMemoryQueueStore, QueueStore};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::from_env();
    init_tracer(&telemetry_config)?;

    let api_config = ApiConfig::from_env()?;
    let auth_config = AuthConfig::from_env();
    let reset_config = CounterResetConfig::from_env();

    let (queue_store, counter_store) = build_store(&api_config).await?;

    let metrics = Arc::new(QueueMetrics::new()?);
    let broadcaster = Arc::new(Broadcaster::new(api_config.ws_buffer, metrics.clone()));
    let engine = QueueEngine::new(
        queue_store.clone(),
        TokenCounter::new(counter_store.clone()),
        broadcaster.clone(),
        metrics.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reset_handle = if reset_config.enabled {
        Some(tokio::spawn(counter_reset_task(
            engine.clone(),
            counter_store,
            reset_config,
            shutdown_rx,
        )))
    } else {
        tracing::info!("Automatic counter reset disabled");
        None
    };

    let addr = api_config.bind_addr()?;
    let app: Router = SecureRouterBuilder::new(
        engine,
        broadcaster,
        queue_store,
        metrics,
        api_config,
        auth_config,
    )?
    .build();

    tracing::info!(%addr, "Starting clinic queue API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = reset_handle {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Counter reset task did not stop cleanly");
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}

/// One store instance serves both the queue and the counters.
async fn build_store(
    config: &ApiConfig,
) -> ApiResult<(Arc<dyn QueueStore>, Arc<dyn CounterStore>)> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory queue store; queues are lost on restart");
            let store = Arc::new(InMemoryQueueStore::new());
            Ok((store.clone(), store))
        }
        StoreBackend::Postgres => {
            let db_config = DbConfig::from_env();
            let store = Arc::new(PgQueueStore::from_config(&db_config)?);
            if config.run_migrations {
                store.run_migrations().await?;
            }
            tracing::info!(
                host = %db_config.host,
                dbname = %db_config.dbname,
                "Using PostgreSQL queue store"
            );
            Ok((store.clone(), store))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
