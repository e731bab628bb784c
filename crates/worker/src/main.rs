//! Saga worker entry point.

use std::sync::Arc;

use saga::{SagaRuntime, SimulatedGateway};
use sqlx::postgres::PgPoolOptions;
use store::{InMemoryStore, PostgresStore, Store};
use tokio::signal;
use worker::config::WorkerConfig;
use worker::error::WorkerError;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn serve<S: Store + Clone + 'static>(
    config: WorkerConfig,
    store: S,
    metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
) -> Result<(), WorkerError> {
    let gateway = SimulatedGateway::new(config.saga.gateway.clone());
    let runtime = Arc::new(SagaRuntime::new(config.saga.clone(), store, gateway));

    let app = worker::create_app(runtime.queue().clone(), metrics_handle);
    let addr = config.metrics_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "serving health and metrics");

    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.changed().await;
            })
            .await
    });

    worker::run(runtime, &config, shutdown_signal()).await;

    let _ = stop_tx.send(true);
    match server.await {
        Ok(result) => result?,
        Err(e) => tracing::error!(error = %e, "metrics server task failed"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    // 1. Load configuration and initialize tracing
    let config = WorkerConfig::from_env();
    worker::init_tracing(config.log_format);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Select the store and start the saga
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(&url).await?;
            let store = PostgresStore::new(pool);
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL store");
            serve(config, store, metrics_handle).await?;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            serve(config, InMemoryStore::new(), metrics_handle).await?;
        }
    }

    tracing::info!("worker shut down gracefully");
    Ok(())
}
