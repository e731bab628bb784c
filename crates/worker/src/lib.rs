//! Payment saga worker.
//!
//! Runs every saga step over an in-process queue, sweeps expired
//! reservations on a timer and exposes `/health` and `/metrics` over HTTP.

pub mod config;
pub mod error;
pub mod routes;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{InMemoryQueue, SagaRuntime};
use store::Store;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use config::{LogFormat, WorkerConfig};
use routes::AppState;

/// Installs the global tracing subscriber. `RUST_LOG` controls filtering.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Creates the router serving health and metrics.
pub fn create_app(queue: InMemoryQueue, metrics_handle: PrometheusHandle) -> Router {
    let state = AppState {
        queue,
        metrics: metrics_handle,
    };

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/metrics", get(routes::metrics::render))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Drives the saga until `shutdown` resolves.
///
/// Every poll interval the queues are pumped once and finished payments are
/// taken off the event bus. Every sweep interval expired reservations are
/// released.
pub async fn run<S, F>(runtime: Arc<SagaRuntime<S>>, config: &WorkerConfig, shutdown: F)
where
    S: Store + Clone + 'static,
    F: Future<Output = ()>,
{
    let mut poll = tokio::time::interval(config.poll_interval);
    let mut sweep = tokio::time::interval(config.sweep_interval);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = poll.tick() => {
                let stats = runtime.pump().await;
                if !stats.is_idle() {
                    tracing::debug!(
                        delivered = stats.delivered,
                        failed = stats.failed,
                        recovered = stats.recovered,
                        "queue pass"
                    );
                }
                for event in runtime.drain_bus().await {
                    tracing::info!(
                        kind = %event.kind,
                        payment_id = %event.payment_id,
                        "payment finished"
                    );
                }
            }
            _ = sweep.tick() => {
                match runtime.sweep_expired(Utc::now()).await {
                    Ok(report) if report.failed > 0 => {
                        tracing::warn!(failed = report.failed, "expiry sweep left holds for the next pass");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "expiry sweep failed"),
                }
            }
        }
    }

    tracing::info!("saga worker stopped");
}
