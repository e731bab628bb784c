//! Worker start-up errors.

use thiserror::Error;

/// Errors that stop the worker from starting or serving.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to install Prometheus recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("failed to connect to database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}
