pub mod health;
pub mod metrics;

use metrics_exporter_prometheus::PrometheusHandle;
use saga::InMemoryQueue;

/// State shared by the worker's HTTP routes.
#[derive(Clone)]
pub struct AppState {
    pub queue: InMemoryQueue,
    pub metrics: PrometheusHandle,
}
