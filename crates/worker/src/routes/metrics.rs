//! Prometheus scrape endpoint.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;

use super::AppState;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics: refreshes the queue depth gauges, then renders every
/// metric in Prometheus text format.
pub async fn render(State(state): State<AppState>) -> impl IntoResponse {
    for (queue, depth) in state.queue.depths().await {
        ::metrics::gauge!("saga_queue_depth", "queue" => queue).set(depth as f64);
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        state.metrics.render(),
    )
}
