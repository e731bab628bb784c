//! Health check endpoint.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Messages waiting per queue.
    pub queues: BTreeMap<String, usize>,
}

/// GET /health: returns worker status and queue depths.
pub async fn check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        queues: state.queue.depths().await.into_iter().collect(),
    })
}
