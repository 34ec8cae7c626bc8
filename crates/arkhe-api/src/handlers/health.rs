//! Health check handlers.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use arkhe_models::QueueLimit;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub build_number: String,
    pub queue_id: String,
    pub queue_length: usize,
    pub max_queue_length: QueueLimit,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue = state.dispatcher.queue();
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build_number: state.config.build_number.clone(),
        queue_id: queue.id().to_string(),
        queue_length: queue.len(),
        max_queue_length: queue.limit(),
        timestamp: Utc::now().to_rfc3339(),
    })
}
