//! Job status lookup handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use arkhe_models::{JobId, JobStatusRecord};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Body of `POST /v1/toolkit/job/status`.
#[derive(Debug, Deserialize)]
pub struct JobStatusRequest {
    pub job_id: String,
}

/// Latest status record of a job (POST with a JSON body).
pub async fn job_status(
    State(state): State<AppState>,
    Json(body): Json<JobStatusRequest>,
) -> ApiResult<Json<JobStatusRecord>> {
    lookup(&state, &body.job_id).await.map(Json)
}

/// Latest status record of a job (GET by path).
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusRecord>> {
    lookup(&state, &job_id).await.map(Json)
}

async fn lookup(state: &AppState, job_id: &str) -> ApiResult<JobStatusRecord> {
    if !JobId::is_well_formed(job_id) {
        return Err(ApiError::bad_request(format!("Invalid job_id: {}", job_id)));
    }

    state
        .recorder
        .fetch(&JobId::from_string(job_id))
        .await
        .map_err(|e| ApiError::internal(&state.config, e))?
        .ok_or_else(|| ApiError::not_found(format!("Job {} not found", job_id)))
}
