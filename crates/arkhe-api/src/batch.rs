//! Batch-job entrypoint.
//!
//! A Cloud Run Job execution started by submit mode receives the original
//! request in `GCP_JOB_PATH` / `GCP_JOB_PAYLOAD`. Instead of listening, the
//! binary replays it once through its own router, where it runs inline.

use anyhow::Context;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;
use tracing::{error, info};

use crate::cloud::{JOB_PATH_ENV, JOB_PAYLOAD_ENV};

/// Largest envelope read back from the router.
const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

/// The request a batch-job execution should replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub path: String,
    pub payload: String,
}

impl BatchRequest {
    /// `None` unless `GCP_JOB_PATH` is set.
    pub fn from_env() -> Option<Self> {
        let path = std::env::var(JOB_PATH_ENV).ok().filter(|p| !p.trim().is_empty())?;
        let payload = std::env::var(JOB_PAYLOAD_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "{}".to_string());
        Some(Self { path, payload })
    }
}

/// What the replayed request returned.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub status: StatusCode,
    pub body: Value,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Replay `request` through `router` and collect the envelope.
pub async fn run_batch(router: Router, request: BatchRequest) -> anyhow::Result<BatchOutcome> {
    info!(path = %request.path, "Running batch job request");

    let http_request = Request::builder()
        .method(Method::POST)
        .uri(request.path.as_str())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(request.payload))
        .context("invalid batch job request")?;

    let response = router.oneshot(http_request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), MAX_RESPONSE_BYTES)
        .await
        .context("failed to read batch job response")?;
    let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
        Value::String(String::from_utf8_lossy(&bytes).into_owned())
    });

    if status.is_success() {
        info!(status = %status, "Batch job request finished");
    } else {
        error!(status = %status, body = %body, "Batch job request failed");
    }

    Ok(BatchOutcome { status, body })
}
