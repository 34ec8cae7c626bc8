//! Axum HTTP API server.
//!
//! This crate provides:
//! - Per-request selection of the execution mode (inline, submit, bypass, queue)
//! - Cloud Run Jobs submission
//! - The batch-job entrypoint used when running as a Cloud Run Job
//! - Media operations, job status lookup, health and Prometheus metrics

pub mod batch;
pub mod cloud;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod operations;
pub mod routes;
pub mod state;
pub mod token_cache;

pub use config::{ApiConfig, CloudRunTarget, DispatchConfig, ExecutionMode, RunnerRole};
pub use dispatcher::{DispatchResponse, Dispatcher};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
