//! Job runtime shared by the local worker and synchronous execution.
//!
//! This crate provides:
//! - Status recorders (file-backed and in-memory)
//! - Webhook delivery of final envelopes
//! - Guarded execution and the completion pipeline
//! - The single consumer of the local queue

pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod recorder;
pub mod webhook;

pub use error::{RecorderError, RecorderResult, WebhookError};
pub use executor::QueueWorker;
pub use lifecycle::{envelope_status, run_guarded, Completion, FinishedJob, JobServices, Timing};
pub use logging::JobLogger;
pub use recorder::{FileStatusRecorder, MemoryStatusRecorder, StatusRecorder};
pub use webhook::{HttpWebhookNotifier, WebhookNotifier};
