//! Per-job structured logging.
//!
//! A [`JobLogger`] owns one `job` span carrying the job ID and execution
//! mode. Every lifecycle event is emitted as a child of that span, so a job
//! can be followed across dispatch, the worker and the webhook even when the
//! events are logged outside an instrumented future.

use std::time::Instant;

use tracing::{error, info, info_span, warn, Span};

use arkhe_models::JobId;

/// Emits lifecycle events for one job.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    span: Span,
    created_at: Instant,
}

impl JobLogger {
    /// `mode` is the execution mode name ("queue", "bypass", "inline", "submit").
    pub fn new(job_id: &JobId, mode: &str) -> Self {
        Self {
            job_id: job_id.clone(),
            span: info_span!("job", job_id = %job_id, mode = %mode),
            created_at: Instant::now(),
        }
    }

    pub fn log_start(&self, path: &str) {
        info!(parent: &self.span, path, "Job started");
    }

    pub fn log_progress(&self, message: &str) {
        info!(parent: &self.span, "Job progress: {}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(parent: &self.span, "Job warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(parent: &self.span, "Job error: {}", message);
    }

    /// Includes the time since this logger was created.
    pub fn log_completion(&self, message: &str) {
        info!(
            parent: &self.span,
            elapsed_ms = self.created_at.elapsed().as_millis() as u64,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// The job span, for instrumenting the job's future.
    pub fn span(&self) -> Span {
        self.span.clone()
    }
}
