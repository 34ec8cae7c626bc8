//! Queue entries.

use std::time::Instant;

use futures::future::BoxFuture;

use arkhe_models::{JobRequest, WorkOutcome};

/// Future produced by a unit of work.
pub type WorkFuture = BoxFuture<'static, anyhow::Result<WorkOutcome>>;

/// Deferred unit of work; called once by whoever executes the job.
pub type WorkFn = Box<dyn FnOnce() -> WorkFuture + Send>;

/// A job waiting in the local queue.
pub struct QueueEntry {
    /// The request that created the job
    pub request: JobRequest,
    /// Work to run when dequeued
    pub work: WorkFn,
    /// When the request arrived
    pub received_at: Instant,
    /// Process that accepted the job
    pub process_id: u32,
}

impl QueueEntry {
    pub fn new(request: JobRequest, work: WorkFn) -> Self {
        Self {
            received_at: request.received_at,
            request,
            work,
            process_id: std::process::id(),
        }
    }
}

impl std::fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEntry")
            .field("job_id", &self.request.job_id)
            .field("path", &self.request.path)
            .field("received_at", &self.received_at)
            .finish_non_exhaustive()
    }
}
