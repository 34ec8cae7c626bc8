//! Job status records written at every lifecycle transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobState};

/// Snapshot of a job's lifecycle, overwritten at each transition.
///
/// Stored by the status recorder keyed by `job_id`; the last write wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatusRecord {
    /// Current lifecycle state
    pub job_status: JobState,
    /// Job identifier
    pub job_id: JobId,
    /// Queue, worker or external execution that owns the job
    pub queue_id: String,
    /// OS process that handled the job
    pub process_id: u32,
    /// Final envelope once terminal
    pub response: Option<serde_json::Value>,
    /// When this snapshot was written
    pub updated_at: DateTime<Utc>,
}

impl JobStatusRecord {
    /// Create a record without a response.
    pub fn new(job_id: JobId, job_status: JobState, queue_id: impl Into<String>, process_id: u32) -> Self {
        Self {
            job_status,
            job_id,
            queue_id: queue_id.into(),
            process_id,
            response: None,
            updated_at: Utc::now(),
        }
    }

    /// Attach the envelope sent to the caller.
    pub fn with_response(mut self, response: serde_json::Value) -> Self {
        self.response = Some(response);
        self
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.job_status.is_terminal()
    }
}
