//! Job identifiers, lifecycle states and the request that spawned a job.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

use crate::Payload;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check that an externally supplied id is safe to use as a lookup key.
    ///
    /// Valid format: alphanumeric characters and hyphens only, 8-64 chars.
    pub fn is_well_formed(id: &str) -> bool {
        if id.len() < 8 || id.len() > 64 {
            return false;
        }
        id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Job lifecycle state.
///
/// `queued` and `submitted` are alternatives to `running`: a queued job
/// moves to `running` once the worker picks it up, a submitted job is
/// handed to the external batch runner and never runs here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the local queue
    #[default]
    Queued,
    /// Executing in this process
    Running,
    /// Accepted by the external batch runner
    Submitted,
    /// Finished (successfully, or rejected before running)
    Done,
    /// Finished with an error
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Submitted => "submitted",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }

    /// No further transitions are made by this process.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Submitted | JobState::Done | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An incoming request for work, as seen by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Job ID generated at arrival
    pub job_id: JobId,
    /// HTTP path the request arrived on
    pub path: String,
    /// Caller's JSON body (an object, or empty)
    pub payload: serde_json::Value,
    /// Arrival time; run and queue timings are measured from here
    #[serde(skip, default = "Instant::now")]
    pub received_at: Instant,
}

impl JobRequest {
    /// Create a request with a freshly generated job ID.
    pub fn new(path: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_id: JobId::new(),
            path: path.into(),
            payload,
            received_at: Instant::now(),
        }
    }

    /// The caller's tracking token (`id`), or null.
    pub fn caller_id(&self) -> Payload {
        self.payload
            .get("id")
            .cloned()
            .map(Payload::from)
            .unwrap_or(Payload::Null)
    }

    /// The webhook URL, if the caller supplied a non-blank one.
    pub fn webhook_url(&self) -> Option<&str> {
        self.payload
            .get("webhook_url")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}
