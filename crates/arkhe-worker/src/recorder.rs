//! Job status recording.
//!
//! One record per job, overwritten at every lifecycle transition.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use arkhe_models::{JobId, JobState, JobStatusRecord};

use crate::error::RecorderResult;

/// Durable-ish store of the latest status of each job.
#[async_trait]
pub trait StatusRecorder: Send + Sync {
    /// Store `record`, replacing any previous record for the same job.
    async fn record(&self, record: &JobStatusRecord) -> RecorderResult<()>;

    /// Latest record for `job_id`, if any.
    async fn fetch(&self, job_id: &JobId) -> RecorderResult<Option<JobStatusRecord>>;
}

// ============================================================================
// File recorder
// ============================================================================

/// Writes `<dir>/<job_id>.json`, one file per job.
#[derive(Debug, Clone)]
pub struct FileStatusRecorder {
    dir: PathBuf,
}

impl FileStatusRecorder {
    /// Create the recorder, creating `dir` if needed.
    pub async fn new(dir: impl Into<PathBuf>) -> RecorderResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Create from environment variables (`JOB_STATUS_DIR`).
    pub async fn from_env() -> RecorderResult<Self> {
        let dir = std::env::var("JOB_STATUS_DIR").unwrap_or_else(|_| "/tmp/arkhe/jobs".to_string());
        Self::new(dir).await
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, job_id: &JobId) -> PathBuf {
        self.dir.join(format!("{}.json", job_id.as_str()))
    }
}

#[async_trait]
impl StatusRecorder for FileStatusRecorder {
    async fn record(&self, record: &JobStatusRecord) -> RecorderResult<()> {
        let path = self.path_for(&record.job_id);
        // Unique per write so concurrent transitions of one job never share a temp file
        let tmp = self.dir.join(format!(
            ".{}.{}.tmp",
            record.job_id.as_str(),
            JobId::new().as_str()
        ));

        let bytes = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(
            job_id = %record.job_id,
            job_status = %record.job_status,
            path = %path.display(),
            "Recorded job status"
        );
        Ok(())
    }

    async fn fetch(&self, job_id: &JobId) -> RecorderResult<Option<JobStatusRecord>> {
        match tokio::fs::read(self.path_for(job_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Memory recorder
// ============================================================================

/// In-memory recorder that also keeps every transition.
#[derive(Debug, Default)]
pub struct MemoryStatusRecorder {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    latest: HashMap<JobId, JobStatusRecord>,
    history: HashMap<JobId, Vec<JobState>>,
}

impl MemoryStatusRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// States recorded for `job_id`, oldest first.
    pub fn history(&self, job_id: &JobId) -> Vec<JobState> {
        self.lock().history.get(job_id).cloned().unwrap_or_default()
    }

    /// Latest record for `job_id` without going through the async trait.
    pub fn latest(&self, job_id: &JobId) -> Option<JobStatusRecord> {
        self.lock().latest.get(job_id).cloned()
    }

    /// Every job's latest record.
    pub fn all(&self) -> Vec<JobStatusRecord> {
        self.lock().latest.values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl StatusRecorder for MemoryStatusRecorder {
    async fn record(&self, record: &JobStatusRecord) -> RecorderResult<()> {
        let mut state = self.lock();
        state
            .history
            .entry(record.job_id.clone())
            .or_default()
            .push(record.job_status);
        state.latest.insert(record.job_id.clone(), record.clone());
        Ok(())
    }

    async fn fetch(&self, job_id: &JobId) -> RecorderResult<Option<JobStatusRecord>> {
        Ok(self.latest(job_id))
    }
}
