//! Local FIFO queue consumed by a single worker.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use arkhe_models::QueueLimit;

use crate::error::{QueueError, QueueResult};
use crate::job::QueueEntry;

/// Queue configuration.
#[derive(Debug, Clone, Default)]
pub struct QueueConfig {
    /// Maximum number of waiting jobs; 0 means unlimited
    pub max_queue_length: usize,
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_queue_length: std::env::var("MAX_QUEUE_LENGTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        }
    }
}

/// In-process job queue.
///
/// Admission is a two-step hand-off: [`LocalQueue::try_reserve`] checks
/// capacity and claims a slot under one lock, and [`QueueSlot::fill`] makes
/// the entry visible to the worker. Whatever the caller does between the
/// two (recording `queued`) is ordered before the worker can see the job.
/// Depth counts waiting entries plus claimed slots; the job the worker is
/// running is not included.
pub struct LocalQueue {
    id: String,
    limit: QueueLimit,
    state: Mutex<QueueState>,
    notify: Notify,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<QueueEntry>,
    reserved: usize,
}

impl QueueState {
    fn depth(&self) -> usize {
        self.entries.len() + self.reserved
    }
}

impl LocalQueue {
    /// Create a new queue.
    pub fn new(config: QueueConfig) -> Self {
        let id = format!("queue-{}", &Uuid::new_v4().simple().to_string()[..8]);
        Self {
            id,
            limit: QueueLimit::from_max(config.max_queue_length),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self::new(QueueConfig::from_env())
    }

    /// Identifier of this queue instance.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Configured capacity.
    pub fn limit(&self) -> QueueLimit {
        self.limit
    }

    /// Number of waiting entries, including claimed slots.
    pub fn len(&self) -> usize {
        self.lock().depth()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim room for one entry, or fail with [`QueueError::Full`] and the
    /// current depth.
    ///
    /// The slot counts against capacity until it is filled or dropped.
    pub fn try_reserve(&self) -> QueueResult<QueueSlot<'_>> {
        let mut state = self.lock();
        let depth = state.depth();
        if !self.limit.admits(depth) {
            warn!(queue_id = %self.id, length = depth, "Queue full, rejecting job");
            return Err(QueueError::Full {
                length: depth,
                max: match self.limit {
                    QueueLimit::Bounded(max) => max,
                    QueueLimit::Unlimited => 0,
                },
            });
        }
        state.reserved += 1;
        Ok(QueueSlot {
            queue: self,
            filled: false,
        })
    }

    /// Reserve and fill in one step. Returns the depth after the push.
    pub fn try_enqueue(&self, entry: QueueEntry) -> QueueResult<usize> {
        Ok(self.try_reserve()?.fill(entry))
    }

    /// Take the oldest entry, waiting until one is available.
    ///
    /// Cancel-safe: an entry is only removed once the future completes.
    pub async fn dequeue(&self) -> QueueEntry {
        loop {
            if let Some(entry) = self.try_dequeue() {
                return entry;
            }
            self.notify.notified().await;
        }
    }

    /// Take the oldest entry without waiting.
    pub fn try_dequeue(&self) -> Option<QueueEntry> {
        self.lock().entries.pop_front()
    }

    /// Remove all waiting entries.
    pub fn drain(&self) -> Vec<QueueEntry> {
        self.lock().entries.drain(..).collect()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Capacity claimed by [`LocalQueue::try_reserve`].
///
/// Dropping an unfilled slot gives the capacity back.
#[must_use = "an unfilled slot is released when dropped"]
pub struct QueueSlot<'a> {
    queue: &'a LocalQueue,
    filled: bool,
}

impl QueueSlot<'_> {
    /// Push the entry and wake the worker. Returns the depth after the push.
    pub fn fill(mut self, entry: QueueEntry) -> usize {
        let depth = {
            let mut state = self.queue.lock();
            debug!(queue_id = %self.queue.id, job_id = %entry.request.job_id, "Enqueued job");
            state.reserved -= 1;
            state.entries.push_back(entry);
            state.depth()
        };
        self.filled = true;
        self.queue.notify.notify_one();
        depth
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        if !self.filled {
            self.queue.lock().reserved -= 1;
        }
    }
}

impl std::fmt::Debug for QueueSlot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueSlot")
            .field("queue_id", &self.queue.id)
            .field("filled", &self.filled)
            .finish()
    }
}

impl std::fmt::Debug for LocalQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalQueue")
            .field("id", &self.id)
            .field("limit", &self.limit)
            .field("len", &self.len())
            .finish()
    }
}
