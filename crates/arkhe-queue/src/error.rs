//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("MAX_QUEUE_LENGTH ({max}) reached")]
    Full { length: usize, max: usize },
}

impl QueueError {
    /// Entries waiting when the error was raised.
    pub fn queue_length(&self) -> usize {
        match self {
            QueueError::Full { length, .. } => *length,
        }
    }
}
