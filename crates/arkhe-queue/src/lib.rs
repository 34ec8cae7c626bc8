//! In-process FIFO job queue.
//!
//! This crate provides:
//! - Queue entries carrying the deferred unit of work
//! - Atomic capacity check with slot reservation, then enqueue
//! - Blocking dequeue for a single consumer

pub mod error;
pub mod job;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::{QueueEntry, WorkFn, WorkFuture};
pub use queue::{LocalQueue, QueueConfig, QueueSlot};
