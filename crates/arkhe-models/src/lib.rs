//! Shared data models for the Arkhe job dispatch service.
//!
//! This crate provides Serde-serializable types for:
//! - Job identifiers, lifecycle states and status records
//! - The dynamic [`Payload`] returned by operations, and its sanitizer
//! - The response envelope sent to callers and webhooks
//! - The tagged outcome of a unit of work

pub mod envelope;
pub mod job;
pub mod job_status;
pub mod outcome;
pub mod payload;

// Re-export common types
pub use envelope::{
    EnvelopeJson, QueueLimit, ResponseEnvelope, SerializationFallback, MAX_ENVELOPE_BYTES,
};
pub use job::{JobId, JobRequest, JobState};
pub use job_status::JobStatusRecord;
pub use outcome::WorkOutcome;
pub use payload::{sanitize, OpaqueValue, Payload};
