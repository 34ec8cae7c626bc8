//! Job runtime metrics.
//!
//! Recorded through the `metrics` facade; the API binary installs the
//! Prometheus exporter.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_DISPATCHED_TOTAL: &str = "arkhe_jobs_dispatched_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "arkhe_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "arkhe_jobs_failed_total";
    pub const JOB_RUN_SECONDS: &str = "arkhe_job_run_seconds";
    pub const JOB_QUEUE_WAIT_SECONDS: &str = "arkhe_job_queue_wait_seconds";

    pub const QUEUE_LENGTH: &str = "arkhe_queue_length";
    pub const QUEUE_REJECTIONS_TOTAL: &str = "arkhe_queue_rejections_total";

    pub const WEBHOOK_DELIVERIES_TOTAL: &str = "arkhe_webhook_deliveries_total";
    pub const WEBHOOK_FAILURES_TOTAL: &str = "arkhe_webhook_failures_total";

    pub const STATUS_WRITE_FAILURES_TOTAL: &str = "arkhe_status_write_failures_total";
    pub const SERIALIZATION_FALLBACKS_TOTAL: &str = "arkhe_serialization_fallbacks_total";
}

/// Record a job entering the dispatcher in `mode`.
pub fn record_job_dispatched(mode: &str) {
    let labels = [("mode", mode.to_string())];
    counter!(names::JOBS_DISPATCHED_TOTAL, &labels).increment(1);
}

/// Record a job that ran to a result.
pub fn record_job_finished(mode: &str, success: bool, run_secs: f64) {
    let labels = [("mode", mode.to_string())];
    if success {
        counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
    } else {
        counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
    }
    histogram!(names::JOB_RUN_SECONDS, &labels).record(run_secs);
}

pub fn record_queue_wait(secs: f64) {
    histogram!(names::JOB_QUEUE_WAIT_SECONDS).record(secs);
}

/// Update queue length gauge.
pub fn set_queue_length(length: usize) {
    gauge!(names::QUEUE_LENGTH).set(length as f64);
}

pub fn record_queue_rejection() {
    counter!(names::QUEUE_REJECTIONS_TOTAL).increment(1);
}

pub fn record_webhook_delivered() {
    counter!(names::WEBHOOK_DELIVERIES_TOTAL).increment(1);
}

pub fn record_webhook_failed(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::WEBHOOK_FAILURES_TOTAL, &labels).increment(1);
}

pub fn record_status_write_failure() {
    counter!(names::STATUS_WRITE_FAILURES_TOTAL).increment(1);
}

/// Record an envelope that needed the sanitizer or the partial fallback.
pub fn record_serialization_fallback(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::SERIALIZATION_FALLBACKS_TOTAL, &labels).increment(1);
}
