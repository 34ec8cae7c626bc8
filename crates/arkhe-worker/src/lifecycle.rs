//! Guarded execution and the completion pipeline.
//!
//! Every execution path (local worker, synchronous request, batch-job
//! execution) funnels through [`run_guarded`] and [`JobServices::finish`],
//! so failures are captured, envelopes are built and status is recorded
//! the same way everywhere.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::Value;

use arkhe_models::{
    JobRequest, JobState, JobStatusRecord, Payload, ResponseEnvelope, SerializationFallback,
    WorkOutcome,
};
use arkhe_queue::WorkFn;

use crate::logging::JobLogger;
use crate::metrics;
use crate::recorder::StatusRecorder;
use crate::webhook::WebhookNotifier;

/// Run a unit of work, turning errors and panics into a 500 failure.
pub async fn run_guarded(work: WorkFn) -> WorkOutcome {
    let future = match std::panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(future) => future,
        Err(panic) => return WorkOutcome::internal(panic_message(panic.as_ref())),
    };

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => WorkOutcome::internal(e.to_string()),
        Err(panic) => WorkOutcome::internal(panic_message(panic.as_ref())),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("job panicked: {}", detail)
}

/// Queue wait and run time of one execution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub run: Duration,
    pub queue: Duration,
    pub total: Duration,
}

impl Timing {
    /// Timing for a job that arrived at `received_at` and started at `started_at`.
    pub fn since(received_at: Instant, started_at: Instant) -> Self {
        let now = Instant::now();
        Self {
            run: now.saturating_duration_since(started_at),
            queue: started_at.saturating_duration_since(received_at),
            total: now.saturating_duration_since(received_at),
        }
    }

    /// Timing for a job that ran as soon as it arrived.
    pub fn immediate(started_at: Instant) -> Self {
        Self::since(started_at, started_at)
    }
}

/// Everything needed to finish one executed job.
#[derive(Debug)]
pub struct Completion<'a> {
    pub request: &'a JobRequest,
    /// Execution mode, for logs and metrics
    pub mode: &'a str,
    pub queue_id: &'a str,
    pub process_id: u32,
    pub outcome: WorkOutcome,
    pub timing: Timing,
    /// Entries still waiting in the local queue (0 outside the queue)
    pub queue_length: usize,
}

/// HTTP status matching a serialized envelope's `code`, 500 if unusable.
pub fn envelope_status(body: &Value) -> u16 {
    body.get("code")
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
        .filter(|code| (100..=599).contains(code))
        .unwrap_or(500)
}

/// Result of [`JobServices::finish`].
#[derive(Debug, Clone)]
pub struct FinishedJob {
    pub status: u16,
    pub body: Value,
    pub state: JobState,
}

/// Collaborators every execution path needs.
#[derive(Clone)]
pub struct JobServices {
    pub recorder: Arc<dyn StatusRecorder>,
    pub notifier: Arc<dyn WebhookNotifier>,
    /// Echoed in every envelope
    pub build_number: String,
}

impl JobServices {
    pub fn new(
        recorder: Arc<dyn StatusRecorder>,
        notifier: Arc<dyn WebhookNotifier>,
        build_number: impl Into<String>,
    ) -> Self {
        Self {
            recorder,
            notifier,
            build_number: build_number.into(),
        }
    }

    /// Record a status transition. Failures are logged, never returned.
    pub async fn record(&self, record: JobStatusRecord) {
        if let Err(e) = self.recorder.record(&record).await {
            metrics::record_status_write_failure();
            tracing::warn!(
                job_id = %record.job_id,
                job_status = %record.job_status,
                error = %e,
                "Failed to record job status"
            );
        }
    }

    /// Envelope with the fields every mode carries.
    pub fn envelope(
        &self,
        code: u16,
        request: &JobRequest,
        message: impl Into<Payload>,
        process_id: u32,
        queue_id: &str,
    ) -> ResponseEnvelope {
        ResponseEnvelope::new(
            code,
            request.job_id.clone(),
            request.caller_id(),
            message,
            process_id,
            queue_id,
            self.build_number.as_str(),
        )
    }

    /// Serialize an envelope, logging whichever fallback was needed.
    pub fn serialize(&self, envelope: &ResponseEnvelope, logger: &JobLogger) -> Value {
        let json = envelope.to_json();
        match &json.fallback {
            None => {}
            Some(SerializationFallback::Sanitized { error }) => {
                metrics::record_serialization_fallback("sanitized");
                logger.log_warning(&format!("envelope needed sanitizing: {}", error));
            }
            Some(SerializationFallback::Partial { error }) => {
                metrics::record_serialization_fallback("partial");
                logger.log_error(&format!("envelope could not be serialized, sent partial: {}", error));
            }
        }
        json.body
    }

    /// Build the envelope for an executed job, record the terminal status
    /// and deliver the webhook if the caller asked for one.
    pub async fn finish(&self, completion: Completion<'_>) -> FinishedJob {
        let Completion {
            request,
            mode,
            queue_id,
            process_id,
            outcome,
            timing,
            queue_length,
        } = completion;
        let logger = JobLogger::new(&request.job_id, mode);

        let status = outcome.status_code();
        let (message, response, state) = match outcome {
            WorkOutcome::Success { payload } => {
                (Payload::text("success"), payload.sanitized(), JobState::Done)
            }
            WorkOutcome::Failure { message, .. } => {
                logger.log_error(&message);
                (Payload::Text(message), Payload::Null, JobState::Failed)
            }
        };

        let envelope = self
            .envelope(status, request, message, process_id, queue_id)
            .with_endpoint(request.path.as_str())
            .with_response(response)
            .with_timing(
                timing.run.as_secs_f64(),
                timing.queue.as_secs_f64(),
                timing.total.as_secs_f64(),
            )
            .with_queue_length(queue_length);
        let body = self.serialize(&envelope, &logger);
        let status = envelope_status(&body);

        self.record(
            JobStatusRecord::new(request.job_id.clone(), state, queue_id, process_id)
                .with_response(body.clone()),
        )
        .await;
        metrics::record_job_finished(mode, state == JobState::Done, timing.run.as_secs_f64());
        logger.log_completion(&format!(
            "status={} run_time={:.3}s queue_time={:.3}s",
            status,
            timing.run.as_secs_f64(),
            timing.queue.as_secs_f64()
        ));

        if let Some(url) = request.webhook_url() {
            logger.log_progress("sending webhook");
            self.notifier.notify(url, &body).await;
        }

        FinishedJob { status, body, state }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::MemoryStatusRecorder;
    use crate::test_support::RecordingNotifier;
    use arkhe_models::OpaqueValue;
    use serde_json::json;

    fn services() -> (JobServices, Arc<MemoryStatusRecorder>, Arc<RecordingNotifier>) {
        let recorder = Arc::new(MemoryStatusRecorder::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let services = JobServices::new(recorder.clone(), notifier.clone(), "42");
        (services, recorder, notifier)
    }

    #[derive(Debug)]
    struct Socket;

    impl OpaqueValue for Socket {
        fn type_name(&self) -> &str {
            "Socket"
        }

        fn to_text(&self) -> Option<String> {
            None
        }
    }

    #[tokio::test]
    async fn test_run_guarded_captures_errors() {
        let work: WorkFn = Box::new(|| Box::pin(async { Err(anyhow::anyhow!("disk full")) }));
        let outcome = run_guarded(work).await;
        assert_eq!(outcome, WorkOutcome::internal("disk full"));
    }

    #[tokio::test]
    async fn test_run_guarded_captures_panics() {
        let work: WorkFn = Box::new(|| {
            Box::pin(async {
                if true {
                    panic!("bad frame");
                }
                Ok(WorkOutcome::success("unreachable"))
            })
        });
        match run_guarded(work).await {
            WorkOutcome::Failure { message, status } => {
                assert_eq!(status, 500);
                assert!(message.contains("bad frame"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let work: WorkFn = Box::new(|| panic!("before the future"));
        assert_eq!(run_guarded(work).await.status_code(), 500);
    }

    #[tokio::test]
    async fn test_run_guarded_passes_collaborator_status_through() {
        let work: WorkFn =
            Box::new(|| Box::pin(async { Ok(WorkOutcome::failure("media_url is required", 400)) }));
        assert_eq!(run_guarded(work).await.status_code(), 400);
    }

    #[tokio::test]
    async fn test_finish_success_sanitizes_and_notifies() {
        let (services, recorder, notifier) = services();
        let request = JobRequest::new(
            "/v1/media/metadata",
            json!({"id": "caller-9", "webhook_url": "https://example.com/hook"}),
        );
        let payload = Payload::Map(vec![
            (Payload::text("raw"), Payload::bytes(b"abc".to_vec())),
            (Payload::Int(1), Payload::opaque(Socket)),
        ]);

        let finished = services
            .finish(Completion {
                request: &request,
                mode: "queue",
                queue_id: "queue-1",
                process_id: 7,
                outcome: WorkOutcome::success(payload),
                timing: Timing::immediate(Instant::now()),
                queue_length: 2,
            })
            .await;

        assert_eq!(finished.status, 200);
        assert_eq!(finished.state, JobState::Done);
        assert_eq!(finished.body["message"], "success");
        assert_eq!(finished.body["response"], json!({"raw": "abc", "1": null}));
        assert_eq!(finished.body["endpoint"], "/v1/media/metadata");
        assert_eq!(finished.body["id"], "caller-9");
        assert_eq!(finished.body["queue_length"], 2);
        assert_eq!(finished.body["build_number"], "42");

        let record = recorder.latest(&request.job_id).unwrap();
        assert_eq!(record.job_status, JobState::Done);
        assert_eq!(record.response, Some(finished.body.clone()));

        let calls = notifier.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "https://example.com/hook");
        assert_eq!(calls[0].1, finished.body);
    }

    #[tokio::test]
    async fn test_finish_failure_records_failed_without_webhook() {
        let (services, recorder, notifier) = services();
        let request = JobRequest::new("/x", json!({"webhook_url": ""}));

        let finished = services
            .finish(Completion {
                request: &request,
                mode: "bypass",
                queue_id: "bypass",
                process_id: 7,
                outcome: WorkOutcome::internal("boom"),
                timing: Timing::immediate(Instant::now()),
                queue_length: 0,
            })
            .await;

        assert_eq!(finished.status, 500);
        assert_eq!(finished.body["message"], "boom");
        assert_eq!(finished.body["response"], Value::Null);
        assert_eq!(recorder.history(&request.job_id), vec![JobState::Failed]);
        assert!(notifier.calls().is_empty());
    }

    #[test]
    fn test_timing_since() {
        let accepted = Instant::now();
        std::thread::sleep(Duration::from_millis(5));
        let started = Instant::now();
        let timing = Timing::since(accepted, started);
        assert!(timing.queue >= Duration::from_millis(5));
        assert!(timing.total >= timing.queue + timing.run);
    }
}
