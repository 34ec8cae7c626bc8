//! Per-request job dispatch.
//!
//! Decides how each request runs (inline, submitted, bypassed or queued),
//! records the job's status and returns the envelope the caller sees.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use arkhe_models::{JobRequest, JobState, JobStatusRecord};
use arkhe_queue::{LocalQueue, QueueEntry, QueueError, WorkFn};
use arkhe_worker::{
    envelope_status, metrics, run_guarded, Completion, JobLogger, JobServices, Timing,
};

use crate::cloud::{CloudJobSpec, CloudJobTrigger, TriggerError};
use crate::config::{DispatchConfig, ExecutionMode, RunnerRole};

/// Queue id recorded for submissions the runner gave no execution name.
pub const CLOUD_JOB_QUEUE_ID: &str = "cloud_job";

/// HTTP status and JSON envelope for one dispatched request.
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub status: StatusCode,
    pub body: Value,
    pub mode: ExecutionMode,
}

impl DispatchResponse {
    /// The HTTP status always matches the envelope's `code`.
    fn new(body: Value, mode: ExecutionMode) -> Self {
        Self {
            status: StatusCode::from_u16(envelope_status(&body))
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body,
            mode,
        }
    }
}

impl IntoResponse for DispatchResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Routes jobs to the right execution path.
#[derive(Clone)]
pub struct Dispatcher {
    config: DispatchConfig,
    queue: Arc<LocalQueue>,
    services: JobServices,
    trigger: Option<Arc<dyn CloudJobTrigger>>,
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        queue: Arc<LocalQueue>,
        services: JobServices,
        trigger: Option<Arc<dyn CloudJobTrigger>>,
    ) -> Self {
        Self {
            config,
            queue,
            services,
            trigger,
        }
    }

    pub fn queue(&self) -> &Arc<LocalQueue> {
        &self.queue
    }

    /// Dispatch one request.
    ///
    /// `bypass_requested` is set by routes that always run synchronously.
    pub async fn dispatch(
        &self,
        request: JobRequest,
        bypass_requested: bool,
        work: WorkFn,
    ) -> DispatchResponse {
        let mode = self
            .config
            .select_mode(bypass_requested, request.webhook_url().is_some());
        metrics::record_job_dispatched(mode.as_str());
        JobLogger::new(&request.job_id, mode.as_str()).log_start(&request.path);

        match mode {
            ExecutionMode::Inline => {
                let execution_name = match &self.config.role {
                    RunnerRole::BatchJob { execution_name } => execution_name.clone(),
                    RunnerRole::Service => self.queue.id().to_string(),
                };
                self.run_now(request, work, mode, &execution_name, 0).await
            }
            ExecutionMode::Submit => self.submit(request).await,
            ExecutionMode::Bypass => {
                let queue_id = self.queue.id().to_string();
                let queue_length = self.queue.len();
                self.run_now(request, work, mode, &queue_id, queue_length).await
            }
            ExecutionMode::Queue => self.enqueue(request, work).await,
        }
    }

    /// Execute on the current task and finish the job.
    async fn run_now(
        &self,
        request: JobRequest,
        work: WorkFn,
        mode: ExecutionMode,
        queue_id: &str,
        queue_length: usize,
    ) -> DispatchResponse {
        let process_id = std::process::id();

        self.services
            .record(JobStatusRecord::new(
                request.job_id.clone(),
                JobState::Running,
                queue_id,
                process_id,
            ))
            .await;

        let outcome = run_guarded(work).await;
        let finished = self
            .services
            .finish(Completion {
                request: &request,
                mode: mode.as_str(),
                queue_id,
                process_id,
                outcome,
                timing: Timing::immediate(request.received_at),
                queue_length,
            })
            .await;

        DispatchResponse::new(finished.body, mode)
    }

    /// Hand the request to the external batch runner.
    async fn submit(&self, request: JobRequest) -> DispatchResponse {
        let mode = ExecutionMode::Submit;
        let logger = JobLogger::new(&request.job_id, mode.as_str());
        let process_id = std::process::id();

        let Some(trigger) = &self.trigger else {
            let err = TriggerError::NotSubmitted("no Cloud Run trigger configured".to_string());
            return self.submit_failed(&request, &logger, err, None).await;
        };

        let spec = CloudJobSpec::new(request.path.as_str(), request.payload.to_string());
        let response = match trigger.submit(spec).await {
            Ok(response) if response.job_submitted => response,
            Ok(response) => {
                let err = TriggerError::NotSubmitted(format!("{:?}", response));
                return self.submit_failed(&request, &logger, err, Some(trigger.as_ref())).await;
            }
            Err(err) => {
                return self.submit_failed(&request, &logger, err, Some(trigger.as_ref())).await;
            }
        };

        let queue_id = response
            .execution_short_id()
            .unwrap_or(CLOUD_JOB_QUEUE_ID)
            .to_string();
        let envelope = self
            .services
            .envelope(200, &request, response.to_payload(), process_id, &queue_id)
            .with_cloud_job(response.job_name.as_str(), response.location.as_str());
        let body = self.services.serialize(&envelope, &logger);

        self.services
            .record(
                JobStatusRecord::new(request.job_id.clone(), JobState::Submitted, queue_id.as_str(), process_id)
                    .with_response(body.clone()),
            )
            .await;
        logger.log_completion(&format!("submitted as {}", queue_id));

        DispatchResponse::new(body, mode)
    }

    async fn submit_failed(
        &self,
        request: &JobRequest,
        logger: &JobLogger,
        err: TriggerError,
        trigger: Option<&dyn CloudJobTrigger>,
    ) -> DispatchResponse {
        let process_id = std::process::id();
        let message = format!("Cloud Run job trigger failed: {}", err);
        logger.log_error(&message);

        let mut envelope = self
            .services
            .envelope(500, request, message, process_id, CLOUD_JOB_QUEUE_ID);
        if let Some((job_name, location)) = trigger.map(|t| t.target()) {
            envelope = envelope.with_cloud_job(job_name, location);
        }
        let body = self.services.serialize(&envelope, logger);

        self.services
            .record(
                JobStatusRecord::new(request.job_id.clone(), JobState::Failed, CLOUD_JOB_QUEUE_ID, process_id)
                    .with_response(body.clone()),
            )
            .await;

        DispatchResponse::new(body, ExecutionMode::Submit)
    }

    /// Push onto the local queue, or reject when it is full.
    async fn enqueue(&self, request: JobRequest, work: WorkFn) -> DispatchResponse {
        let mode = ExecutionMode::Queue;
        let logger = JobLogger::new(&request.job_id, mode.as_str());
        let process_id = std::process::id();
        let queue_id = self.queue.id().to_string();
        let limit = self.queue.limit();

        match self.queue.try_reserve() {
            Ok(slot) => {
                // The worker cannot see the job until the slot is filled,
                // so `queued` always lands before its `running`
                self.services
                    .record(JobStatusRecord::new(
                        request.job_id.clone(),
                        JobState::Queued,
                        queue_id.as_str(),
                        process_id,
                    ))
                    .await;
                let queue_length = slot.fill(QueueEntry::new(request.clone(), work));
                metrics::set_queue_length(queue_length);
                logger.log_progress(&format!("queued at depth {}", queue_length));

                let envelope = self
                    .services
                    .envelope(202, &request, "processing", process_id, &queue_id)
                    .with_queue_length(queue_length)
                    .with_max_queue_length(limit);
                DispatchResponse::new(self.services.serialize(&envelope, &logger), mode)
            }
            Err(err @ QueueError::Full { .. }) => {
                metrics::record_queue_rejection();
                logger.log_warning(&err.to_string());

                let envelope = self
                    .services
                    .envelope(429, &request, err.to_string(), process_id, &queue_id)
                    .with_queue_length(err.queue_length())
                    .with_max_queue_length(limit);
                let body = self.services.serialize(&envelope, &logger);

                self.services
                    .record(
                        JobStatusRecord::new(request.job_id.clone(), JobState::Done, queue_id.as_str(), process_id)
                            .with_response(body.clone()),
                    )
                    .await;
                DispatchResponse::new(body, mode)
            }
        }
    }
}
