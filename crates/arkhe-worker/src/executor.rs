//! Local queue worker.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

use arkhe_models::{JobState, JobStatusRecord};
use arkhe_queue::{LocalQueue, QueueEntry};

use crate::lifecycle::{run_guarded, Completion, JobServices, Timing};
use crate::logging::JobLogger;
use crate::metrics;

/// Execution mode label for jobs run by the worker.
pub const MODE: &str = "queue";

/// Single consumer of the local queue.
///
/// Runs one job at a time in enqueue order. A failing or panicking job is
/// finished like any other; the loop only stops on shutdown.
pub struct QueueWorker {
    queue: Arc<LocalQueue>,
    services: JobServices,
    shutdown: watch::Sender<bool>,
}

impl QueueWorker {
    pub fn new(queue: Arc<LocalQueue>, services: JobServices) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            queue,
            services,
            shutdown,
        }
    }

    pub fn queue(&self) -> &Arc<LocalQueue> {
        &self.queue
    }

    /// Run the worker on its own task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Consume the queue until shutdown.
    pub async fn run(&self) {
        info!(queue_id = %self.queue.id(), "Starting queue worker");
        let mut shutdown_rx = self.shutdown.subscribe();

        while !*shutdown_rx.borrow() {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                entry = self.queue.dequeue() => {
                    self.process(entry).await;
                }
            }
        }

        let dropped = self.queue.drain();
        if !dropped.is_empty() {
            warn!(
                queue_id = %self.queue.id(),
                dropped = dropped.len(),
                "Dropping queued jobs at shutdown"
            );
        }
        info!(queue_id = %self.queue.id(), "Queue worker stopped");
    }

    /// Signal the worker to stop after the job in progress.
    pub fn shutdown(&self) {
        // Kept even when the loop has not subscribed yet
        self.shutdown.send_replace(true);
    }

    /// Execute one dequeued job to completion.
    pub async fn process(&self, entry: QueueEntry) {
        let QueueEntry {
            request,
            work,
            received_at,
            process_id,
        } = entry;
        let started_at = Instant::now();
        let logger = JobLogger::new(&request.job_id, MODE);
        let queue_id = self.queue.id().to_string();

        async {
            metrics::set_queue_length(self.queue.len());
            metrics::record_queue_wait(started_at.duration_since(received_at).as_secs_f64());
            logger.log_start(&request.path);

            self.services
                .record(JobStatusRecord::new(
                    request.job_id.clone(),
                    JobState::Running,
                    queue_id.as_str(),
                    process_id,
                ))
                .await;

            let outcome = run_guarded(work).await;

            self.services
                .finish(Completion {
                    request: &request,
                    mode: MODE,
                    queue_id: &queue_id,
                    process_id,
                    outcome,
                    timing: Timing::since(received_at, started_at),
                    queue_length: self.queue.len(),
                })
                .await;
        }
        .instrument(logger.span())
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use arkhe_models::{JobId, JobRequest, WorkOutcome};
    use arkhe_queue::{QueueConfig, WorkFn};
    use serde_json::json;

    use super::*;
    use crate::recorder::MemoryStatusRecorder;
    use crate::test_support::RecordingNotifier;

    struct Harness {
        queue: Arc<LocalQueue>,
        recorder: Arc<MemoryStatusRecorder>,
        notifier: Arc<RecordingNotifier>,
        worker: Arc<QueueWorker>,
    }

    fn harness() -> Harness {
        let queue = Arc::new(LocalQueue::new(QueueConfig::default()));
        let recorder = Arc::new(MemoryStatusRecorder::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let services = JobServices::new(recorder.clone(), notifier.clone(), "test");
        let worker = Arc::new(QueueWorker::new(Arc::clone(&queue), services));
        Harness {
            queue,
            recorder,
            notifier,
            worker,
        }
    }

    async fn wait_until_terminal(recorder: &MemoryStatusRecorder, ids: &[JobId]) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let done = ids
                    .iter()
                    .all(|id| recorder.latest(id).is_some_and(|r| r.is_terminal()));
                if done {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("jobs did not finish in time");
    }

    #[tokio::test]
    async fn test_jobs_complete_in_enqueue_order() {
        let h = harness();
        let finished = Arc::new(Mutex::new(Vec::new()));

        // Earlier jobs take longer; FIFO must still hold
        let mut ids = Vec::new();
        for (index, delay_ms) in [(0usize, 60u64), (1, 30), (2, 0)] {
            let finished = Arc::clone(&finished);
            let work: WorkFn = Box::new(move || {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    finished.lock().unwrap().push(index);
                    Ok(WorkOutcome::success(json!({"index": index})))
                })
            });
            let request = JobRequest::new("/v1/media/metadata", json!({}));
            ids.push(request.job_id.clone());
            h.queue.try_enqueue(QueueEntry::new(request, work)).unwrap();
        }

        let handle = Arc::clone(&h.worker).spawn();
        wait_until_terminal(&h.recorder, &ids).await;
        h.worker.shutdown();
        handle.await.unwrap();

        assert_eq!(*finished.lock().unwrap(), vec![0, 1, 2]);
        for id in &ids {
            assert_eq!(
                h.recorder.history(id),
                vec![JobState::Running, JobState::Done]
            );
        }
        let first = h.recorder.latest(&ids[0]).unwrap().response.unwrap();
        assert_eq!(first["response"], json!({"index": 0}));
        assert_eq!(first["queue_id"], h.queue.id());
        assert!(first["run_time"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_worker_survives_failing_and_panicking_jobs() {
        let h = harness();

        let failing: WorkFn = Box::new(|| Box::pin(async { Err(anyhow::anyhow!("decoder crashed")) }));
        let panicking: WorkFn = Box::new(|| {
            Box::pin(async {
                if true {
                    panic!("index out of range");
                }
                Ok(WorkOutcome::success("unreachable"))
            })
        });
        let healthy: WorkFn = Box::new(|| Box::pin(async { Ok(WorkOutcome::success("ok")) }));

        let mut ids = Vec::new();
        for work in [failing, panicking, healthy] {
            let request = JobRequest::new(
                "/v1/media/metadata",
                json!({"webhook_url": "https://example.com/hook"}),
            );
            ids.push(request.job_id.clone());
            h.queue.try_enqueue(QueueEntry::new(request, work)).unwrap();
        }

        let handle = Arc::clone(&h.worker).spawn();
        wait_until_terminal(&h.recorder, &ids).await;
        h.worker.shutdown();
        handle.await.unwrap();

        let states: Vec<_> = ids
            .iter()
            .map(|id| h.recorder.latest(id).unwrap().job_status)
            .collect();
        assert_eq!(states, vec![JobState::Failed, JobState::Failed, JobState::Done]);

        let failed = h.recorder.latest(&ids[0]).unwrap().response.unwrap();
        assert_eq!(failed["code"], 500);
        assert_eq!(failed["message"], "decoder crashed");

        // Every executed job notifies, success or not
        assert_eq!(h.notifier.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_drops_waiting_jobs() {
        let h = harness();
        h.worker.shutdown();

        let work: WorkFn = Box::new(|| Box::pin(async { Ok(WorkOutcome::success("ok")) }));
        h.queue
            .try_enqueue(QueueEntry::new(JobRequest::new("/x", json!({})), work))
            .unwrap();

        h.worker.run().await;
        assert!(h.queue.is_empty());
    }
}
