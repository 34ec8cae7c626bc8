//! Application state.

use std::sync::Arc;

use arkhe_queue::LocalQueue;
use arkhe_worker::{HttpWebhookNotifier, JobServices, QueueWorker, StatusRecorder};

use crate::cloud::{CloudJobTrigger, CloudRunTrigger};
use crate::config::{ApiConfig, DispatchConfig};
use crate::dispatcher::Dispatcher;
use crate::operations::{self, Operation};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub dispatcher: Dispatcher,
    pub recorder: Arc<dyn StatusRecorder>,
    pub operations: Vec<Arc<dyn Operation>>,
}

impl AppState {
    /// Create new application state from environment configuration.
    ///
    /// Returns the state and the worker that must be spawned to consume
    /// the local queue.
    pub async fn new(
        config: ApiConfig,
        dispatch: DispatchConfig,
        recorder: Arc<dyn StatusRecorder>,
    ) -> anyhow::Result<(Self, Arc<QueueWorker>)> {
        let notifier = Arc::new(HttpWebhookNotifier::from_env()?);
        let services = JobServices::new(Arc::clone(&recorder), notifier, config.build_number.as_str());

        let trigger: Option<Arc<dyn CloudJobTrigger>> = match &dispatch.cloud_run {
            Some(target) => Some(Arc::new(CloudRunTrigger::connect(target.clone()).await?)),
            None => None,
        };

        let queue = Arc::new(LocalQueue::from_env());
        let worker = Arc::new(QueueWorker::new(Arc::clone(&queue), services.clone()));
        let dispatcher = Dispatcher::new(dispatch, queue, services, trigger);

        Ok((
            Self::from_parts(config, dispatcher, recorder, operations::builtin()),
            worker,
        ))
    }

    /// Assemble state from already-built parts.
    pub fn from_parts(
        config: ApiConfig,
        dispatcher: Dispatcher,
        recorder: Arc<dyn StatusRecorder>,
        operations: Vec<Arc<dyn Operation>>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            recorder,
            operations,
        }
    }
}
