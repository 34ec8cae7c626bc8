//! Operations exposed as dispatchable routes.
//!
//! An operation is an opaque unit of media work. The dispatcher decides
//! where and when it runs; the operation only turns a payload into a
//! [`WorkOutcome`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use arkhe_models::{JobId, WorkOutcome};

pub mod metadata;
pub mod toolkit;

pub use metadata::MediaMetadata;
pub use toolkit::ToolkitTest;

#[async_trait]
pub trait Operation: Send + Sync + 'static {
    /// Route path, e.g. `/v1/media/metadata`.
    fn endpoint(&self) -> &'static str;

    /// Always run synchronously on the request task.
    fn bypass_queue(&self) -> bool {
        false
    }

    /// Also serve the route over GET.
    fn allow_get(&self) -> bool {
        false
    }

    /// Run the operation. Errors and panics become 500 envelopes.
    async fn run(&self, job_id: JobId, payload: Value) -> anyhow::Result<WorkOutcome>;
}

/// Built-in operations.
pub fn builtin() -> Vec<Arc<dyn Operation>> {
    vec![Arc::new(ToolkitTest), Arc::new(MediaMetadata::default())]
}
