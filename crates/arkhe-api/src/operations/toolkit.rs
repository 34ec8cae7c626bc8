//! Toolkit smoke-test operation.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use arkhe_models::{JobId, WorkOutcome};

use super::Operation;

/// Confirms the service is installed and dispatching.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolkitTest;

#[async_trait]
impl Operation for ToolkitTest {
    fn endpoint(&self) -> &'static str {
        "/v1/toolkit/test"
    }

    fn bypass_queue(&self) -> bool {
        true
    }

    fn allow_get(&self) -> bool {
        true
    }

    async fn run(&self, job_id: JobId, _payload: Value) -> anyhow::Result<WorkOutcome> {
        info!(job_id = %job_id, "Testing API setup");
        Ok(WorkOutcome::success(
            "You have successfully installed the Arkhe API, great job!",
        ))
    }
}
