//! Cloud Run Jobs submission.
//!
//! Submit mode hands the original request to a Cloud Run Job execution,
//! which replays it through its own router (see [`crate::batch`]).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use arkhe_models::Payload;

use crate::config::CloudRunTarget;
use crate::token_cache::{AccessTokenSource, TokenCache};

/// Environment variable carrying the HTTP path in the job execution.
pub const JOB_PATH_ENV: &str = "GCP_JOB_PATH";
/// Environment variable carrying the JSON payload in the job execution.
pub const JOB_PAYLOAD_ENV: &str = "GCP_JOB_PAYLOAD";

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Cloud Run API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("job was not submitted: {0}")]
    NotSubmitted(String),
}

/// What to run in the job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudJobSpec {
    pub path: String,
    pub payload_json: String,
    pub task_count: u32,
}

impl CloudJobSpec {
    pub fn new(path: impl Into<String>, payload_json: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            payload_json: payload_json.into(),
            task_count: 1,
        }
    }

    /// Request body for `jobs/{job}:run`.
    pub fn run_request_body(&self) -> Value {
        json!({
            "overrides": {
                "containerOverrides": [{
                    "env": [
                        {"name": JOB_PATH_ENV, "value": self.path},
                        {"name": JOB_PAYLOAD_ENV, "value": self.payload_json},
                    ]
                }],
                "taskCount": self.task_count,
            }
        })
    }
}

/// Result of a submission, echoed to the caller as the envelope message.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerResponse {
    pub job_submitted: bool,
    pub operation_name: Option<String>,
    pub execution_name: Option<String>,
    pub job_name: String,
    pub location: String,
}

impl TriggerResponse {
    /// Last path segment of the execution name.
    pub fn execution_short_id(&self) -> Option<&str> {
        self.execution_name
            .as_deref()
            .and_then(|name| name.rsplit('/').next())
            .filter(|id| !id.is_empty())
    }

    pub fn to_payload(&self) -> Payload {
        Payload::map([
            ("job_submitted", Payload::Bool(self.job_submitted)),
            ("operation_name", Payload::from(self.operation_name.clone())),
            ("execution_name", Payload::from(self.execution_name.clone())),
            ("job_name", Payload::text(self.job_name.as_str())),
            ("location", Payload::text(self.location.as_str())),
        ])
    }
}

/// Hands a job to an external batch runner.
#[async_trait]
pub trait CloudJobTrigger: Send + Sync {
    async fn submit(&self, spec: CloudJobSpec) -> Result<TriggerResponse, TriggerError>;

    /// Job name and location, echoed in envelopes.
    fn target(&self) -> (&str, &str);
}

// ============================================================================
// Cloud Run Admin API v2
// ============================================================================

/// Long-running operation returned by `jobs.run`.
#[derive(Debug, Deserialize)]
struct RunOperation {
    name: Option<String>,
    #[serde(default)]
    metadata: Option<ExecutionMetadata>,
}

#[derive(Debug, Deserialize)]
struct ExecutionMetadata {
    name: Option<String>,
}

/// Cloud Run Jobs client.
pub struct CloudRunTrigger {
    http: reqwest::Client,
    target: CloudRunTarget,
    project_id: String,
    tokens: Arc<dyn AccessTokenSource>,
}

impl CloudRunTrigger {
    pub fn new(
        target: CloudRunTarget,
        project_id: impl Into<String>,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Result<Self, TriggerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("arkhe-api/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            target,
            project_id: project_id.into(),
            tokens,
        })
    }

    /// Create using Application Default Credentials.
    ///
    /// The project comes from the target, or from the credentials.
    pub async fn connect(target: CloudRunTarget) -> Result<Self, TriggerError> {
        let provider = gcp_auth::provider()
            .await
            .map_err(|e| TriggerError::Auth(format!("Failed to load credentials: {}", e)))?;

        let project_id = match &target.project_id {
            Some(project) => project.clone(),
            None => provider
                .project_id()
                .await
                .map_err(|e| TriggerError::Auth(format!("No project id available: {}", e)))?
                .to_string(),
        };

        Self::new(target, project_id, Arc::new(TokenCache::new(provider)))
    }

    fn run_url(&self) -> String {
        format!(
            "{}/v2/projects/{}/locations/{}/jobs/{}:run",
            self.target.api_base_url.trim_end_matches('/'),
            self.project_id,
            self.target.location,
            self.target.job_name
        )
    }
}

#[async_trait]
impl CloudJobTrigger for CloudRunTrigger {
    async fn submit(&self, spec: CloudJobSpec) -> Result<TriggerResponse, TriggerError> {
        let token = self.tokens.access_token().await?;
        let url = self.run_url();
        debug!(url = %url, path = %spec.path, "Submitting Cloud Run job");

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&spec.run_request_body())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TriggerError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let operation: RunOperation = response
            .json()
            .await
            .map_err(|e| TriggerError::InvalidResponse(e.to_string()))?;
        let operation_name = operation
            .name
            .ok_or_else(|| TriggerError::InvalidResponse("operation has no name".to_string()))?;

        let result = TriggerResponse {
            job_submitted: true,
            operation_name: Some(operation_name),
            execution_name: operation.metadata.and_then(|m| m.name),
            job_name: self.target.job_name.clone(),
            location: self.target.location.clone(),
        };
        info!(
            job_name = %result.job_name,
            execution = result.execution_name.as_deref().unwrap_or("unknown"),
            "Cloud Run job submitted"
        );
        Ok(result)
    }

    fn target(&self) -> (&str, &str) {
        (&self.target.job_name, &self.target.location)
    }
}
