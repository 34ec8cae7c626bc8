//! API configuration.
//!
//! Everything is read from the environment once at startup. Mode selection
//! works on the resolved [`DispatchConfig`], never on live environment state.

/// Default Cloud Run Admin API base URL.
pub const DEFAULT_CLOUD_RUN_API_URL: &str = "https://run.googleapis.com";

/// Queue id used by a batch-job execution when the runner gives no name.
pub const DEFAULT_EXECUTION_NAME: &str = "gcp_job";

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Build identifier echoed in every envelope
    pub build_number: String,
    /// Expose `/metrics`
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec!["*".to_string()],
            max_body_size: 10 * 1024 * 1024, // 10MB
            environment: "development".to_string(),
            build_number: env!("CARGO_PKG_VERSION").to_string(),
            metrics_enabled: true,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8080),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|_| vec!["*".to_string()]),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10 * 1024 * 1024),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            build_number: std::env::var("BUILD_NUMBER")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

// ============================================================================
// Dispatch configuration
// ============================================================================

/// How this process was started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerRole {
    /// Long-running HTTP service
    Service,
    /// One execution of an external batch job
    BatchJob { execution_name: String },
}

/// Cloud Run job that submit mode hands work to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudRunTarget {
    pub job_name: String,
    pub location: String,
    /// Project; taken from the credentials when unset
    pub project_id: Option<String>,
    pub api_base_url: String,
}

impl CloudRunTarget {
    /// Both `GCP_JOB_NAME` and `GCP_JOB_LOCATION` must be set.
    pub fn from_env() -> Option<Self> {
        let job_name = non_empty_var("GCP_JOB_NAME")?;
        let location = non_empty_var("GCP_JOB_LOCATION")?;
        Some(Self {
            job_name,
            location,
            project_id: non_empty_var("GCP_PROJECT_ID"),
            api_base_url: non_empty_var("CLOUD_RUN_API_URL")
                .unwrap_or_else(|| DEFAULT_CLOUD_RUN_API_URL.to_string()),
        })
    }
}

/// Per-request execution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run now; this process is itself a batch-job execution
    Inline,
    /// Hand off to the external batch runner
    Submit,
    /// Run now on the request task
    Bypass,
    /// Push onto the local queue
    Queue,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Inline => "inline",
            ExecutionMode::Submit => "submit",
            ExecutionMode::Bypass => "bypass",
            ExecutionMode::Queue => "queue",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Startup-resolved inputs to mode selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub role: RunnerRole,
    pub cloud_run: Option<CloudRunTarget>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            role: RunnerRole::Service,
            cloud_run: None,
        }
    }
}

impl DispatchConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let role = if non_empty_var("CLOUD_RUN_JOB").is_some() {
            RunnerRole::BatchJob {
                execution_name: non_empty_var("CLOUD_RUN_EXECUTION")
                    .unwrap_or_else(|| DEFAULT_EXECUTION_NAME.to_string()),
            }
        } else {
            RunnerRole::Service
        };

        Self {
            role,
            cloud_run: CloudRunTarget::from_env(),
        }
    }

    /// Pick the execution mode for one request.
    ///
    /// Checked in order: batch-job execution, cloud submission (needs a
    /// webhook to report back to), synchronous execution, local queue.
    pub fn select_mode(&self, bypass_requested: bool, has_webhook: bool) -> ExecutionMode {
        if matches!(self.role, RunnerRole::BatchJob { .. }) {
            ExecutionMode::Inline
        } else if self.cloud_run.is_some() && has_webhook {
            ExecutionMode::Submit
        } else if bypass_requested || !has_webhook {
            ExecutionMode::Bypass
        } else {
            ExecutionMode::Queue
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
