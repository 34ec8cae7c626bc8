//! Webhook delivery of final envelopes.
//!
//! One POST per executed job, no retry. Failures are logged and counted,
//! never returned to the caller of [`WebhookNotifier::notify`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use crate::error::WebhookError;
use crate::metrics;

/// Default HTTP request timeout for a delivery.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivers an envelope to a caller-supplied URL.
#[async_trait]
pub trait WebhookNotifier: Send + Sync {
    /// Deliver `body`. Errors are handled internally.
    async fn notify(&self, url: &str, body: &Value);
}

// ---------------------------------------------------------------------------
// HttpWebhookNotifier
// ---------------------------------------------------------------------------

/// POSTs envelopes as JSON with a request timeout.
#[derive(Debug, Clone)]
pub struct HttpWebhookNotifier {
    client: reqwest::Client,
}

impl HttpWebhookNotifier {
    /// Create a notifier whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Create from environment variables (`WEBHOOK_TIMEOUT_SECS`).
    pub fn from_env() -> Result<Self, WebhookError> {
        let timeout = std::env::var("WEBHOOK_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        Self::new(timeout)
    }

    /// Execute a single POST request and check the response status.
    pub async fn try_send(&self, url: &str, body: &Value) -> Result<(), WebhookError> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(WebhookError::UnsupportedScheme(url.scheme().to_string()));
        }

        let response = self.client.post(url).json(body).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl WebhookNotifier for HttpWebhookNotifier {
    async fn notify(&self, url: &str, body: &Value) {
        let job_id = body.get("job_id").and_then(Value::as_str).unwrap_or_default();
        match self.try_send(url, body).await {
            Ok(()) => {
                metrics::record_webhook_delivered();
                info!(job_id, url, "Webhook delivered");
            }
            Err(e) => {
                let reason = match &e {
                    WebhookError::InvalidUrl(_) | WebhookError::UnsupportedScheme(_) => "invalid_url",
                    WebhookError::Request(_) => "request",
                    WebhookError::HttpStatus(_) => "status",
                };
                metrics::record_webhook_failed(reason);
                warn!(job_id, url, error = %e, "Webhook delivery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notifier() -> HttpWebhookNotifier {
        HttpWebhookNotifier::new(Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_posts_envelope_as_json() {
        let server = MockServer::start().await;
        let envelope = json!({"code": 200, "job_id": "job-1", "message": "success"});

        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .and(body_json(&envelope))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        notifier()
            .try_send(&format!("{}/hook", server.uri()), &envelope)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_non_2xx_is_an_error_and_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let err = notifier()
            .try_send(&format!("{}/hook", server.uri()), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::HttpStatus(503)));

        // notify swallows the same failure
        notifier().notify(&format!("{}/hook", server.uri()), &json!({})).await;
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let err = notifier().try_send("not a url", &json!({})).await.unwrap_err();
        assert!(matches!(err, WebhookError::InvalidUrl(_)));

        let err = notifier().try_send("ftp://example.com/x", &json!({})).await.unwrap_err();
        assert!(matches!(err, WebhookError::UnsupportedScheme(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_enforced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let notifier = HttpWebhookNotifier::new(Duration::from_millis(200)).unwrap();
        let err = notifier
            .try_send(&format!("{}/slow", server.uri()), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::Request(_)));
    }
}
