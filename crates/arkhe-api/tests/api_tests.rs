//! Router-level tests for the dispatch API.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use arkhe_api::operations;
use arkhe_api::{create_router, ApiConfig, AppState, DispatchConfig, Dispatcher};
use arkhe_models::{JobId, JobState, JobStatusRecord};
use arkhe_queue::{LocalQueue, QueueConfig};
use arkhe_worker::{
    HttpWebhookNotifier, JobServices, MemoryStatusRecorder, QueueWorker, RecorderError, RecorderResult,
    StatusRecorder,
};

struct TestApp {
    router: Router,
    recorder: Arc<MemoryStatusRecorder>,
    worker: Arc<QueueWorker>,
}

/// A status store whose reads always fail.
struct UnreadableRecorder;

#[async_trait::async_trait]
impl StatusRecorder for UnreadableRecorder {
    async fn record(&self, _record: &JobStatusRecord) -> RecorderResult<()> {
        Ok(())
    }

    async fn fetch(&self, _job_id: &JobId) -> RecorderResult<Option<JobStatusRecord>> {
        Err(RecorderError::Io(std::io::Error::other("disk unavailable")))
    }
}

fn test_config(environment: &str) -> ApiConfig {
    ApiConfig {
        build_number: "test-build".to_string(),
        environment: environment.to_string(),
        ..ApiConfig::default()
    }
}

fn router_with(
    config: ApiConfig,
    recorder: Arc<dyn StatusRecorder>,
    max_queue_length: usize,
) -> (Router, Arc<QueueWorker>) {
    let notifier = Arc::new(HttpWebhookNotifier::new(Duration::from_secs(5)).unwrap());
    let services = JobServices::new(recorder.clone(), notifier, config.build_number.as_str());
    let queue = Arc::new(LocalQueue::new(QueueConfig { max_queue_length }));
    let worker = Arc::new(QueueWorker::new(queue.clone(), services.clone()));
    let dispatcher = Dispatcher::new(DispatchConfig::default(), queue, services, None);
    let state = AppState::from_parts(config, dispatcher, recorder, operations::builtin());
    (create_router(state, None), worker)
}

fn test_app(max_queue_length: usize) -> TestApp {
    let recorder = Arc::new(MemoryStatusRecorder::new());
    let (router, worker) = router_with(test_config("development"), recorder.clone(), max_queue_length);
    TestApp {
        router,
        recorder,
        worker,
    }
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health_reports_queue() {
    let app = test_app(3);
    let (status, body) = send(&app.router, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["build_number"], "test-build");
    assert_eq!(body["queue_length"], 0);
    assert_eq!(body["max_queue_length"], 3);
    assert!(body["queue_id"].as_str().unwrap().starts_with("queue-"));
}

#[tokio::test]
async fn test_toolkit_test_runs_synchronously() {
    let app = test_app(0);

    for method in [Method::GET, Method::POST] {
        let (status, body) = send(&app.router, method, "/v1/toolkit/test", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 200);
        assert_eq!(body["message"], "success");
        assert_eq!(body["endpoint"], "/v1/toolkit/test");
        assert!(body["response"].as_str().unwrap().contains("successfully installed"));
        assert_eq!(body["build_number"], "test-build");

        let job_id = JobId::from_string(body["job_id"].as_str().unwrap());
        assert_eq!(app.recorder.history(&job_id), vec![JobState::Running, JobState::Done]);
    }
}

#[tokio::test]
async fn test_toolkit_test_echoes_caller_id() {
    let app = test_app(0);
    let (status, body) = send(
        &app.router,
        Method::POST,
        "/v1/toolkit/test",
        Some(json!({"id": "client-42"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "client-42");
}

#[tokio::test]
async fn test_invalid_body_is_rejected() {
    let app = test_app(0);
    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/toolkit/test")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (status, _) = send(&app.router, Method::POST, "/v1/toolkit/test", Some(json!([1, 2]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metadata_without_webhook_runs_inline() {
    let app = test_app(1);
    let (status, body) = send(&app.router, Method::POST, "/v1/media/metadata", Some(json!({}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "media_url is required");
    assert!(body["response"].is_null());
    assert!(app.worker.queue().is_empty());
}

#[tokio::test]
async fn test_job_status_lookup() {
    let app = test_app(0);

    let (status, _) = send(
        &app.router,
        Method::POST,
        "/v1/toolkit/job/status",
        Some(json!({"job_id": "not a job id!"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app.router,
        Method::POST,
        "/v1/toolkit/job/status",
        Some(json!({"job_id": "missing-job-0001"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);

    let job_id = JobId::from_string("known-job-0001");
    tokio_test::assert_ok!(
        app.recorder
            .record(&JobStatusRecord::new(job_id.clone(), JobState::Queued, "queue-abc", 1))
            .await
    );

    let (status, body) = send(
        &app.router,
        Method::POST,
        "/v1/toolkit/job/status",
        Some(json!({"job_id": "known-job-0001"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_status"], "queued");
    assert_eq!(body["queue_id"], "queue-abc");

    let (status, body) = send(&app.router, Method::GET, "/v1/toolkit/jobs/known-job-0001", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_id"], "known-job-0001");
}

#[tokio::test]
async fn test_status_store_failure_detail_follows_environment() {
    let uri = "/v1/toolkit/jobs/known-job-0001";

    let (router, _) = router_with(test_config("production"), Arc::new(UnreadableRecorder), 0);
    let (status, body) = send(&router, Method::GET, uri, None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "An internal error occurred");

    let (router, _) = router_with(test_config("development"), Arc::new(UnreadableRecorder), 0);
    let (status, body) = send(&router, Method::GET, uri, None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["message"].as_str().unwrap().contains("disk unavailable"));
}

#[tokio::test]
async fn test_queued_job_completes_and_calls_webhook() {
    let hook = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&hook)
        .await;

    let app = test_app(0);
    let worker_handle = Arc::clone(&app.worker).spawn();

    let webhook_url = format!("{}/hook", hook.uri());
    let (status, body) = send(
        &app.router,
        Method::POST,
        "/v1/media/metadata",
        Some(json!({"id": 9, "webhook_url": webhook_url})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["message"], "processing");
    assert_eq!(body["max_queue_length"], "unlimited");
    assert_eq!(body["id"], 9);

    let job_id = JobId::from_string(body["job_id"].as_str().unwrap());
    let record = wait_for_terminal(&app.recorder, &job_id).await;
    assert_eq!(record.job_status, JobState::Failed);
    assert_eq!(
        app.recorder.history(&job_id),
        vec![JobState::Queued, JobState::Running, JobState::Failed]
    );

    // The webhook is sent after the terminal record is written
    let requests = wait_for_webhook(&hook).await;
    assert_eq!(requests.len(), 1);
    let delivered: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(delivered["code"], 400);
    assert_eq!(delivered["message"], "media_url is required");
    assert_eq!(delivered["job_id"], job_id.as_str());
    assert_eq!(Some(&delivered), record.response.as_ref());

    app.worker.shutdown();
    worker_handle.await.unwrap();
}

async fn wait_for_terminal(recorder: &MemoryStatusRecorder, job_id: &JobId) -> JobStatusRecord {
    for _ in 0..200 {
        if let Some(record) = recorder.latest(job_id).filter(|r| r.is_terminal()) {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never finished");
}

async fn wait_for_webhook(server: &MockServer) -> Vec<wiremock::Request> {
    for _ in 0..200 {
        let requests = server.received_requests().await.unwrap_or_default();
        if !requests.is_empty() {
            return requests;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("webhook was never delivered");
}
