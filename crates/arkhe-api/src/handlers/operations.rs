//! Dispatching handler shared by every operation route.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{OriginalUri, State};
use axum::routing::{post, MethodRouter};
use serde_json::{Map, Value};

use arkhe_models::JobRequest;
use arkhe_queue::WorkFn;

use crate::dispatcher::DispatchResponse;
use crate::error::{ApiError, ApiResult};
use crate::operations::Operation;
use crate::state::AppState;

/// Route serving one operation through the dispatcher.
pub fn operation_route(operation: Arc<dyn Operation>) -> MethodRouter<AppState> {
    let allow_get = operation.allow_get();
    let handler = move |State(state): State<AppState>, OriginalUri(uri): OriginalUri, body: Bytes| {
        let operation = Arc::clone(&operation);
        async move { run_operation(state, operation, uri.path().to_string(), body).await }
    };

    let route = post(handler.clone());
    if allow_get {
        route.get(handler)
    } else {
        route
    }
}

/// Parse the body, wrap the operation as deferred work and dispatch it.
pub async fn run_operation(
    state: AppState,
    operation: Arc<dyn Operation>,
    path: String,
    body: Bytes,
) -> ApiResult<DispatchResponse> {
    let payload = parse_payload(&body)?;
    let request = JobRequest::new(path, payload);

    let job_id = request.job_id.clone();
    let work_payload = request.payload.clone();
    let bypass = operation.bypass_queue();
    let work: WorkFn = Box::new(move || {
        Box::pin(async move { operation.run(job_id, work_payload).await })
    });

    Ok(state.dispatcher.dispatch(request, bypass, work).await)
}

/// An empty body is an empty object; anything else must be a JSON object.
fn parse_payload(body: &[u8]) -> ApiResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(ApiError::bad_request("Request body must be a JSON object")),
        Err(e) => Err(ApiError::bad_request(format!("Invalid JSON body: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_payload() {
        assert_eq!(parse_payload(b"").unwrap(), json!({}));
        assert_eq!(parse_payload(b"  \n").unwrap(), json!({}));
        assert_eq!(parse_payload(br#"{"id": 1}"#).unwrap(), json!({"id": 1}));
        assert!(parse_payload(b"[1, 2]").is_err());
        assert!(parse_payload(b"{not json").is_err());
    }
}
