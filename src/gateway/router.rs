//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, info};

use super::handler::RequestHandler;
use super::hub::Gateway;
use crate::backend::ConnectionState;
use crate::error::rpc_codes;
use crate::protocol::{JsonRpcResponse, RequestId};

/// Header carrying the caller session id
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Shared application state
pub struct AppState {
    /// The hub
    pub gateway: Arc<Gateway>,
    /// Method dispatch
    pub handler: RequestHandler,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl AppState {
    /// State over `gateway`
    pub fn new(gateway: Arc<Gateway>) -> Self {
        let max_body_size = gateway.config().server.max_body_size;
        Self {
            handler: RequestHandler::new(Arc::clone(&gateway)),
            gateway,
            max_body_size,
        }
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/mcp", post(mcp_handler).delete(mcp_delete_handler))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let statuses = state.gateway.statuses();
    let healthy = statuses.iter().all(|s| s.state != ConnectionState::Failed);

    let response = json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "backends": statuses,
        "operations": state.gateway.catalog().len(),
        "sessions": state.gateway.sessions().len(),
    });

    if healthy {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// DELETE /mcp handler - Session termination
async fn mcp_delete_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let session_id = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok());

    match session_id {
        Some(id) if state.gateway.sessions().delete(id) => {
            info!(session_id = %id, "Session terminated by client");
            StatusCode::NO_CONTENT
        }
        Some(id) => {
            debug!(session_id = %id, "Session not found for DELETE");
            StatusCode::NOT_FOUND
        }
        None => StatusCode::BAD_REQUEST,
    }
}

/// POST /mcp handler
async fn mcp_handler(
    State(state): State<Arc<AppState>>,
    http_request: Request<Body>,
) -> Response {
    let existing_session_id = http_request
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let body_bytes = match axum::body::to_bytes(http_request.into_body(), state.max_body_size).await
    {
        Ok(bytes) => bytes,
        Err(e) => {
            return parse_error_response(format!("Failed to read body: {e}"));
        }
    };
    let request: Value = match serde_json::from_slice(&body_bytes) {
        Ok(v) => v,
        Err(e) => return parse_error_response(format!("Invalid JSON: {e}")),
    };

    let session_id = state
        .gateway
        .sessions()
        .create(existing_session_id.as_deref())
        .id;

    let (id, method, params) = match parse_request(&request) {
        Ok(parsed) => parsed,
        Err(response) => return build_response(&response, &session_id, StatusCode::BAD_REQUEST),
    };

    // Notifications get 202 Accepted with an empty body
    let Some(id) = id else {
        debug!(notification = %method, "Handling notification");
        return with_session_header(
            (StatusCode::ACCEPTED, Json(json!({}))).into_response(),
            &session_id,
        );
    };

    let response = state
        .handler
        .handle(id, &method, params.as_ref(), &session_id)
        .await;
    build_response(&response, &session_id, StatusCode::OK)
}

fn parse_error_response(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(JsonRpcResponse::error(None, rpc_codes::PARSE_ERROR, message)),
    )
        .into_response()
}

/// Attach the session header, skipping ids that are not valid header values
fn with_session_header(mut resp: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        resp.headers_mut()
            .insert(HeaderName::from_static(SESSION_HEADER), value);
    }
    resp
}

/// Build an HTTP response with a `mcp-session-id` header and a given status.
fn build_response(rpc: &JsonRpcResponse, session_id: &str, status: StatusCode) -> Response {
    with_session_header((status, Json(rpc)).into_response(), session_id)
}

/// Extract a `RequestId` from a JSON value.
///
/// Supports string and integer ID values per JSON-RPC 2.0.
/// Returns `None` if the value is not a recognised ID type.
fn extract_request_id(value: &Value) -> Option<RequestId> {
    match value {
        Value::String(s) => Some(RequestId::String(s.clone())),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .map(RequestId::Number),
        _ => None,
    }
}

/// Check whether a method name represents a notification (no response expected).
fn is_notification_method(method: &str) -> bool {
    method.starts_with("notifications/")
}

/// Parse JSON-RPC request or notification
/// Returns (Option<RequestId>, method, params) - id is None for notifications
#[allow(clippy::result_large_err)] // JsonRpcResponse used directly as HTTP error body
fn parse_request(
    value: &Value,
) -> Result<(Option<RequestId>, String, Option<Value>), JsonRpcResponse> {
    let jsonrpc = value.get("jsonrpc").and_then(Value::as_str);
    if jsonrpc != Some("2.0") {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Invalid JSON-RPC version",
        ));
    }

    let id = value.get("id").and_then(extract_request_id);

    let method = value
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            JsonRpcResponse::error(id.clone(), rpc_codes::INVALID_REQUEST, "Missing method")
        })?;

    let params = value.get("params").cloned();

    if is_notification_method(method) {
        return Ok((None, method.to_string(), params));
    }
    if id.is_none() {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Missing id",
        ));
    }

    Ok((id, method.to_string(), params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn extract_request_id_variants() {
        assert_eq!(
            extract_request_id(&json!("abc-123")),
            Some(RequestId::String("abc-123".into()))
        );
        assert_eq!(extract_request_id(&json!(42)), Some(RequestId::Number(42)));
        assert_eq!(extract_request_id(&json!(u64::MAX)), None);
        assert_eq!(extract_request_id(&json!(1.5)), None);
        assert_eq!(extract_request_id(&json!(null)), None);
    }

    #[test]
    fn parse_request_accepts_valid_request() {
        let (id, method, params) = parse_request(&json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {"query": "x"}
        }))
        .unwrap();
        assert_eq!(id, Some(RequestId::Number(1)));
        assert_eq!(method, "tools/list");
        assert_eq!(params.unwrap()["query"], "x");
    }

    #[test]
    fn parse_request_rejects_wrong_version() {
        let err = parse_request(&json!({"jsonrpc": "1.0", "id": 1, "method": "ping"})).unwrap_err();
        assert_eq!(err.error.unwrap().code, rpc_codes::INVALID_REQUEST);
    }

    #[test]
    fn parse_request_requires_id_for_requests() {
        assert!(parse_request(&json!({"jsonrpc": "2.0", "method": "ping"})).is_err());
    }

    #[test]
    fn notifications_have_no_id() {
        let (id, method, _) = parse_request(&json!({
            "jsonrpc": "2.0", "method": "notifications/initialized"
        }))
        .unwrap();
        assert!(id.is_none());
        assert_eq!(method, "notifications/initialized");
    }

    #[test]
    fn invalid_session_ids_are_not_sent_as_headers() {
        let resp = with_session_header(StatusCode::OK.into_response(), "bad\nid");
        assert!(resp.headers().get(SESSION_HEADER).is_none());
        let resp = with_session_header(StatusCode::OK.into_response(), "s-1-abc");
        assert_eq!(resp.headers()[SESSION_HEADER], "s-1-abc");
    }
}
