//! Caller-facing HTTP surface

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use mcp_toolhub::config::{BackendConfig, Config};
use mcp_toolhub::gateway::{AppState, Gateway, SESSION_HEADER, create_router};
use mcp_toolhub::transport::{MemoryBackend, MemoryConnector};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

fn app() -> (Router, Arc<Gateway>) {
    let mut config = Config::default();
    config
        .backends
        .insert("code".into(), BackendConfig::stdio("unused", &[]));
    config.exposure.essential = vec!["read_file".into()];
    let connector = MemoryConnector::new()
        .with_backend(
            "code",
            MemoryBackend::new()
                .with_simple_tool("grep_code", "Search code with a regex")
                .with_simple_tool("read_file", "Read a file"),
        )
        .with_backend("broken", MemoryBackend::new().failing_connect("refused"));
    let gateway = Arc::new(Gateway::new(config, Arc::new(connector)));
    let router = create_router(Arc::new(AppState::new(Arc::clone(&gateway))));
    (router, gateway)
}

async fn post(router: &Router, session: Option<&str>, body: Value) -> (StatusCode, Option<String>, Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json");
    if let Some(session) = session {
        request = request.header(SESSION_HEADER, session);
    }
    let response = router
        .clone()
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let session = response
        .headers()
        .get(SESSION_HEADER)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, session, json)
}

#[tokio::test]
async fn health_reports_backends() {
    let (router, gateway) = app();
    gateway.connect_by_id("code").await.unwrap();

    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value =
        serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["operations"], 2);
    assert_eq!(body["backends"][0]["id"], "code");
    assert_eq!(body["backends"][0]["state"], "connected");
}

#[tokio::test]
async fn health_degrades_when_a_backend_failed() {
    let (router, gateway) = app();
    assert!(
        gateway
            .connect("broken", BackendConfig::stdio("unused", &[]))
            .await
            .is_err()
    );

    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn tools_list_assigns_session_and_exposes_tiers() {
    let (router, gateway) = app();
    gateway.connect_by_id("code").await.unwrap();

    let (status, session, body) = post(
        &router,
        None,
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {"query": "grep"}}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let session = session.expect("session header");
    assert!(gateway.sessions().contains(&session));
    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(names, vec!["read_file", "grep_code"]);
    assert_eq!(body["result"]["exposure"]["totalAvailable"], 2);

    // Same session comes back when supplied
    let (_, again, _) = post(
        &router,
        Some(&session),
        json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}),
    )
    .await;
    assert_eq!(again.as_deref(), Some(session.as_str()));
    assert_eq!(gateway.sessions().len(), 1);
}

#[tokio::test]
async fn connect_then_call_over_http() {
    let (router, _gateway) = app();

    let (_, session, body) = post(
        &router,
        None,
        json!({"jsonrpc": "2.0", "id": 1, "method": "gateway/connect", "params": {"backend": "code"}}),
    )
    .await;
    assert_eq!(body["result"]["operations"], 2);

    let (_, _, body) = post(
        &router,
        session.as_deref(),
        json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": {"name": "grep_code", "arguments": {"pattern": "fn main"}}
        }),
    )
    .await;
    assert_eq!(body["id"], 2);
    assert_eq!(body["result"]["isError"], false);

    let (_, _, body) = post(
        &router,
        session.as_deref(),
        json!({"jsonrpc": "2.0", "id": 3, "method": "gateway/backends"}),
    )
    .await;
    assert_eq!(body["result"]["topUsed"][0]["name"], "grep_code");
    assert_eq!(body["result"]["topUsed"][0]["count"], 1);
}

#[tokio::test]
async fn notifications_are_accepted() {
    let (router, _) = app();
    let (status, _, _) = post(
        &router,
        None,
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn malformed_body_is_parse_error() {
    let (router, _) = app();
    let response = router
        .oneshot(
            Request::post("/mcp")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value =
        serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(body["error"]["code"], -32700);
}

#[tokio::test]
async fn delete_terminates_session() {
    let (router, gateway) = app();
    let session = gateway.sessions().create(None).id;

    let delete = |id: &str| {
        Request::delete("/mcp")
            .header(SESSION_HEADER, id)
            .body(Body::empty())
            .unwrap()
    };
    let response = router.clone().oneshot(delete(&session)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!gateway.sessions().contains(&session));

    let response = router.oneshot(delete(&session)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
