//! Stdio backends driven by a scripted shell process
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use mcp_toolhub::Error;
use mcp_toolhub::backend::ConnectionState;
use mcp_toolhub::config::{BackendConfig, Config};
use mcp_toolhub::gateway::Gateway;
use mcp_toolhub::transport::{BackendReply, StdioConnector};
use pretty_assertions::assert_eq;
use serde_json::json;

/// Answers initialize (1), skips the initialized notification, then answers
/// tools/list (2) and one tools/call (3). Request ids are deterministic.
const FAKE_SERVER: &str = r#"
read -r _
printf '%s\n' 'fake server booting'
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake","version":"0.1.0"}}}'
read -r _
read -r _
printf '%s\n' '{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}'
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo_text","description":"Echo text back","inputSchema":{"type":"object"},"_meta":{"category":"util","keywords":["echo","repeat"]}},{"name":"shout","description":"Upper-case text"}]}}'
read -r _
printf '%s\n' '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"hello"}],"isError":false}}'
read -r _
"#;

/// Same handshake as the fake server, but exits right after tools/list
const SHORT_LIVED_SERVER: &str = r#"
read -r _
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake","version":"0.1.0"}}}'
read -r _
read -r _
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo_text","description":"Echo text back"}]}}'
sleep 0.2
exit 0
"#;

fn fake_backend(script: &str) -> BackendConfig {
    let mut config = BackendConfig::stdio("sh", &["-c", script]);
    config.timeout = Duration::from_secs(5);
    config.startup_timeout = Duration::from_secs(5);
    config
}

#[tokio::test]
async fn connect_list_and_invoke_over_stdio() {
    let gateway = Gateway::new(Config::default(), Arc::new(StdioConnector));

    let count = gateway.connect("fake", fake_backend(FAKE_SERVER)).await.unwrap();
    assert_eq!(count, 2);
    assert_eq!(gateway.backend_state("fake"), Some(ConnectionState::Connected));

    let echo = gateway.catalog().resolve("echo_text").unwrap();
    assert_eq!(echo.backend_id, "fake");
    assert_eq!(echo.category.as_deref(), Some("util"));

    let exposure = gateway.list_operations(Some("repeat"), None);
    assert_eq!(exposure.tier.matched.len(), 1);
    assert_eq!(exposure.tier.matched[0].item.name, "echo_text");

    let reply = gateway
        .invoke("echo_text", json!({"text": "hello"}), None)
        .await
        .unwrap();
    assert_eq!(
        reply,
        BackendReply::Success(json!({
            "content": [{"type": "text", "text": "hello"}],
            "isError": false
        }))
    );
    assert_eq!(gateway.catalog().usage_count("echo_text"), 1);

    let report = gateway.shutdown().await;
    assert!(report.is_clean(), "{report:?}");
    assert!(gateway.catalog().is_empty());
}

#[tokio::test]
async fn process_that_exits_early_fails_the_connect() {
    let gateway = Gateway::new(Config::default(), Arc::new(StdioConnector));

    let err = gateway
        .connect("quitter", fake_backend("exit 0"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ConnectionFailed { .. }), "{err}");
    assert_eq!(gateway.backend_state("quitter"), Some(ConnectionState::Failed));
    assert!(gateway.catalog().is_empty());
}

#[tokio::test]
async fn missing_program_fails_the_connect() {
    let gateway = Gateway::new(Config::default(), Arc::new(StdioConnector));
    let config = BackendConfig::stdio("/nonexistent/mcp-server-binary", &[]);

    let err = gateway.connect("ghost", config).await.unwrap_err();

    assert!(matches!(err, Error::ConnectionFailed { .. }), "{err}");
    assert!(err.to_string().contains("ghost"));
}

#[tokio::test]
async fn process_exit_after_connect_removes_its_operations() {
    let gateway = Gateway::new(Config::default(), Arc::new(StdioConnector));

    let count = gateway
        .connect("brief", fake_backend(SHORT_LIVED_SERVER))
        .await
        .unwrap();
    assert_eq!(count, 1);

    tokio::time::timeout(Duration::from_secs(5), async {
        while gateway.backend_state("brief") != Some(ConnectionState::Disconnected) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(gateway.catalog().is_empty());
    assert_eq!(gateway.list_operations(None, None).tier.total_available, 0);
    let err = gateway
        .invoke("echo_text", json!({"text": "hi"}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OperationNotFound(_)), "{err}");
    assert_eq!(gateway.catalog().usage_count("echo_text"), 0);

    let status = gateway.statuses().pop().unwrap();
    assert!(status.last_error.is_some());
}
