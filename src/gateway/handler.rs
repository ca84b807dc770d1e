//! JSON-RPC method dispatch for callers

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

use super::helpers::{
    build_initialize_result, build_tools_list_result, error_to_response, extract_client_version,
    extract_list_params, extract_required_str, extract_tools_call_params, reply_to_response,
};
use super::hub::Gateway;
use crate::error::rpc_codes;
use crate::protocol::{JsonRpcResponse, RequestId, negotiate_version};
use crate::{Error, Result};

/// Number of most-used operations reported by `gateway/backends`
const TOP_USED: usize = 10;

/// Dispatches caller requests to the gateway
#[derive(Clone)]
pub struct RequestHandler {
    gateway: Arc<Gateway>,
}

impl RequestHandler {
    /// Handler over `gateway`
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Handle one request within `session_id`
    pub async fn handle(
        &self,
        id: RequestId,
        method: &str,
        params: Option<&Value>,
        session_id: &str,
    ) -> JsonRpcResponse {
        debug!(method = %method, session_id = %session_id, "Caller request");
        let result = match method {
            "initialize" => Self::initialize(params),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list(params)),
            "tools/call" => match self.tools_call(params, session_id).await {
                Ok(reply) => return reply_to_response(id, reply),
                Err(e) => Err(e),
            },
            "gateway/connect" => self.connect(params).await,
            "gateway/disconnect" => self.disconnect(params).await,
            "gateway/backends" => Ok(self.backends()),
            "session/get" => self.session_get(session_id),
            "session/setMetadata" => self.session_set_metadata(params, session_id),
            _ => Err(Error::json_rpc(
                rpc_codes::METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            )),
        };

        match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => error_to_response(Some(id), &e),
        }
    }

    fn initialize(params: Option<&Value>) -> Result<Value> {
        let version = negotiate_version(extract_client_version(params));
        Ok(serde_json::to_value(build_initialize_result(version))?)
    }

    fn tools_list(&self, params: Option<&Value>) -> Value {
        let (query, limit) = extract_list_params(params);
        let exposure = self.gateway.list_operations(query, limit);
        build_tools_list_result(&exposure)
    }

    async fn tools_call(
        &self,
        params: Option<&Value>,
        session_id: &str,
    ) -> Result<crate::transport::BackendReply> {
        let (name, arguments) = extract_tools_call_params(params)?;
        self.gateway.invoke(name, arguments, Some(session_id)).await
    }

    async fn connect(&self, params: Option<&Value>) -> Result<Value> {
        let backend = extract_required_str(params, "backend")?;
        let operations = self.gateway.connect_by_id(backend).await?;
        Ok(json!({ "backend": backend, "operations": operations }))
    }

    async fn disconnect(&self, params: Option<&Value>) -> Result<Value> {
        let backend = extract_required_str(params, "backend")?;
        self.gateway.disconnect(backend).await?;
        Ok(json!({ "backend": backend, "state": "disconnected" }))
    }

    fn backends(&self) -> Value {
        json!({
            "backends": self.gateway.statuses(),
            "totalOperations": self.gateway.catalog().len(),
            "topUsed": self.gateway.catalog().top_used(TOP_USED),
        })
    }

    fn session_get(&self, session_id: &str) -> Result<Value> {
        let session = self.gateway.sessions().get(session_id)?;
        Ok(serde_json::to_value(session)?)
    }

    fn session_set_metadata(&self, params: Option<&Value>, session_id: &str) -> Result<Value> {
        let key = extract_required_str(params, "key")?;
        let value = params
            .and_then(|p| p.get("value"))
            .cloned()
            .unwrap_or(Value::Null);
        let previous = if value.is_null() {
            self.gateway.sessions().remove_metadata(session_id, key)?
        } else {
            self.gateway.sessions().set_metadata(session_id, key, value)?
        };
        Ok(json!({ "key": key, "previous": previous }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, Config};
    use crate::transport::{BackendReply, MemoryBackend, MemoryConnector};
    use pretty_assertions::assert_eq;

    async fn handler() -> (RequestHandler, String) {
        let mut config = Config::default();
        config
            .backends
            .insert("fs".to_string(), BackendConfig::stdio("unused", &[]));
        let connector = MemoryConnector::new().with_backend(
            "fs",
            MemoryBackend::new()
                .with_simple_tool("read_file", "Read a file")
                .with_handler("read_file", |args| {
                    BackendReply::Success(json!({ "echo": args }))
                }),
        );
        let gateway = Arc::new(Gateway::new(config, Arc::new(connector)));
        let session = gateway.sessions().create(None);
        (RequestHandler::new(gateway), session.id)
    }

    #[tokio::test]
    async fn initialize_negotiates_version() {
        let (h, sid) = handler().await;
        let params = json!({"protocolVersion": "2024-11-05"});
        let resp = h
            .handle(RequestId::Number(1), "initialize", Some(&params), &sid)
            .await;
        assert_eq!(resp.result.unwrap()["protocolVersion"], "2024-11-05");
    }

    #[tokio::test]
    async fn connect_list_call_roundtrip() {
        let (h, sid) = handler().await;
        let params = json!({"backend": "fs"});
        let resp = h
            .handle(RequestId::Number(1), "gateway/connect", Some(&params), &sid)
            .await;
        assert_eq!(resp.result.unwrap()["operations"], 1);

        let params = json!({"query": "read"});
        let resp = h
            .handle(RequestId::Number(2), "tools/list", Some(&params), &sid)
            .await;
        let result = resp.result.unwrap();
        assert_eq!(result["tools"][0]["name"], "read_file");
        assert_eq!(result["exposure"]["rationale"], "loaded 0 essential + 1 matched");

        let params = json!({"name": "read_file", "arguments": {"path": "/x"}});
        let resp = h
            .handle(RequestId::Number(3), "tools/call", Some(&params), &sid)
            .await;
        assert_eq!(resp.result.unwrap(), json!({"echo": {"path": "/x"}}));

        let resp = h.handle(RequestId::Number(4), "session/get", None, &sid).await;
        assert_eq!(resp.result.unwrap()["backends"], json!(["fs"]));
    }

    #[tokio::test]
    async fn unknown_operation_is_error_response() {
        let (h, sid) = handler().await;
        let params = json!({"name": "ghost"});
        let resp = h
            .handle(RequestId::Number(1), "tools/call", Some(&params), &sid)
            .await;
        assert_eq!(resp.error.unwrap().code, rpc_codes::OPERATION_NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let (h, sid) = handler().await;
        let resp = h.handle(RequestId::Number(1), "resources/list", None, &sid).await;
        assert_eq!(resp.error.unwrap().code, rpc_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn set_metadata_and_clear_with_null() {
        let (h, sid) = handler().await;
        let params = json!({"key": "project", "value": "toolhub"});
        h.handle(RequestId::Number(1), "session/setMetadata", Some(&params), &sid)
            .await;
        let params = json!({"key": "project", "value": null});
        let resp = h
            .handle(RequestId::Number(2), "session/setMetadata", Some(&params), &sid)
            .await;
        assert_eq!(resp.result.unwrap()["previous"], "toolhub");

        let resp = h.handle(RequestId::Number(3), "session/get", None, &sid).await;
        assert_eq!(resp.result.unwrap()["metadata"], json!({}));
    }

    #[tokio::test]
    async fn disconnect_requires_backend_param() {
        let (h, sid) = handler().await;
        let resp = h
            .handle(RequestId::Number(1), "gateway/disconnect", None, &sid)
            .await;
        assert_eq!(resp.error.unwrap().code, rpc_codes::INVALID_PARAMS);
    }
}
