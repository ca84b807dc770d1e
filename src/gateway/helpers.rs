//! Pure helper functions for the caller-facing JSON-RPC surface.
//!
//! These are stateless functions with no async or backend dependencies.

use serde_json::{Value, json};

use crate::exposure::Exposure;
use crate::protocol::{
    Info, InitializeResult, JsonRpcError, JsonRpcResponse, RequestId, ServerCapabilities, Tool,
    ToolsCapability,
};
use crate::transport::BackendReply;
use crate::error::rpc_codes;
use crate::{Error, Result};

/// Extract the client protocol version from initialize params.
///
/// Returns `"2024-11-05"` when params are `None` or missing `protocolVersion`.
pub(crate) fn extract_client_version(params: Option<&Value>) -> &str {
    params
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str)
        .unwrap_or("2024-11-05")
}

/// Build the `InitializeResult` for a given negotiated protocol version.
pub(crate) fn build_initialize_result(negotiated_version: &str) -> InitializeResult {
    InitializeResult {
        protocol_version: negotiated_version.to_string(),
        capabilities: ServerCapabilities {
            tools: Some(ToolsCapability { list_changed: true }),
        },
        server_info: Info {
            name: "mcp-toolhub".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("MCP Tool Hub".to_string()),
        },
        instructions: Some(
            "tools/list shows a small essential set. Pass params.query (free text) \
             and optionally params.limit to tools/list to surface more matching tools."
                .to_string(),
        ),
    }
}

/// Extract the optional `query` and `limit` from `tools/list` params.
///
/// A non-numeric or negative limit is treated as absent.
pub(crate) fn extract_list_params(params: Option<&Value>) -> (Option<&str>, Option<usize>) {
    let query = params
        .and_then(|p| p.get("query"))
        .and_then(Value::as_str);
    let limit = params
        .and_then(|p| p.get("limit"))
        .and_then(Value::as_u64)
        .and_then(|l| usize::try_from(l).ok());
    (query, limit)
}

/// Extract a required string parameter.
pub(crate) fn extract_required_str<'a>(params: Option<&'a Value>, key: &str) -> Result<&'a str> {
    params
        .and_then(|p| p.get(key))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            Error::json_rpc(
                rpc_codes::INVALID_PARAMS,
                format!("Missing '{key}' parameter"),
            )
        })
}

/// Extract `name` and `arguments` from `tools/call` params.
///
/// Missing arguments default to an empty object.
pub(crate) fn extract_tools_call_params(params: Option<&Value>) -> Result<(&str, Value)> {
    let name = extract_required_str(params, "name")?;
    let arguments = params
        .and_then(|p| p.get("arguments"))
        .cloned()
        .unwrap_or_else(|| json!({}));
    Ok((name, arguments))
}

/// `tools/list` result: MCP tools plus the exposure summary.
pub(crate) fn build_tools_list_result(exposure: &Exposure) -> Value {
    let tools: Vec<Tool> = exposure
        .tier
        .operations()
        .map(|d| Tool::from_descriptor(d))
        .collect();
    json!({
        "tools": tools,
        "exposure": exposure.tier.summary(&exposure.rationale),
    })
}

/// Pass a backend reply through untouched.
pub(crate) fn reply_to_response(id: RequestId, reply: BackendReply) -> JsonRpcResponse {
    match reply {
        BackendReply::Success(result) => JsonRpcResponse::success(id, result),
        BackendReply::Error(error) => JsonRpcResponse::from_error(Some(id), error),
    }
}

/// Map a gateway error onto a JSON-RPC error response.
pub(crate) fn error_to_response(id: Option<RequestId>, error: &Error) -> JsonRpcResponse {
    let (message, data) = match error {
        Error::JsonRpc { message, data, .. } => (message.clone(), data.clone()),
        other => (other.to_string(), None),
    };
    JsonRpcResponse::from_error(
        id,
        JsonRpcError {
            code: error.to_rpc_code(),
            message,
            data,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::exposure::ExposureStrategy;
    use gateway_core::OperationDescriptor;
    use pretty_assertions::assert_eq;

    #[test]
    fn client_version_defaults() {
        assert_eq!(extract_client_version(None), "2024-11-05");
        let p = json!({"protocolVersion": "2025-03-26"});
        assert_eq!(extract_client_version(Some(&p)), "2025-03-26");
    }

    #[test]
    fn list_params_are_optional() {
        assert_eq!(extract_list_params(None), (None, None));
        let p = json!({"query": "grep", "limit": 3});
        assert_eq!(extract_list_params(Some(&p)), (Some("grep"), Some(3)));
        let bad = json!({"limit": -1});
        assert_eq!(extract_list_params(Some(&bad)), (None, None));
    }

    #[test]
    fn missing_required_param_is_invalid_params() {
        let err = extract_required_str(Some(&json!({})), "backend").unwrap_err();
        assert_eq!(err.to_rpc_code(), rpc_codes::INVALID_PARAMS);
        assert!(err.to_string().contains("'backend'"));
    }

    #[test]
    fn tools_call_params_default_arguments() {
        let p = json!({"name": "read_file"});
        let (name, args) = extract_tools_call_params(Some(&p)).unwrap();
        assert_eq!(name, "read_file");
        assert_eq!(args, json!({}));
    }

    #[test]
    fn tools_list_result_has_tools_and_exposure() {
        let catalog = Catalog::new();
        catalog
            .register(OperationDescriptor::new("read_file", "fs"))
            .unwrap();
        catalog
            .register(OperationDescriptor::new("grep_code", "code"))
            .unwrap();
        let exposure = ExposureStrategy::default().expose(
            &catalog,
            Some("grep"),
            &["read_file".to_string()],
            10,
        );

        let result = build_tools_list_result(&exposure);
        let names: Vec<&str> = result["tools"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert_eq!(names, vec!["read_file", "grep_code"]);
        assert_eq!(result["exposure"]["totalAvailable"], 2);
        assert_eq!(result["exposure"]["essential"], json!(["read_file"]));
    }

    #[test]
    fn backend_error_passes_through_verbatim() {
        let error = JsonRpcError {
            code: -32050,
            message: "quota exceeded".into(),
            data: Some(json!({"retryAfter": 30})),
        };
        let resp = reply_to_response(RequestId::Number(7), BackendReply::Error(error.clone()));
        assert_eq!(resp.error, Some(error));
        assert!(resp.result.is_none());
    }

    #[test]
    fn gateway_error_uses_rpc_code() {
        let resp = error_to_response(
            Some(RequestId::Number(1)),
            &Error::OperationNotFound("ghost".into()),
        );
        let err = resp.error.unwrap();
        assert_eq!(err.code, rpc_codes::OPERATION_NOT_FOUND);
        assert!(err.message.contains("ghost"));
    }
}
