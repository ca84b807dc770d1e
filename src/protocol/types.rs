//! MCP protocol type definitions used at both boundaries

use gateway_core::{OperationDescriptor, parse_keyword_tags};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool definition as reported by a backend and shown to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name (1-128 chars, [a-zA-Z0-9_.-])
    pub name: String,
    /// Tool description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input JSON Schema
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
    /// Free-form metadata (`category`, `keywords` are read from here)
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl Tool {
    /// Convert a backend-reported tool into a catalog descriptor owned by
    /// `backend_id`.
    ///
    /// Keywords come from `_meta.keywords` (array of strings) merged with any
    /// `[keywords: ...]` suffix in the description; `_meta.category` becomes
    /// the category.
    #[must_use]
    pub fn into_descriptor(self, backend_id: &str) -> OperationDescriptor {
        let description = self.description.unwrap_or_default();
        let meta = self.meta.as_ref();

        let category = meta
            .and_then(|m| m.get("category"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut keywords: Vec<String> = meta
            .and_then(|m| m.get("keywords"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        for tag in parse_keyword_tags(&description) {
            if !keywords.iter().any(|k| k.eq_ignore_ascii_case(&tag)) {
                keywords.push(tag);
            }
        }

        OperationDescriptor {
            name: self.name,
            backend_id: backend_id.to_string(),
            description,
            input_schema: self.input_schema,
            category,
            keywords,
        }
    }

    /// Caller-facing view of a descriptor. The owning backend is not exposed.
    #[must_use]
    pub fn from_descriptor(descriptor: &OperationDescriptor) -> Self {
        let mut meta = serde_json::Map::new();
        if let Some(ref category) = descriptor.category {
            meta.insert("category".to_string(), Value::String(category.clone()));
        }
        if !descriptor.keywords.is_empty() {
            meta.insert(
                "keywords".to_string(),
                Value::from(descriptor.keywords.clone()),
            );
        }

        Self {
            name: descriptor.name.clone(),
            description: (!descriptor.description.is_empty())
                .then(|| descriptor.description.clone()),
            input_schema: descriptor.input_schema.clone(),
            meta: (!meta.is_empty()).then_some(Value::Object(meta)),
        }
    }
}

/// Client/Server info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    /// Name
    pub name: String,
    /// Version
    pub version: String,
    /// Title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Server capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tools capability
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

/// Tools capability
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsCapability {
    /// List changed notification support
    #[serde(rename = "listChanged", default)]
    pub list_changed: bool,
}
