//! Operation descriptors
//!
//! An [`OperationDescriptor`] is the gateway's record of one backend tool:
//! its globally unique name, the backend that owns it, and the metadata used
//! for relevance scoring. Optional fields are explicit here and checked once
//! by [`OperationDescriptor::validate`] at registration time, so read sites
//! never have to second-guess them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum operation name length (matches the MCP tool name limit).
pub const MAX_NAME_LEN: usize = 128;

/// Descriptor validation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    /// Name is empty
    #[error("operation name is empty")]
    EmptyName,

    /// Name is longer than [`MAX_NAME_LEN`]
    #[error("operation name '{0}' exceeds {MAX_NAME_LEN} characters")]
    NameTooLong(String),

    /// Name contains characters outside `[A-Za-z0-9_.-]`
    #[error("operation name '{0}' contains invalid characters")]
    InvalidName(String),

    /// Owning backend id is empty
    #[error("operation '{0}' has no owning backend")]
    MissingBackend(String),
}

/// A named, schema-described operation owned by one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    /// Operation name, unique across the whole catalog
    pub name: String,
    /// Id of the backend that owns and executes this operation
    pub backend_id: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Input JSON Schema (opaque to the gateway)
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
    /// Optional grouping category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Search keywords
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl OperationDescriptor {
    /// Create a descriptor with an empty object schema and no keywords
    #[must_use]
    pub fn new(name: impl Into<String>, backend_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend_id: backend_id.into(),
            description: String::new(),
            input_schema: serde_json::json!({ "type": "object" }),
            category: None,
            keywords: Vec::new(),
        }
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the input schema
    #[must_use]
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Set the category
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Set the search keywords
    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Check the descriptor's invariants
    ///
    /// # Errors
    ///
    /// Returns a [`DescriptorError`] when the name is empty, too long or
    /// contains characters outside `[A-Za-z0-9_.-]`, or when the backend id
    /// is empty.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.name.is_empty() {
            return Err(DescriptorError::EmptyName);
        }
        if self.name.chars().count() > MAX_NAME_LEN {
            return Err(DescriptorError::NameTooLong(self.name.clone()));
        }
        if !self.name.chars().all(is_name_char) {
            return Err(DescriptorError::InvalidName(self.name.clone()));
        }
        if self.backend_id.trim().is_empty() {
            return Err(DescriptorError::MissingBackend(self.name.clone()));
        }
        Ok(())
    }
}

impl AsRef<OperationDescriptor> for OperationDescriptor {
    fn as_ref(&self) -> &OperationDescriptor {
        self
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

/// Parse keywords from a `[keywords: a, b, c]` suffix in a description.
///
/// Returns an empty vector when no such section exists. Tags are trimmed
/// and lowercased; empty tags are dropped.
#[must_use]
pub fn parse_keyword_tags(description: &str) -> Vec<String> {
    let lower = description.to_lowercase();
    let Some(start) = lower.find("[keywords:") else {
        return Vec::new();
    };
    let after = &lower[start + "[keywords:".len()..];
    let section = after.find(']').map_or(after, |end| &after[..end]);
    section
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}
