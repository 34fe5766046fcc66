//! Context payloads exchanged between windows.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A structured payload broadcast on a channel.
///
/// A context carries a type tag (e.g. `fdc3.instrument`), an optional
/// display name and arbitrary additional fields. Contexts are built once
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(rename = "type")]
    context_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Context {
    /// Create a context with the given type tag and no other fields.
    #[must_use]
    pub fn new(context_type: impl Into<String>) -> Self {
        Self {
            context_type: context_type.into(),
            name: None,
            fields: Map::new(),
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a structured field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// The context type tag.
    #[must_use]
    pub fn context_type(&self) -> &str {
        &self.context_type
    }

    /// The display name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Look up an additional field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All additional fields.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}
