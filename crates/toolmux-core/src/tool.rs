//! Tool descriptors, definitions and remote call results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name and description of one remote tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    /// Never absent; servers that omit it yield an empty string.
    #[serde(default)]
    pub description: String,
}

impl ToolDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            name: name.into(),
            description: description.unwrap_or_default(),
        }
    }
}

/// Function definition advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the argument object.
    pub parameters: Value,
}

/// One content block returned by a remote tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    /// Any non-text block, kept as its raw fields.
    Other(Value),
}

impl ContentBlock {
    /// Classify a raw block by its `type` field.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let is_text = value.get("type").and_then(Value::as_str) == Some("text");
        match value.get("text").and_then(Value::as_str) {
            Some(text) if is_text => Self::Text(text.to_string()),
            _ => Self::Other(value),
        }
    }
}

/// Result of a remote tool call before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallOutput {
    /// Structured payload, preferred over `content` when present.
    pub structured: Option<Value>,
    pub content: Vec<ContentBlock>,
    /// Whether the server flagged the call as failed.
    pub is_error: bool,
}

impl ToolCallOutput {
    /// Output made of a single text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text(text.into())],
            ..Self::default()
        }
    }

    /// Collapse into one string for use as conversation content.
    ///
    /// A structured payload wins and is pretty-printed; otherwise text blocks
    /// are joined with newlines and other blocks are rendered from their
    /// fields.
    #[must_use]
    pub fn render(&self) -> String {
        if let Some(structured) = &self.structured {
            return pretty(structured);
        }
        self.content
            .iter()
            .map(|block| match block {
                ContentBlock::Text(text) => text.clone(),
                ContentBlock::Other(value) => pretty(value),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Pretty JSON, falling back to compact rendering.
#[must_use]
pub fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
