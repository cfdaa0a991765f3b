//! Tool schemas and tool-call payloads.

use serde::{Deserialize, Serialize};

/// A tool declaration offered to the model.
///
/// The registry hands out fresh copies whose `name` is the composite
/// `<server>__<tool>` routing key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON-Schema object describing the arguments.
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub id: String,
    /// Composite tool name, `<server>__<tool>`.
    pub tool_name: String,
    /// Arguments, always re-serialized to a JSON string.
    pub arguments_json: String,
}

impl ToolCallRequest {
    pub fn new(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments_json: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments_json: arguments_json.into(),
        }
    }

    /// Parse the argument payload into a JSON object.
    ///
    /// Anything other than a JSON object (including malformed JSON) yields an
    /// empty argument set.
    pub fn arguments(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::from_str::<serde_json::Value>(&self.arguments_json) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

/// Outcome of a tool-enabled chat round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatReply {
    /// Assistant text; advisory only when `tool_calls` is non-empty.
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ChatReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(text: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self { text, tool_calls }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Serialize a vendor argument value into the canonical JSON string form.
pub(crate) fn arguments_to_json_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(raw) => raw.clone(),
        serde_json::Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}
