//! Response Types
//!
//! Snapshots of responses and output items as they appear inside stream events
//! and non-streaming bodies.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A response snapshot (`response` field of lifecycle events, or a whole body)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    /// Response ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Object type (usually "response")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,

    /// Model name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Creation timestamp (unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,

    /// "queued", "in_progress", "completed", "incomplete", "failed", ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Output items produced so far
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub output: Vec<OutputItem>,

    /// Token usage (usually only on the final snapshot)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Error details when status is "failed"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,

    /// Why the response stopped early when status is "incomplete"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incomplete_details: Option<Value>,

    /// Remaining fields we don't model
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResponseSnapshot {
    /// Concatenated `output_text` parts of every message item
    pub fn output_text(&self) -> String {
        self.output
            .iter()
            .filter(|item| item.item_type.as_deref() == Some("message"))
            .flat_map(|item| item.content.iter())
            .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect()
    }
}

/// An output item: message, function call, reasoning block, tool call, ...
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Item type ("message", "function_call", "reasoning", "web_search_call", ...)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Function name (function calls)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Call ID to answer with a function_call_output (function calls)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,

    /// Arguments as JSON text (function calls)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,

    /// Reasoning summary parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Vec<Value>>,

    /// Container (code interpreter calls)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Content parts (messages)
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub content: Vec<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OutputItem {
    pub fn is_function_call(&self) -> bool {
        self.item_type.as_deref() == Some("function_call")
    }
}

/// Token usage; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens_details: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens_details: Option<Value>,
}

/// Error payload reported by the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

/// Treat an explicit `null` like a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
