//! Event Envelope Decoder
//!
//! Turns one SSE record into a [`StreamingEvent`]. Stateless.

use crate::api::events::{EventType, StreamingEvent};
use crate::api::response::{ApiError, OutputItem, ResponseSnapshot};
use crate::error::{ResponsesError, Result};
use crate::stream::scanner::SseRecord;
use memchr::memchr;
use serde::Deserialize;
use serde_json::{Map, Value};

/// SSE fields of one record
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SseFields {
    /// `event:` line
    pub event: Option<String>,

    /// `data:` lines joined with `\n`
    pub data: String,

    /// `id:` line
    pub id: Option<String>,
}

/// Split a record into its SSE fields.
///
/// Comment lines (`:` prefix) and `retry:` are ignored; a single space after
/// the colon is stripped as SSE requires.
pub fn parse_fields(record: &[u8]) -> SseFields {
    let mut fields = SseFields::default();
    let mut has_data = false;
    let mut rest = record;

    while !rest.is_empty() {
        let (line, next) = match memchr(b'\n', rest) {
            Some(pos) => (&rest[..pos], &rest[pos + 1..]),
            None => (rest, &rest[rest.len()..]),
        };
        rest = next;

        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() || line[0] == b':' {
            continue;
        }

        let (name, value) = match memchr(b':', line) {
            Some(pos) => {
                let value = &line[pos + 1..];
                (&line[..pos], value.strip_prefix(b" ").unwrap_or(value))
            }
            None => (line, &line[line.len()..]),
        };
        let value = String::from_utf8_lossy(value);

        match name {
            b"data" => {
                if has_data {
                    fields.data.push('\n');
                }
                fields.data.push_str(&value);
                has_data = true;
            }
            b"event" => fields.event = Some(value.into_owned()),
            b"id" => fields.id = Some(value.into_owned()),
            _ => {}
        }
    }

    fields
}

/// Wire shape shared by every event payload
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    event_type: Option<String>,

    #[serde(default)]
    sequence_number: Option<u64>,

    #[serde(default)]
    response: Option<ResponseSnapshot>,

    #[serde(default)]
    item: Option<OutputItem>,

    #[serde(default)]
    item_id: Option<String>,

    #[serde(default)]
    output_index: Option<u32>,

    #[serde(default)]
    content_index: Option<u32>,

    #[serde(default)]
    delta: Option<Value>,

    #[serde(default)]
    text: Option<String>,

    #[serde(default)]
    arguments: Option<String>,

    /// `error` events carry code/message/param at the top level
    #[serde(default)]
    code: Option<Value>,

    #[serde(default)]
    message: Option<String>,

    #[serde(default)]
    param: Option<String>,

    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Decode one record.
///
/// Returns `Ok(None)` for records without data (comments, keep-alives) and
/// for the `[DONE]` sentinel. Unknown event types decode to
/// [`EventType::Unknown`]; only malformed JSON is an error.
pub fn decode(record: &SseRecord) -> Result<Option<StreamingEvent>> {
    let fields = parse_fields(record.as_bytes());
    let data = fields.data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }

    let envelope: Envelope = serde_json::from_str(data).map_err(|e| {
        ResponsesError::Parsing(format!(
            "Failed to parse SSE payload: {}. Data: {}",
            e,
            preview(data)
        ))
    })?;

    let name = envelope
        .event_type
        .as_deref()
        .or(fields.event.as_deref())
        .unwrap_or_default();
    let event_type = EventType::from_wire(name);

    let error = match event_type {
        EventType::Error => Some(ApiError {
            code: envelope.code.as_ref().map(value_to_string),
            message: envelope.message.clone(),
            param: envelope.param.clone(),
        }),
        _ => envelope.response.as_ref().and_then(|r| r.error.clone()),
    };

    let mut extra = envelope.extra;
    if !matches!(event_type, EventType::Error) {
        // Outside error events these are ordinary payload fields
        if let Some(code) = envelope.code {
            extra.insert("code".to_string(), code);
        }
        if let Some(message) = envelope.message {
            extra.insert("message".to_string(), Value::String(message));
        }
        if let Some(param) = envelope.param {
            extra.insert("param".to_string(), Value::String(param));
        }
    }

    Ok(Some(StreamingEvent {
        event_type,
        sequence_number: envelope.sequence_number,
        response: envelope.response,
        item: envelope.item,
        item_id: envelope.item_id,
        output_index: envelope.output_index,
        content_index: envelope.content_index,
        delta: envelope.delta.as_ref().map(value_to_string),
        text: envelope.text,
        arguments: envelope.arguments,
        error,
        extra,
    }))
}

/// Strings pass through; anything else is kept as its JSON text
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn preview(data: &str) -> &str {
    match data.char_indices().nth(200) {
        Some((end, _)) => &data[..end],
        None => data,
    }
}
