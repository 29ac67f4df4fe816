//! Streaming Events
//!
//! Typed view over one decoded SSE record. The wire `type` string maps onto
//! [`EventType`]; strings we don't know map onto [`EventType::Unknown`] and keep
//! their raw fields, so new server events never break a stream.

use crate::api::response::{ApiError, OutputItem, ResponseSnapshot, Usage};
use serde_json::{Map, Value};
use std::fmt;

macro_rules! event_types {
    ($($variant:ident => $wire:literal),* $(,)?) => {
        /// Event type discriminator, one variant per known wire name
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum EventType {
            $($variant,)*
            /// A type string this crate does not know about
            Unknown(String),
        }

        impl EventType {
            /// Wire name of this event type
            pub fn as_str(&self) -> &str {
                match self {
                    $(EventType::$variant => $wire,)*
                    EventType::Unknown(name) => name.as_str(),
                }
            }

            /// Map a wire name onto a variant
            pub fn from_wire(name: &str) -> Self {
                match name {
                    $($wire => EventType::$variant,)*
                    other => EventType::Unknown(other.to_string()),
                }
            }
        }
    };
}

event_types! {
    // Response lifecycle
    ResponseCreated => "response.created",
    ResponseQueued => "response.queued",
    ResponseInProgress => "response.in_progress",
    ResponseCompleted => "response.completed",
    ResponseIncomplete => "response.incomplete",
    ResponseFailed => "response.failed",

    // Output items
    OutputItemAdded => "response.output_item.added",
    OutputItemDone => "response.output_item.done",

    // Content parts
    ContentPartAdded => "response.content_part.added",
    ContentPartDone => "response.content_part.done",
    ReasoningSummaryPartAdded => "response.reasoning_summary_part.added",
    ReasoningSummaryPartDone => "response.reasoning_summary_part.done",
    OutputTextAnnotationAdded => "response.output_text.annotation.added",

    // Deltas
    OutputTextDelta => "response.output_text.delta",
    RefusalDelta => "response.refusal.delta",
    FunctionCallArgumentsDelta => "response.function_call_arguments.delta",
    ReasoningTextDelta => "response.reasoning_text.delta",
    ReasoningSummaryTextDelta => "response.reasoning_summary_text.delta",
    AudioDelta => "response.audio.delta",
    AudioTranscriptDelta => "response.audio.transcript.delta",
    CodeInterpreterCallCodeDelta => "response.code_interpreter_call_code.delta",
    McpCallArgumentsDelta => "response.mcp_call_arguments.delta",
    CustomToolCallInputDelta => "response.custom_tool_call_input.delta",
    ImageGenerationCallPartialImage => "response.image_generation_call.partial_image",

    // Delta completions
    OutputTextDone => "response.output_text.done",
    RefusalDone => "response.refusal.done",
    FunctionCallArgumentsDone => "response.function_call_arguments.done",
    ReasoningTextDone => "response.reasoning_text.done",
    ReasoningSummaryTextDone => "response.reasoning_summary_text.done",
    AudioDone => "response.audio.done",
    AudioTranscriptDone => "response.audio.transcript.done",
    CodeInterpreterCallCodeDone => "response.code_interpreter_call_code.done",
    McpCallArgumentsDone => "response.mcp_call_arguments.done",
    CustomToolCallInputDone => "response.custom_tool_call_input.done",

    // Built-in tool call progress
    FileSearchCallInProgress => "response.file_search_call.in_progress",
    FileSearchCallSearching => "response.file_search_call.searching",
    FileSearchCallCompleted => "response.file_search_call.completed",
    WebSearchCallInProgress => "response.web_search_call.in_progress",
    WebSearchCallSearching => "response.web_search_call.searching",
    WebSearchCallCompleted => "response.web_search_call.completed",
    CodeInterpreterCallInProgress => "response.code_interpreter_call.in_progress",
    CodeInterpreterCallInterpreting => "response.code_interpreter_call.interpreting",
    CodeInterpreterCallCompleted => "response.code_interpreter_call.completed",
    ImageGenerationCallInProgress => "response.image_generation_call.in_progress",
    ImageGenerationCallGenerating => "response.image_generation_call.generating",
    ImageGenerationCallCompleted => "response.image_generation_call.completed",
    McpCallInProgress => "response.mcp_call.in_progress",
    McpCallCompleted => "response.mcp_call.completed",
    McpCallFailed => "response.mcp_call.failed",
    McpListToolsInProgress => "response.mcp_list_tools.in_progress",
    McpListToolsCompleted => "response.mcp_list_tools.completed",
    McpListToolsFailed => "response.mcp_list_tools.failed",

    // Errors
    Error => "error",
}

/// Coarse grouping of event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFamily {
    /// Whole-response lifecycle (created, in_progress, completed, ...)
    Lifecycle,
    /// Output item and tool call progress (added, in_progress, completed, done)
    OutputItem,
    /// Content part lifecycle
    ContentPart,
    /// Incremental fragments and their closing "done" events
    Delta,
    Error,
    Unknown,
}

impl EventType {
    pub fn family(&self) -> EventFamily {
        use EventType::*;
        match self {
            ResponseCreated | ResponseQueued | ResponseInProgress | ResponseCompleted
            | ResponseIncomplete | ResponseFailed => EventFamily::Lifecycle,

            OutputItemAdded
            | OutputItemDone
            | FileSearchCallInProgress
            | FileSearchCallSearching
            | FileSearchCallCompleted
            | WebSearchCallInProgress
            | WebSearchCallSearching
            | WebSearchCallCompleted
            | CodeInterpreterCallInProgress
            | CodeInterpreterCallInterpreting
            | CodeInterpreterCallCompleted
            | ImageGenerationCallInProgress
            | ImageGenerationCallGenerating
            | ImageGenerationCallCompleted
            | McpCallInProgress
            | McpCallCompleted
            | McpCallFailed
            | McpListToolsInProgress
            | McpListToolsCompleted
            | McpListToolsFailed => EventFamily::OutputItem,

            ContentPartAdded
            | ContentPartDone
            | ReasoningSummaryPartAdded
            | ReasoningSummaryPartDone
            | OutputTextAnnotationAdded => EventFamily::ContentPart,

            OutputTextDelta
            | RefusalDelta
            | FunctionCallArgumentsDelta
            | ReasoningTextDelta
            | ReasoningSummaryTextDelta
            | AudioDelta
            | AudioTranscriptDelta
            | CodeInterpreterCallCodeDelta
            | McpCallArgumentsDelta
            | CustomToolCallInputDelta
            | ImageGenerationCallPartialImage
            | OutputTextDone
            | RefusalDone
            | FunctionCallArgumentsDone
            | ReasoningTextDone
            | ReasoningSummaryTextDone
            | AudioDone
            | AudioTranscriptDone
            | CodeInterpreterCallCodeDone
            | McpCallArgumentsDone
            | CustomToolCallInputDone => EventFamily::Delta,

            Error => EventFamily::Error,
            Unknown(_) => EventFamily::Unknown,
        }
    }

    /// Server-side end of the response
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::ResponseCompleted | EventType::ResponseIncomplete
        )
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, EventType::Unknown(_))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded stream event
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingEvent {
    /// Discriminator taken from the payload's `type` (or the SSE `event:` line)
    pub event_type: EventType,

    /// Server-assigned ordering number
    pub sequence_number: Option<u64>,

    /// Response snapshot (lifecycle events)
    pub response: Option<ResponseSnapshot>,

    /// Output item snapshot (item lifecycle events)
    pub item: Option<OutputItem>,

    /// Item the event refers to (delta and part events)
    pub item_id: Option<String>,

    pub output_index: Option<u32>,
    pub content_index: Option<u32>,

    /// Incremental fragment (delta family)
    pub delta: Option<String>,

    /// Final text (`*.done` text events)
    pub text: Option<String>,

    /// Final arguments (`*.arguments.done` events)
    pub arguments: Option<String>,

    /// Error details (`error` events)
    pub error: Option<ApiError>,

    /// Every payload field not captured above
    pub extra: Map<String, Value>,
}

impl StreamingEvent {
    /// Bare event of the given type
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            sequence_number: None,
            response: None,
            item: None,
            item_id: None,
            output_index: None,
            content_index: None,
            delta: None,
            text: None,
            arguments: None,
            error: None,
            extra: Map::new(),
        }
    }

    pub fn family(&self) -> EventFamily {
        self.event_type.family()
    }

    pub fn is_terminal(&self) -> bool {
        self.event_type.is_terminal()
    }

    pub fn response_id(&self) -> Option<&str> {
        self.response.as_ref().and_then(|r| r.id.as_deref())
    }

    pub fn model(&self) -> Option<&str> {
        self.response.as_ref().and_then(|r| r.model.as_deref())
    }

    pub fn usage(&self) -> Option<&Usage> {
        self.response.as_ref().and_then(|r| r.usage.as_ref())
    }

    /// `item_id`, falling back to the embedded item's id
    pub fn resolved_item_id(&self) -> Option<&str> {
        self.item_id
            .as_deref()
            .or_else(|| self.item.as_ref().and_then(|i| i.id.as_deref()))
    }

    /// The fragment of an output text delta; `None` for every other event
    pub fn text_delta(&self) -> Option<&str> {
        match self.event_type {
            EventType::OutputTextDelta => self.delta.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_round_trip() {
        for name in [
            "response.created",
            "response.output_item.added",
            "response.function_call_arguments.delta",
            "response.mcp_list_tools.failed",
            "error",
        ] {
            let ty = EventType::from_wire(name);
            assert!(!ty.is_unknown(), "{} should be known", name);
            assert_eq!(ty.as_str(), name);
        }
    }

    #[test]
    fn test_unknown_type_keeps_name() {
        let ty = EventType::from_wire("some.future.event");
        assert_eq!(ty, EventType::Unknown("some.future.event".to_string()));
        assert_eq!(ty.family(), EventFamily::Unknown);
        assert_eq!(ty.to_string(), "some.future.event");
    }

    #[test]
    fn test_families() {
        assert_eq!(
            EventType::ResponseQueued.family(),
            EventFamily::Lifecycle
        );
        assert_eq!(
            EventType::WebSearchCallSearching.family(),
            EventFamily::OutputItem
        );
        assert_eq!(EventType::ContentPartDone.family(), EventFamily::ContentPart);
        assert_eq!(EventType::AudioDelta.family(), EventFamily::Delta);
        assert_eq!(EventType::Error.family(), EventFamily::Error);
    }

    #[test]
    fn test_terminal_types() {
        assert!(EventType::ResponseCompleted.is_terminal());
        assert!(EventType::ResponseIncomplete.is_terminal());
        assert!(!EventType::ResponseFailed.is_terminal());
        assert!(!EventType::OutputItemDone.is_terminal());
    }

    #[test]
    fn test_text_delta_only_for_output_text() {
        let mut event = StreamingEvent::new(EventType::OutputTextDelta);
        event.delta = Some("Hi".to_string());
        assert_eq!(event.text_delta(), Some("Hi"));

        event.event_type = EventType::RefusalDelta;
        assert_eq!(event.text_delta(), None);
    }
}
