//! Stream Module
//!
//! SSE record scanning, event decoding, function call accumulation and the
//! orchestrator tying them to a byte source.

pub mod accumulator;
pub mod decoder;
pub mod orchestrator;
pub mod scanner;

pub use accumulator::{FunctionCall, FunctionCallAccumulator};
pub use decoder::{decode, parse_fields, SseFields};
pub use orchestrator::{EventStream, StreamItem, StreamOptions, StreamState};
pub use scanner::{ChunkScanner, SseRecord};
