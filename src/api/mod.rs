//! API Module
//!
//! Response snapshots and the typed streaming events decoded from SSE records.

pub mod events;
pub mod response;

pub use events::{EventFamily, EventType, StreamingEvent};
pub use response::{ApiError, OutputItem, ResponseSnapshot, Usage};
