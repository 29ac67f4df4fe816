//! Function Call Accumulation
//!
//! Collects `response.function_call_arguments.delta` fragments per item and
//! releases the finished call once its done event arrives.

use crate::api::events::{EventType, StreamingEvent};
use crate::api::response::OutputItem;
use std::collections::HashMap;
use tracing::debug;

/// A function call whose arguments are complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub item_id: String,
    pub call_id: Option<String>,
    pub name: Option<String>,

    /// Arguments as JSON text
    pub arguments: String,
}

/// Call still receiving argument fragments
#[derive(Debug, Default, Clone)]
struct PendingCall {
    name: Option<String>,
    call_id: Option<String>,
    arguments: String,
}

/// In-flight function calls keyed by item id.
///
/// Every entry leaves the map either through its done event or through
/// [`FunctionCallAccumulator::discard`] at stream end.
#[derive(Debug, Default)]
pub struct FunctionCallAccumulator {
    pending: HashMap<String, PendingCall>,
}

impl FunctionCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event; returns the call this event finalized, if any
    pub fn observe(&mut self, event: &StreamingEvent) -> Option<FunctionCall> {
        match event.event_type {
            EventType::OutputItemAdded => {
                if let Some(item) = event.item.as_ref().filter(|i| i.is_function_call()) {
                    self.begin(item);
                }
                None
            }
            EventType::FunctionCallArgumentsDelta => {
                match (event.item_id.as_deref(), event.delta.as_deref()) {
                    (Some(item_id), Some(delta)) => self.append(item_id, delta),
                    _ => debug!("arguments delta without item_id or delta, skipping"),
                }
                None
            }
            EventType::FunctionCallArgumentsDone => {
                let item_id = event.resolved_item_id()?;
                let call = self.finish(item_id, event.arguments.as_deref());
                call.map(|mut call| {
                    if let Some(item) = &event.item {
                        fill_identity(&mut call, item);
                    }
                    call
                })
            }
            EventType::OutputItemDone => {
                let item = event.item.as_ref().filter(|i| i.is_function_call())?;
                let item_id = item.id.as_deref()?;
                let mut call = self.finish(item_id, item.arguments.as_deref())?;
                fill_identity(&mut call, item);
                Some(call)
            }
            _ => None,
        }
    }

    /// Register a call announced by `response.output_item.added`
    pub fn begin(&mut self, item: &OutputItem) {
        let Some(item_id) = item.id.clone() else {
            return;
        };

        let entry = self.pending.entry(item_id).or_default();
        entry.name = entry.name.take().or_else(|| item.name.clone());
        entry.call_id = entry.call_id.take().or_else(|| item.call_id.clone());
        if entry.arguments.is_empty() {
            if let Some(arguments) = &item.arguments {
                entry.arguments.push_str(arguments);
            }
        }
    }

    /// Append an argument fragment, creating the entry if needed
    pub fn append(&mut self, item_id: &str, delta: &str) {
        match self.pending.get_mut(item_id) {
            Some(entry) => entry.arguments.push_str(delta),
            None => {
                self.pending.insert(
                    item_id.to_string(),
                    PendingCall {
                        arguments: delta.to_string(),
                        ..PendingCall::default()
                    },
                );
            }
        }
    }

    /// Remove and return a finished call.
    ///
    /// The accumulated text wins; `fallback` is used only when no fragment
    /// arrived. Returns `None` when the item is not pending (never seen, or
    /// already finalized).
    pub fn finish(&mut self, item_id: &str, fallback: Option<&str>) -> Option<FunctionCall> {
        let pending = self.pending.remove(item_id)?;
        let arguments = if pending.arguments.is_empty() {
            fallback.unwrap_or_default().to_string()
        } else {
            pending.arguments
        };

        Some(FunctionCall {
            item_id: item_id.to_string(),
            call_id: pending.call_id,
            name: pending.name,
            arguments,
        })
    }

    /// Drop every unfinished call; returns the ids that were dropped
    pub fn discard(&mut self) -> Vec<String> {
        self.pending.drain().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn fill_identity(call: &mut FunctionCall, item: &OutputItem) {
    if call.name.is_none() {
        call.name = item.name.clone();
    }
    if call.call_id.is_none() {
        call.call_id = item.call_id.clone();
    }
}
