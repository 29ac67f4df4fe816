//! Request Metrics
//!
//! Fire-and-forget observability events emitted by the retrying sender.
//! Sinks must return quickly; nothing they do feeds back into control flow.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// One observability event for a logical request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestEvent {
    /// Logical request started
    Started {
        correlation_id: String,
        method: String,
        url: String,
        at: DateTime<Utc>,
    },

    /// One HTTP attempt is about to be sent (zero-based)
    Attempt {
        correlation_id: String,
        attempt: u32,
        at: DateTime<Utc>,
    },

    /// An attempt failed and another one will follow after `delay`
    Retrying {
        correlation_id: String,
        attempt: u32,
        delay: Duration,
        reason: String,
    },

    /// A response was accepted (any status not matched by the retry predicate)
    Completed {
        correlation_id: String,
        status: u16,
        retries: u32,
        duration: Duration,
        at: DateTime<Utc>,
    },

    /// The request failed terminally
    Failed {
        correlation_id: String,
        error: String,
        retries: u32,
        duration: Duration,
        at: DateTime<Utc>,
    },
}

impl RequestEvent {
    pub fn correlation_id(&self) -> &str {
        match self {
            RequestEvent::Started { correlation_id, .. }
            | RequestEvent::Attempt { correlation_id, .. }
            | RequestEvent::Retrying { correlation_id, .. }
            | RequestEvent::Completed { correlation_id, .. }
            | RequestEvent::Failed { correlation_id, .. } => correlation_id,
        }
    }
}

/// Receiver of request events
pub trait MetricsSink: Send + Sync {
    fn record(&self, event: &RequestEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _event: &RequestEvent) {}
}

/// Writes events as structured tracing records
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record(&self, event: &RequestEvent) {
        match event {
            RequestEvent::Started {
                correlation_id,
                method,
                url,
                ..
            } => debug!(%correlation_id, %method, %url, "request started"),
            RequestEvent::Attempt {
                correlation_id,
                attempt,
                ..
            } => debug!(%correlation_id, attempt, "request attempt"),
            RequestEvent::Retrying {
                correlation_id,
                attempt,
                delay,
                reason,
            } => warn!(
                %correlation_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                %reason,
                "request failed, retrying"
            ),
            RequestEvent::Completed {
                correlation_id,
                status,
                retries,
                duration,
                ..
            } => debug!(
                %correlation_id,
                status,
                retries,
                duration_ms = duration.as_millis() as u64,
                "request completed"
            ),
            RequestEvent::Failed {
                correlation_id,
                error,
                retries,
                duration,
                ..
            } => warn!(
                %correlation_id,
                %error,
                retries,
                duration_ms = duration.as_millis() as u64,
                "request failed"
            ),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    events: Mutex<Vec<RequestEvent>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events
    pub fn events(&self) -> Vec<RequestEvent> {
        self.events.lock().clone()
    }

    /// Number of attempts recorded across all requests
    pub fn attempt_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, RequestEvent::Attempt { .. }))
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record(&self, event: &RequestEvent) {
        self.events.lock().push(event.clone());
    }
}
