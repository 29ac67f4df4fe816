//! Client Module
//!
//! Retrying HTTP sender, retry policy and request metrics.

pub mod http;
pub mod metrics;
pub mod retry;

pub use http::{ByteStream, HttpRequest, HttpResponse, RetryingSender};
pub use metrics::{InMemoryMetrics, MetricsSink, NoopMetrics, RequestEvent, TracingMetrics};
pub use retry::{RetryPolicy, RetryState};
