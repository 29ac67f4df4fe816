//! HTTP Client
//!
//! Retrying request sender shared by the buffered and streaming paths.
//! Retries cover connection establishment and the status line only; once a
//! streaming body is handed out, transport errors end the stream instead.

use crate::client::metrics::{MetricsSink, RequestEvent, TracingMetrics};
use crate::client::retry::{retry_after, RetryPolicy};
use crate::error::{ResponsesError, Result};
use async_stream::stream;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Default whole-request timeout (long completions stream for minutes)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw response body chunks of an open stream
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A request as handed to the sender: target, headers and an optional body
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,

    /// Overrides the sender's default timeout for this request
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// POST with a JSON-encoded body
    pub fn post_json(url: impl Into<String>, body: &impl Serialize) -> Result<Self> {
        let body = serde_json::to_vec(body)
            .map_err(|e| ResponsesError::Config(format!("Failed to encode request body: {}", e)))?;

        Ok(Self::post(url)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body(body))
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add headers, replacing existing values with the same name
    pub fn with_headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A fully buffered response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Body as text (invalid UTF-8 is replaced)
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            let text = self.text();
            ResponsesError::Parsing(format!(
                "Failed to parse response: {}. Body: {}",
                e,
                truncate(&text, 500)
            ))
        })
    }

    /// Turn a non-2xx response into `HttpStatus`
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_status_error())
        }
    }

    fn into_status_error(self) -> ResponsesError {
        ResponsesError::HttpStatus {
            status: self.status.as_u16(),
            body: self.text(),
        }
    }
}

/// Outcome of one accepted attempt
enum Exchange {
    Buffered(HttpResponse),
    Streaming(reqwest::Response),
}

impl Exchange {
    fn status(&self) -> StatusCode {
        match self {
            Exchange::Buffered(response) => response.status,
            Exchange::Streaming(response) => response.status(),
        }
    }
}

/// HTTP sender with retry, backoff and request metrics.
///
/// Holds no per-call state, so one instance can serve many concurrent
/// requests and streams.
pub struct RetryingSender {
    /// Inner reqwest client
    client: Client,

    policy: RetryPolicy,

    /// Applied when a request carries no timeout of its own
    timeout: Duration,

    metrics: Arc<dyn MetricsSink>,
}

impl RetryingSender {
    /// Create a sender with default timeouts and retry policy
    pub fn new() -> Result<Self> {
        Self::with_timeouts(DEFAULT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, 10)
    }

    /// Create a sender with explicit timeouts
    pub fn with_timeouts(
        timeout: Duration,
        connect_timeout: Duration,
        pool_max_idle_per_host: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(pool_max_idle_per_host)
            .build()
            .map_err(|e| ResponsesError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::from_client(client, timeout))
    }

    /// Wrap an existing reqwest client
    pub fn from_client(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
            timeout,
            metrics: Arc::new(TracingMetrics),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn default_timeout(&self) -> Duration {
        self.timeout
    }

    /// Effective timeout for a request
    pub fn timeout_for(&self, request: &HttpRequest) -> Duration {
        request.timeout.unwrap_or(self.timeout)
    }

    /// Send a request and buffer the whole body.
    ///
    /// Statuses the retry predicate does not match are returned as-is,
    /// including non-2xx ones; dropping the future cancels the request.
    pub async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let cancel = CancellationToken::new();
        match self.execute(request, &cancel, true).await? {
            Exchange::Buffered(response) => Ok(response),
            Exchange::Streaming(response) => buffer(response).await,
        }
    }

    /// Open a streaming request and hand out its body chunks.
    ///
    /// Non-2xx statuses become `HttpStatus` errors. Errors while reading the
    /// returned stream are never retried.
    pub async fn open_stream(
        &self,
        request: &HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteStream> {
        let response = match self.execute(request, cancel, false).await? {
            Exchange::Streaming(response) => response,
            Exchange::Buffered(response) => return Err(response.into_status_error()),
        };

        let mut body = response.bytes_stream();
        let s = stream! {
            while let Some(chunk) = body.next().await {
                yield chunk.map_err(ResponsesError::from);
            }
        };

        Ok(Box::pin(s))
    }

    /// Run the retry loop for one logical request
    async fn execute(
        &self,
        request: &HttpRequest,
        cancel: &CancellationToken,
        buffer_body: bool,
    ) -> Result<Exchange> {
        let correlation_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut retry = self.policy.start();

        self.emit(RequestEvent::Started {
            correlation_id: correlation_id.clone(),
            method: request.method.to_string(),
            url: request.url.clone(),
            at: Utc::now(),
        });

        while retry.has_budget() {
            let attempt = retry.begin_attempt();
            self.emit(RequestEvent::Attempt {
                correlation_id: correlation_id.clone(),
                attempt,
                at: Utc::now(),
            });

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(%correlation_id, attempt, "request cancelled");
                    return Err(ResponsesError::Cancelled);
                }
                outcome = self.attempt(request, buffer_body) => outcome,
            };

            let hint = match outcome {
                Ok(exchange) if !self.policy.should_retry_status(exchange.status()) => {
                    self.emit(RequestEvent::Completed {
                        correlation_id: correlation_id.clone(),
                        status: exchange.status().as_u16(),
                        retries: retry.retries(),
                        duration: started.elapsed(),
                        at: Utc::now(),
                    });
                    return Ok(exchange);
                }
                Ok(Exchange::Buffered(response)) => {
                    let hint = retry_after(&response.headers);
                    retry.record_failure(response.into_status_error());
                    hint
                }
                Ok(Exchange::Streaming(response)) => {
                    // attempt() buffers every non-2xx body, so this is a 2xx
                    // status the caller told us to retry
                    let hint = retry_after(response.headers());
                    retry.record_failure(ResponsesError::HttpStatus {
                        status: response.status().as_u16(),
                        body: String::new(),
                    });
                    hint
                }
                Err(err @ ResponsesError::Config(_)) => {
                    self.emit_failed(&correlation_id, &err, retry.retries(), started);
                    return Err(err);
                }
                Err(err) => {
                    retry.record_failure(err);
                    None
                }
            };

            if !retry.has_budget() {
                break;
            }

            let delay = retry.next_delay(hint);
            self.emit(RequestEvent::Retrying {
                correlation_id: correlation_id.clone(),
                attempt,
                delay,
                reason: retry
                    .last_error()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(%correlation_id, attempt, "request cancelled during backoff");
                    return Err(ResponsesError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let retries = retry.retries();
        let err = retry.into_error();
        self.emit_failed(&correlation_id, &err, retries, started);
        Err(err)
    }

    /// One HTTP attempt. Buffers the body when asked to, or whenever the
    /// status is not a success, so no unread body outlives the attempt.
    async fn attempt(&self, request: &HttpRequest, buffer_body: bool) -> Result<Exchange> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone())
            .timeout(self.timeout_for(request));

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;

        if buffer_body || !response.status().is_success() {
            Ok(Exchange::Buffered(buffer(response).await?))
        } else {
            Ok(Exchange::Streaming(response))
        }
    }

    fn emit(&self, event: RequestEvent) {
        self.metrics.record(&event);
    }

    fn emit_failed(
        &self,
        correlation_id: &str,
        error: &ResponsesError,
        retries: u32,
        started: Instant,
    ) {
        self.emit(RequestEvent::Failed {
            correlation_id: correlation_id.to_string(),
            error: error.to_string(),
            retries,
            duration: started.elapsed(),
            at: Utc::now(),
        });
    }
}

async fn buffer(response: reqwest::Response) -> Result<HttpResponse> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
