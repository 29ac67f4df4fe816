//! responses-sse - streaming client core for Responses-style LLM APIs
//!
//! A retrying HTTP sender, an SSE record scanner, an event decoder and a
//! stream orchestrator that reassembles function call arguments, exposed
//! through [`ResponsesClient`].

use reqwest::header::{HeaderValue, ACCEPT};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod stream;

pub use api::{EventFamily, EventType, ResponseSnapshot, StreamingEvent};
pub use client::{HttpRequest, HttpResponse, MetricsSink, RetryPolicy, RetryingSender};
pub use config::{ClientConfig, ConfigLoader, Endpoint, EndpointProvider};
pub use error::{ResponsesError, Result};
pub use stream::{EventStream, FunctionCall, StreamItem, StreamOptions, StreamState};

use client::TracingMetrics;

/// API path for creating responses
pub const RESPONSES_PATH: &str = "/responses";

/// Client for a Responses-style API.
///
/// Cheap to share: the sender and endpoint provider sit behind `Arc`, and
/// concurrent calls share nothing mutable.
#[derive(Clone)]
pub struct ResponsesClient {
    /// Where calls go and which headers they carry
    endpoint: Arc<dyn EndpointProvider>,

    sender: Arc<RetryingSender>,

    stream_options: StreamOptions,
}

impl ResponsesClient {
    /// Create a client from the default config sources
    pub fn new() -> Result<Self> {
        Self::from_config(ConfigLoader::new()?.into_config())
    }

    /// Create a client with a custom config path
    pub fn with_config_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_config(ConfigLoader::from_path(path)?.into_config())
    }

    pub fn from_config(config: ClientConfig) -> Result<Self> {
        Self::from_config_with_metrics(config, Arc::new(TracingMetrics))
    }

    pub fn from_config_with_metrics(
        config: ClientConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        let sender = config.build_sender(metrics)?;
        let stream_options = config.stream_options();

        Ok(Self {
            endpoint: Arc::new(config),
            sender: Arc::new(sender),
            stream_options,
        })
    }

    /// Create a client over a custom endpoint provider and sender
    pub fn with_endpoint(endpoint: Arc<dyn EndpointProvider>, sender: RetryingSender) -> Self {
        let stream_options = StreamOptions::default().with_timeout(sender.default_timeout());
        Self {
            endpoint,
            sender: Arc::new(sender),
            stream_options,
        }
    }

    pub fn with_stream_options(mut self, options: StreamOptions) -> Self {
        self.stream_options = options;
        self
    }

    pub fn sender(&self) -> &Arc<RetryingSender> {
        &self.sender
    }

    /// Build a JSON POST for `path` with the provider's URL and headers
    pub fn request(&self, path: &str, body: &impl Serialize) -> Result<HttpRequest> {
        let endpoint = self.endpoint.endpoint(path)?;
        Ok(HttpRequest::post_json(endpoint.url, body)?.with_headers(&endpoint.headers))
    }

    /// Send a prepared request with retries and buffer the response
    pub async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.sender.send(request).await
    }

    /// POST a JSON body to `path` and buffer the response
    pub async fn send_json(&self, path: &str, body: &impl Serialize) -> Result<HttpResponse> {
        let request = self.request(path, body)?;
        self.sender.send(&request).await
    }

    /// Create a response without streaming.
    ///
    /// Non-2xx statuses become `HttpStatus` errors.
    pub async fn create_response(&self, body: &Value) -> Result<ResponseSnapshot> {
        self.send_json(RESPONSES_PATH, body)
            .await?
            .error_for_status()?
            .json()
    }

    /// Open an event stream for a prepared request.
    ///
    /// Must be called within a Tokio runtime: the read loop runs on a
    /// spawned task.
    pub fn stream(&self, request: HttpRequest) -> EventStream {
        let options = self.stream_options_for(&request);
        let request = request.with_header(ACCEPT, HeaderValue::from_static("text/event-stream"));
        EventStream::connect_with(self.sender.clone(), request, options)
    }

    /// Client stream options, with the request's own timeout taking precedence
    fn stream_options_for(&self, request: &HttpRequest) -> StreamOptions {
        let options = self.stream_options.clone();
        match request.timeout {
            Some(timeout) => options.with_timeout(timeout),
            None => options,
        }
    }

    /// POST a JSON body to `path` and stream the response events
    pub fn stream_json(&self, path: &str, body: &impl Serialize) -> Result<EventStream> {
        let request = self.request(path, body)?;
        Ok(self.stream(request))
    }

    /// Create a response as a stream; sets `"stream": true` on the body
    pub fn stream_response(&self, body: &Value) -> Result<EventStream> {
        let mut body = body.clone();
        match body.as_object_mut() {
            Some(obj) => {
                obj.insert("stream".to_string(), Value::Bool(true));
            }
            None => {
                return Err(ResponsesError::Config(
                    "request body must be a JSON object".to_string(),
                ))
            }
        }
        self.stream_json(RESPONSES_PATH, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> ResponsesClient {
        ResponsesClient::from_config(ClientConfig::for_base_url("http://localhost:8080/v1")).unwrap()
    }

    #[test]
    fn test_request_uses_endpoint() {
        let request = client()
            .request(RESPONSES_PATH, &json!({"model": "gpt-4.1", "input": "hi"}))
            .unwrap();

        assert_eq!(request.url, "http://localhost:8080/v1/responses");
        assert_eq!(request.headers["content-type"], "application/json");
        let body: Value = serde_json::from_slice(request.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["model"], "gpt-4.1");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ClientConfig {
            retry_jitter: -1.0,
            ..ClientConfig::for_base_url("http://localhost")
        };
        assert!(matches!(
            ResponsesClient::from_config(config),
            Err(ResponsesError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_response_requires_object_body() {
        let err = client().stream_response(&json!(["not", "an", "object"])).unwrap_err();
        assert!(matches!(err, ResponsesError::Config(_)));
    }

    #[test]
    fn test_request_timeout_overrides_stream_timeout() {
        let config = ClientConfig {
            timeout_secs: 1,
            stream_buffer: 4,
            ..ClientConfig::for_base_url("http://localhost")
        };
        let client = ResponsesClient::from_config(config).unwrap();

        let request = client.request(RESPONSES_PATH, &json!({})).unwrap();
        assert_eq!(
            client.stream_options_for(&request).timeout,
            Some(std::time::Duration::from_secs(1))
        );

        let request = request.with_timeout(std::time::Duration::from_secs(10));
        let options = client.stream_options_for(&request);
        assert_eq!(options.timeout, Some(std::time::Duration::from_secs(10)));
        assert_eq!(options.buffer, 4);
    }

    #[test]
    fn test_custom_endpoint_provider() {
        let endpoint = Endpoint::new("http://gateway.local")
            .with_header("x-tenant", "acme")
            .unwrap();
        let client = ResponsesClient::with_endpoint(Arc::new(endpoint), RetryingSender::new().unwrap());

        let request = client.request("/v2/responses", &json!({})).unwrap();
        assert_eq!(request.url, "http://gateway.local/v2/responses");
        assert_eq!(request.headers["x-tenant"], "acme");
    }
}
