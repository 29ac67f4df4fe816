//! Endpoint Resolution
//!
//! The client asks an [`EndpointProvider`] for the URL and headers of each
//! call; where they come from (files, environment, a secret store) is the
//! provider's business.

use crate::error::{ResponsesError, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Resolved target of one call
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub headers: HeaderMap,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Add a header, validating name and value
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        insert_header(&mut self.headers, name, value)?;
        Ok(self)
    }
}

/// Source of endpoint URLs and request headers
pub trait EndpointProvider: Send + Sync {
    /// Resolve the endpoint for an API path such as `/responses`
    fn endpoint(&self, path: &str) -> Result<Endpoint>;
}

impl EndpointProvider for Endpoint {
    fn endpoint(&self, path: &str) -> Result<Endpoint> {
        Ok(Endpoint {
            url: join_url(&self.url, path),
            headers: self.headers.clone(),
        })
    }
}

/// Join a base URL and a path with exactly one slash between them
pub fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub(crate) fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| ResponsesError::Config(format!("Invalid header name '{}': {}", name, e)))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| ResponsesError::Config(format!("Invalid value for header '{}': {}", name, e)))?;
    headers.insert(header_name, header_value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://api.example.com/v1", "/responses"), "https://api.example.com/v1/responses");
        assert_eq!(join_url("https://api.example.com/v1/", "responses"), "https://api.example.com/v1/responses");
        assert_eq!(join_url("https://api.example.com/v1", ""), "https://api.example.com/v1");
    }

    #[test]
    fn test_static_endpoint_provider() {
        let base = Endpoint::new("http://localhost:8080")
            .with_header("authorization", "Bearer sk-test")
            .unwrap();

        let resolved = base.endpoint("/responses").unwrap();
        assert_eq!(resolved.url, "http://localhost:8080/responses");
        assert_eq!(resolved.headers["authorization"], "Bearer sk-test");
    }

    #[test]
    fn test_invalid_header_rejected() {
        let err = Endpoint::new("http://localhost").with_header("bad header", "x").unwrap_err();
        assert!(matches!(err, ResponsesError::Config(_)));

        let err = Endpoint::new("http://localhost").with_header("x-ok", "line\nbreak").unwrap_err();
        assert!(matches!(err, ResponsesError::Config(_)));
    }
}
