//! Error Types
//!
//! Error taxonomy shared by the retrying sender and the streaming pipeline.

use thiserror::Error;

/// Main error type for request and stream operations
#[derive(Debug, Error)]
pub enum ResponsesError {
    /// Connection refused, DNS failure, reset, or a body read that broke off
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request or stream exceeded its timeout
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Non-success status that the caller has to interpret
    #[error("Request failed with status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Malformed payload inside a well-formed SSE record
    #[error("Parsing error: {0}")]
    Parsing(String),

    /// Caller-initiated cancellation
    #[error("Request cancelled")]
    Cancelled,

    /// Retry budget exhausted; wraps the last underlying cause
    #[error("Network error after {attempts} attempts: {source}")]
    Network {
        attempts: u32,
        #[source]
        source: Box<ResponsesError>,
    },

    /// Configuration errors (invalid JSON, bad header values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResponsesError {
    /// The innermost error, looking through `Network` wrappers
    pub fn root_cause(&self) -> &ResponsesError {
        match self {
            ResponsesError::Network { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether this is (or wraps) a transport-level failure
    pub fn is_transport(&self) -> bool {
        matches!(
            self.root_cause(),
            ResponsesError::Transport(_) | ResponsesError::Timeout(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResponsesError::Cancelled)
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self.root_cause() {
            ResponsesError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ResponsesError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ResponsesError::Timeout(err.to_string())
        } else if err.is_connect() {
            ResponsesError::Transport(format!("Connection failed: {}", err))
        } else if err.is_builder() {
            ResponsesError::Config(format!("Invalid request: {}", err))
        } else {
            ResponsesError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ResponsesError {
    fn from(err: serde_json::Error) -> Self {
        ResponsesError::Parsing(format!("JSON parsing error: {}", err))
    }
}

impl From<std::io::Error> for ResponsesError {
    fn from(err: std::io::Error) -> Self {
        ResponsesError::Config(format!("IO error: {}", err))
    }
}

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, ResponsesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_through_network() {
        let err = ResponsesError::Network {
            attempts: 3,
            source: Box::new(ResponsesError::Transport("refused".to_string())),
        };

        assert!(err.is_transport());
        assert!(matches!(err.root_cause(), ResponsesError::Transport(_)));
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_status_is_exposed() {
        let err = ResponsesError::Network {
            attempts: 3,
            source: Box::new(ResponsesError::HttpStatus {
                status: 503,
                body: "overloaded".to_string(),
            }),
        };

        assert_eq!(err.status(), Some(503));
        assert!(!err.is_transport());
        assert!(err.to_string().contains("after 3 attempts"));
    }
}
