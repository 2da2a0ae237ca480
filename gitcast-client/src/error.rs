//! Error types for the Gitcast client

use serde::Deserialize;
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when using the Gitcast client
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}, {category}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error category reported by the orchestrator (e.g. `input_invalid`)
        category: String,
        /// Error message from the API
        message: String,
    },

    /// Too many submissions from this client
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        /// Seconds until a retry may succeed, from the `Retry-After` header
        retry_after: Option<u64>,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Gave up waiting for a job to finish
    #[error("Timed out waiting for job {0}")]
    Timeout(uuid::Uuid),
}

/// Error body returned by the orchestrator
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    category: Option<String>,
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            category: category.into(),
            message: message.into(),
        }
    }

    /// Builds the error for a failed response from its status, `Retry-After`
    /// header and body.
    ///
    /// Bodies that are not the orchestrator's `{error, category}` shape are
    /// kept verbatim as the message.
    pub fn from_response(status: u16, retry_after: Option<u64>, body: &str) -> Self {
        let (category, message) = match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => (
                parsed.category.unwrap_or_else(|| "unknown".to_string()),
                parsed.error,
            ),
            Err(_) if body.trim().is_empty() => ("unknown".to_string(), "Unknown error".to_string()),
            Err(_) => ("unknown".to_string(), body.trim().to_string()),
        };

        if status == 429 {
            return Self::RateLimited {
                message,
                retry_after,
            };
        }

        Self::api_error(status, category, message)
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if this error is a client error (4xx status)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
            || matches!(self, Self::ApiError { status, .. } if *status >= 400 && *status < 500)
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }

    /// Whether submitting again later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
            || matches!(self, Self::ApiError { status: 503, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_error_body() {
        let err = ClientError::from_response(
            400,
            None,
            r#"{"error": "repository reference is empty", "category": "input_invalid"}"#,
        );
        match &err {
            ClientError::ApiError {
                status,
                category,
                message,
            } => {
                assert_eq!(*status, 400);
                assert_eq!(category, "input_invalid");
                assert_eq!(message, "repository reference is empty");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_client_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_rate_limit_carries_retry_after() {
        let err = ClientError::from_response(
            429,
            Some(12),
            r#"{"error": "Rate limit exceeded", "category": "rate_limited"}"#,
        );
        assert!(matches!(
            err,
            ClientError::RateLimited {
                retry_after: Some(12),
                ..
            }
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_plain_text_body() {
        let err = ClientError::from_response(502, None, "bad gateway\n");
        assert!(err.is_server_error());
        assert!(err.to_string().contains("bad gateway"));

        let err = ClientError::from_response(404, None, "");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_capacity_exceeded_is_retryable() {
        let err = ClientError::from_response(
            503,
            None,
            r#"{"error": "Job queue is full", "category": "capacity_exceeded"}"#,
        );
        assert!(err.is_retryable());
        assert!(err.is_server_error());
    }
}
