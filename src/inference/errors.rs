//! Model gateway errors. Any of these ends the current turn.

use thiserror::Error;

/// Errors that can occur while talking to the model gateway.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The endpoint answered with a body we could not interpret.
    #[error("invalid model response: {reason}")]
    InvalidResponse { reason: String },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl InferenceError {
    /// Whether retrying the same request later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            InferenceError::ConnectionFailed { .. } | InferenceError::Timeout { .. } => true,
            InferenceError::HttpError { status, .. } => *status == 429 || *status >= 500,
            InferenceError::InvalidResponse { .. } | InferenceError::ConfigError { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        let overloaded = InferenceError::HttpError {
            status: 529,
            body: "overloaded".into(),
        };
        assert!(overloaded.is_retryable());

        let rate_limited = InferenceError::HttpError {
            status: 429,
            body: String::new(),
        };
        assert!(rate_limited.is_retryable());

        let bad_request = InferenceError::HttpError {
            status: 400,
            body: "max_tokens: required".into(),
        };
        assert!(!bad_request.is_retryable());
    }

    #[test]
    fn test_transport_failures_are_retryable() {
        assert!(InferenceError::Timeout { duration_secs: 5 }.is_retryable());
        assert!(InferenceError::ConnectionFailed {
            endpoint: "http://localhost:8080/v1/messages".into(),
            reason: "refused".into(),
        }
        .is_retryable());
        assert!(!InferenceError::InvalidResponse {
            reason: "not json".into(),
        }
        .is_retryable());
    }
}
