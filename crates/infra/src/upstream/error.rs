use std::time::Duration;

use thiserror::Error;

use crate::jobs::Retryable;

/// Failure of one upstream call, classified for retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("upstream request timed out: {0}")]
    Timeout(String),

    #[error("upstream rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("upstream server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Any 4xx other than 429.
    #[error("upstream rejected request {status}: {message}")]
    Client { status: u16, message: String },

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("malformed upstream payload: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let message = message.into();
        match status {
            429 => UpstreamError::RateLimited { retry_after },
            500..=599 => UpstreamError::Server { status, message },
            _ => UpstreamError::Client { status, message },
        }
    }
}

impl Retryable for UpstreamError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            UpstreamError::Timeout(_)
                | UpstreamError::RateLimited { .. }
                | UpstreamError::Server { .. }
                | UpstreamError::Transport(_)
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            UpstreamError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
