//! Error types for the API layer

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors that can occur while talking to the remote API
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// No credential available, or the server rejected it
    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    /// Server asked us to slow down. Absorbed by the retry loop.
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Connection reset, timeout, or 5xx after exhausting retries
    #[error("Transient network failure on {path} after {attempts} attempt(s): {reason}")]
    TransientNetwork {
        path: String,
        attempts: u32,
        reason: String,
    },

    /// Body could not be decoded into the expected shape
    #[error("Malformed response from {path}: {reason}")]
    MalformedResponse { path: String, reason: String },

    /// Non-retryable 4xx
    #[error("Request to {path} failed with status {status}: {message}")]
    Client {
        status: u16,
        path: String,
        message: String,
    },

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid client configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ApiError {
    /// Build a `MalformedResponse` for the given request path
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Stable, serializable classification of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Self::RateLimited { .. } | Self::TransientNetwork { .. } => ErrorKind::TransientNetwork,
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::Client { .. } => ErrorKind::Client,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether the request may succeed if attempted again
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::TransientNetwork { .. }
        )
    }

    /// Whether this error must abort an entire scan
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthenticated(_) | Self::Config(_))
    }
}

/// Error classification stored alongside per-workspace failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthenticated,
    TransientNetwork,
    MalformedResponse,
    Client,
    Cancelled,
    Config,
}
