//! Transport Error Taxonomy
//!
//! Every network attempt made by the engine resolves to either a response or
//! one of these error kinds. The taxonomy drives retry classification: the
//! retry policy, circuit breaker, and queue all branch on [`TransportError`]
//! rather than on raw status codes.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection-level failure (reset, DNS, unreachable host)
    #[error("Transient network failure: {0}")]
    TransientNetwork(String),

    /// Request exceeded its timeout bound
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Server-side failure (HTTP 5xx)
    #[error("Server error: HTTP {status}")]
    ServerError { status: u16 },

    /// Rate limited (HTTP 429), optionally carrying a Retry-After hint
    #[error("Rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    /// Client-side validation failure (HTTP 400/422 and other 4xx)
    #[error("Client error: HTTP {status}: {message}")]
    ClientError { status: u16, message: String },

    /// Credentials expired or rejected (HTTP 401/403)
    #[error("Authentication expired: HTTP {status}")]
    AuthExpired { status: u16 },

    /// Resource version mismatch (HTTP 409); never retried
    #[error("Version conflict")]
    ConflictVersion,
}

impl TransportError {
    /// Whether the failure class is safe to retry automatically.
    ///
    /// AuthExpired is deliberately not retryable here; it takes the re-auth
    /// path instead of the backoff path.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork(_)
                | Self::Timeout(_)
                | Self::ServerError { .. }
                | Self::RateLimited { .. }
        )
    }

    /// Server-provided retry hint, when one exists.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }

    /// Classify a non-2xx HTTP status into a transport error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => Self::AuthExpired { status },
            409 => Self::ConflictVersion,
            429 => Self::RateLimited {
                retry_after_ms: None,
            },
            500..=599 => Self::ServerError { status },
            _ => Self::ClientError {
                status,
                message: message.into(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
