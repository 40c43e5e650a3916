//! Fetch and transport errors.
//!
//! Both types are `Clone`: one settled outcome is handed to every caller
//! that joined a de-duplicated request.

use thiserror::Error;

/// Errors raised by a [`Transport`](super::Transport).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The server could not be reached (DNS, connect, reset, transport timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// The response body was not valid JSON.
    #[error("invalid response body: {0}")]
    Decode(String),

    /// The request could not be built (bad path or header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Whether a later attempt could plausibly succeed.
    ///
    /// Network failures, 408, 429 and 5xx are transient. Other statuses are
    /// remote rejections.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => matches!(*status, 408 | 429 | 500..=599),
            Self::Decode(_) | Self::InvalidRequest(_) => false,
        }
    }
}

/// Errors surfaced by [`ResilientFetcher`](super::ResilientFetcher).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The last attempt failed in the transport.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The last attempt did not finish within the per-attempt timeout.
    #[error("request timed out after {after_ms}ms")]
    TimedOut {
        /// Per-attempt timeout in milliseconds.
        after_ms: u64,
    },

    /// The payload could not be decoded into the requested type.
    #[error("failed to decode payload: {0}")]
    Decode(String),

    /// The background request task stopped before settling.
    #[error("request interrupted: {0}")]
    Interrupted(String),
}

impl FetchError {
    /// Whether the attempt sequence should try again after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::TimedOut { .. } => true,
            Self::Decode(_) | Self::Interrupted(_) => false,
        }
    }

    /// Whether this is a connectivity problem rather than a rejection.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Transport(TransportError::Network(_)) | Self::TimedOut { .. }
        )
    }
}
