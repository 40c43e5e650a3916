//! Authentication error types.

use thiserror::Error;

use crate::fetch::TransportError;

/// Errors reported by an [`AuthProvider`](super::AuthProvider).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The provider did not answer in time.
    #[error("request timed out")]
    Timeout,

    /// The provider answered and refused the request (bad credentials,
    /// expired token, duplicate account).
    #[error("{message}")]
    Rejected {
        /// HTTP status code of the refusal.
        status: u16,
        /// Message reported by the provider.
        message: String,
    },

    /// The provider answered with something that is not a valid response.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether the error looks like a connectivity problem rather than a
    /// refusal.
    ///
    /// Besides the network and timeout variants, any message mentioning a
    /// fetch, network or timeout condition counts; gateways report upstream
    /// timeouts as ordinary error responses.
    #[must_use]
    pub fn is_connectivity_issue(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::Rejected { message, .. } | Self::InvalidResponse(message) => {
                let message = message.to_ascii_lowercase();
                ["fetch", "network", "timeout", "timed out"]
                    .iter()
                    .any(|needle| message.contains(needle))
            }
        }
    }

    /// Whether the provider refused because the credentials or token are not
    /// valid.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::Rejected {
                status: 400 | 401 | 403,
                ..
            }
        )
    }
}

impl From<TransportError> for ProviderError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Network(message) => Self::Network(message),
            TransportError::Status { status, message } => Self::Rejected { status, message },
            TransportError::Decode(message) | TransportError::InvalidRequest(message) => {
                Self::InvalidResponse(message)
            }
        }
    }
}

/// Errors surfaced by the [`AuthFacade`](super::AuthFacade).
#[derive(Debug, Error)]
pub enum AuthError {
    /// The remote provider failed and no fallback applied.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The remote provider did not answer within the sign-in timeout and no
    /// fallback applied.
    #[error("authentication timed out after {after_secs}s")]
    Timeout {
        /// Sign-in timeout in seconds.
        after_secs: u64,
    },

    /// Local state was cleared but the remote sign-out failed.
    #[error("signed out locally, remote sign-out failed: {0}")]
    RemoteSignOut(ProviderError),
}

impl AuthError {
    /// Whether the failure was a connectivity problem.
    #[must_use]
    pub fn is_connectivity_issue(&self) -> bool {
        match self {
            Self::Provider(e) | Self::RemoteSignOut(e) => e.is_connectivity_issue(),
            Self::Timeout { .. } => true,
        }
    }
}
