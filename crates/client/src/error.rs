//! Unified error type with Sentry integration.
//!
//! Module errors convert into [`ClientError`] with `?`. Front ends call
//! [`ClientError::capture`] before showing the error so unexpected failures
//! reach Sentry; expected ones (bad credentials, offline) are only logged.

use thiserror::Error;

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::data::DataError;
use crate::fetch::{FetchError, TransportError};
use crate::storage::StorageError;

/// Client-level error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Durable storage could not be opened.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The HTTP transport could not be built.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A read failed after retries.
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// An authentication operation failed.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// A collection read or write failed.
    #[error("Data error: {0}")]
    Data(#[from] DataError),
}

impl ClientError {
    /// Whether the error is a connectivity problem or a refusal the user can
    /// act on, rather than a defect.
    #[must_use]
    pub fn is_expected(&self) -> bool {
        match self {
            Self::Config(_) | Self::Storage(_) | Self::Transport(_) => false,
            Self::Fetch(e) | Self::Data(DataError::Fetch(e)) => match e {
                FetchError::Transport(e) => is_expected_transport(e),
                _ => e.is_network(),
            },
            Self::Data(DataError::Transport(e)) => is_expected_transport(e),
            Self::Data(DataError::Unfiltered { .. } | DataError::TimedOut { .. }) => true,
            Self::Data(DataError::Encode(_) | DataError::Decode(_)) => false,
            Self::Auth(_) => true,
        }
    }

    /// Report unexpected errors to Sentry, logging either way.
    pub fn capture(&self) {
        if self.is_expected() {
            tracing::warn!(error = %self, "Operation failed");
            return;
        }

        let event_id = sentry::capture_error(self);
        tracing::error!(
            error = %self,
            sentry_event_id = %event_id,
            "Operation failed"
        );
    }
}

/// Connectivity failures and client-side rejections (4xx).
const fn is_expected_transport(error: &TransportError) -> bool {
    match error {
        TransportError::Network(_) => true,
        TransportError::Status { status, .. } => *status < 500,
        TransportError::Decode(_) | TransportError::InvalidRequest(_) => false,
    }
}

/// Result type alias for `ClientError`.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Set the Sentry user context.
///
/// Call this after a successful sign-in to associate errors with the golfer.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on sign-out.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}
