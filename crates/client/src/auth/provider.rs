//! Remote authentication provider seam.

use async_trait::async_trait;
use fairway_core::{Email, Handicap, Identity, IdentitySource, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use super::error::ProviderError;

/// A user record as the auth provider reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: UserId,
    pub email: Email,
    /// Free-form metadata supplied at sign-up.
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
}

impl RemoteUser {
    /// Identity built from the user record alone, used when the profile
    /// lookup has nothing better.
    #[must_use]
    pub fn to_identity(&self) -> Identity {
        let text = |field: &str| {
            self.user_metadata
                .get(field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Identity {
            id: self.id,
            email: self.email.clone(),
            first_name: text("first_name"),
            last_name: text("last_name"),
            username: text("username"),
            avatar_url: self
                .user_metadata
                .get("avatar_url")
                .and_then(Value::as_str)
                .map(str::to_string),
            handicap: self
                .user_metadata
                .get("handicap")
                .and_then(Value::as_f64)
                .and_then(|h| Handicap::try_from(h).ok()),
            source: IdentitySource::Remote,
        }
    }
}

/// An authenticated provider session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as seconds since the Unix epoch.
    pub expires_at: i64,
    pub user: RemoteUserRef,
}

/// Minimal user reference stored alongside a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUserRef {
    pub id: UserId,
    pub email: Email,
}

impl RemoteSession {
    /// Whether the access token expires within `leeway_secs` of `now_millis`.
    #[must_use]
    pub const fn expires_within(&self, now_millis: i64, leeway_secs: i64) -> bool {
        self.expires_at.saturating_sub(leeway_secs).saturating_mul(1000) <= now_millis
    }
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

impl From<&RemoteUser> for RemoteUserRef {
    fn from(user: &RemoteUser) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
        }
    }
}

/// Details for creating an account.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
}

/// Session change announced by the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(RemoteUser),
    SignedOut,
    TokenRefreshed(RemoteUser),
}

/// Remote authentication provider.
///
/// Implementations own the remote session: they keep it across calls and
/// announce changes through [`subscribe`](Self::subscribe).
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Sign in with an email and password.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Rejected` for bad credentials and
    /// `ProviderError::Network` when the provider is unreachable.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<RemoteUser, ProviderError>;

    /// Create an account.
    ///
    /// Returns the signed-in user, or `None` when the provider requires
    /// email confirmation before the first sign-in.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Rejected` if the account cannot be created.
    async fn sign_up(&self, request: &SignUpRequest) -> Result<Option<RemoteUser>, ProviderError>;

    /// End the remote session. The local session is dropped even if the
    /// provider cannot be told.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider could not be notified.
    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// The current session, refreshed if it is about to expire.
    ///
    /// # Errors
    ///
    /// Returns an error if a needed refresh could not reach the provider.
    async fn get_session(&self) -> Result<Option<RemoteSession>, ProviderError>;

    /// The user behind the current session, verified with the provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider could not be reached.
    async fn get_current_user(&self) -> Result<Option<RemoteUser>, ProviderError>;

    /// The full identity of `user`, including the public profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile lookup failed.
    async fn fetch_profile(&self, user: &RemoteUser) -> Result<Identity, ProviderError>;

    /// Receive future session changes.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}
