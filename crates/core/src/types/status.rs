//! Status enums shared between the client and its front ends.

use serde::{Deserialize, Serialize};

/// Authentication status of the current client session.
///
/// ```text
/// Unknown -> Checking -> AuthenticatedRemote | AuthenticatedFallback | Unauthenticated
/// Unauthenticated -> AuthenticatedRemote | AuthenticatedFallback   (sign-in)
/// any -> Unauthenticated                                           (sign-out)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    /// Session has not been checked yet.
    #[default]
    Unknown,
    /// Session restore is in progress.
    Checking,
    /// Signed in with an identity verified by the remote provider.
    AuthenticatedRemote,
    /// Signed in with a locally persisted demo identity.
    AuthenticatedFallback,
    /// No active identity.
    Unauthenticated,
}

impl AuthStatus {
    /// Whether an identity is active.
    #[must_use]
    pub const fn is_authenticated(self) -> bool {
        matches!(
            self,
            Self::AuthenticatedRemote | Self::AuthenticatedFallback
        )
    }

    /// Whether the session check has finished.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        !matches!(self, Self::Unknown | Self::Checking)
    }
}

impl std::fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Checking => write!(f, "checking"),
            Self::AuthenticatedRemote => write!(f, "authenticated_remote"),
            Self::AuthenticatedFallback => write!(f, "authenticated_fallback"),
            Self::Unauthenticated => write!(f, "unauthenticated"),
        }
    }
}

impl std::str::FromStr for AuthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "checking" => Ok(Self::Checking),
            "authenticated_remote" => Ok(Self::AuthenticatedRemote),
            "authenticated_fallback" => Ok(Self::AuthenticatedFallback),
            "unauthenticated" => Ok(Self::Unauthenticated),
            _ => Err(format!("invalid auth status: {s}")),
        }
    }
}
