//! Authentication state and its transitions.
//!
//! All changes go through [`reduce`], applied by the facade one at a time,
//! so the status and identity can never disagree.

use fairway_core::{AuthStatus, Identity, IdentitySource};

/// The facade's observable state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthSnapshot {
    pub status: AuthStatus,
    pub identity: Option<Identity>,
}

impl AuthSnapshot {
    /// Whether someone is signed in, remotely or through the fallback.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.status.is_authenticated()
    }
}

/// A state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A session check started.
    CheckStarted,
    /// The remote provider verified `Identity`.
    RemoteSignedIn(Identity),
    /// An allow-listed fallback identity was activated or restored.
    FallbackActivated(Identity),
    /// The provider reported its session ended.
    RemoteSessionEnded,
    /// Explicit sign-out, or a check found nobody signed in.
    SignedOut,
}

/// Apply `transition` to `current`.
#[must_use]
pub fn reduce(current: &AuthSnapshot, transition: Transition) -> AuthSnapshot {
    match transition {
        Transition::CheckStarted => AuthSnapshot {
            status: AuthStatus::Checking,
            identity: current.identity.clone(),
        },
        Transition::RemoteSignedIn(identity) => AuthSnapshot {
            status: AuthStatus::AuthenticatedRemote,
            identity: Some(identity.with_source(IdentitySource::Remote)),
        },
        Transition::FallbackActivated(identity) => AuthSnapshot {
            status: AuthStatus::AuthenticatedFallback,
            identity: Some(identity.with_source(IdentitySource::Fallback)),
        },
        // a fallback identity does not depend on the remote session
        Transition::RemoteSessionEnded
            if current.identity.as_ref().is_some_and(|i| !i.is_remote()) =>
        {
            current.clone()
        }
        Transition::RemoteSessionEnded | Transition::SignedOut => AuthSnapshot {
            status: AuthStatus::Unauthenticated,
            identity: None,
        },
    }
}
