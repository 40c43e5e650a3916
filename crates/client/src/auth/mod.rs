//! Resilient authentication facade.
//!
//! [`AuthFacade`] wraps an [`AuthProvider`] and hides whether the current
//! identity was verified remotely or activated from the demo allow-list.
//!
//! # Fallback policy
//!
//! - Sign-in races the provider against a timeout (20 s by default)
//! - If the provider times out or fails with a connectivity-shaped error, the
//!   session is flagged as having connectivity issues; allow-listed demo
//!   credentials then receive their fallback identity, anything else gets
//!   the error
//! - Once flagged, allow-listed credentials skip the provider entirely
//! - The fallback identity is persisted and restored by
//!   [`restore_session`](AuthFacade::restore_session) until sign-out
//! - A remote identity always replaces and clears a fallback identity
//!
//! # Serialization
//!
//! Sign-in, sign-up, sign-out, session restore and provider events all take
//! the same transition lock, and every state change goes through
//! [`state::reduce`]. Two concurrent triggers are applied one after the
//! other, never interleaved.

mod error;
mod fallback;
mod provider;
mod rest;
pub mod state;

pub use error::{AuthError, ProviderError};
pub use fallback::{AUTHENTICATED_KEY, FALLBACK_USER_KEY, FallbackConfig, FallbackLoadError};
pub use provider::{
    AuthEvent, AuthProvider, RemoteSession, RemoteUser, RemoteUserRef, SignUpRequest,
};
pub use rest::{RestAuthProvider, SESSION_STORAGE_KEY};
pub use state::{AuthSnapshot, Transition};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use fairway_core::{AuthStatus, Identity, IdentitySource};
use serde_json::Map;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::storage::KeyValueStore;

use fallback::FallbackStore;

/// Default bound on the remote sign-in call.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(20);

/// Authentication facade.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AuthFacade {
    inner: Arc<FacadeInner>,
}

struct FacadeInner {
    provider: Arc<dyn AuthProvider>,
    fallback: Option<FallbackConfig>,
    store: FallbackStore,
    timeout: Duration,
    state: watch::Sender<AuthSnapshot>,
    connectivity_issues: AtomicBool,
    transitions: Mutex<()>,
}

impl AuthFacade {
    /// Create a facade in the `Unknown` state.
    ///
    /// `fallback: None` disables the demo allow-list entirely.
    #[must_use]
    pub fn new(
        provider: Arc<dyn AuthProvider>,
        storage: Arc<dyn KeyValueStore>,
        fallback: Option<FallbackConfig>,
        timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(AuthSnapshot::default());
        Self {
            inner: Arc::new(FacadeInner {
                provider,
                fallback,
                store: FallbackStore::new(storage),
                timeout,
                state,
                connectivity_issues: AtomicBool::new(false),
                transitions: Mutex::new(()),
            }),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The current state.
    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn status(&self) -> AuthStatus {
        self.inner.state.borrow().status
    }

    /// The active identity, remote or fallback.
    #[must_use]
    pub fn current_identity(&self) -> Option<Identity> {
        self.inner.state.borrow().identity.clone()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.state.subscribe()
    }

    /// Whether a provider call in this session has failed for connectivity
    /// reasons.
    #[must_use]
    pub fn has_connectivity_issues(&self) -> bool {
        self.inner.connectivity_issues.load(Ordering::Acquire)
    }

    /// Whether demo accounts are configured.
    #[must_use]
    pub fn fallback_enabled(&self) -> bool {
        self.inner.fallback.is_some()
    }

    /// The underlying provider.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn AuthProvider> {
        &self.inner.provider
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Determine who is signed in: the remote session if there is one,
    /// otherwise a persisted fallback identity, otherwise nobody.
    #[instrument(skip(self))]
    pub async fn restore_session(&self) -> AuthSnapshot {
        let _transition = self.inner.transitions.lock().await;
        self.apply(Transition::CheckStarted);

        match tokio::time::timeout(self.inner.timeout, self.inner.provider.get_session()).await {
            Ok(Ok(Some(session))) => {
                let user = RemoteUser {
                    id: session.user.id,
                    email: session.user.email,
                    user_metadata: Map::new(),
                };
                let identity = self.remote_identity(&user).await;
                self.activate_remote(identity);
            }
            Ok(Ok(None)) => self.restore_fallback(),
            Ok(Err(e)) => {
                if e.is_connectivity_issue() {
                    self.flag_connectivity_issue();
                }
                warn!(error = %e, "Session check failed");
                self.restore_fallback();
            }
            Err(_) => {
                self.flag_connectivity_issue();
                warn!("Session check timed out");
                self.restore_fallback();
            }
        }

        self.snapshot()
    }

    /// Sign in with an email and password.
    ///
    /// Callers validate that both are non-empty.
    ///
    /// # Errors
    ///
    /// Returns the provider's error, or `AuthError::Timeout` if it did not
    /// answer in time, unless the credentials are an allow-listed demo
    /// account and the failure was a connectivity problem.
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let _transition = self.inner.transitions.lock().await;
        let fallback = self
            .inner
            .fallback
            .as_ref()
            .and_then(|config| config.matching(email, password));

        if self.has_connectivity_issues()
            && let Some(identity) = &fallback
        {
            info!("Provider known to be unreachable, using demo account");
            return Ok(self.activate_fallback(identity.clone()));
        }

        let attempt = tokio::time::timeout(
            self.inner.timeout,
            self.inner.provider.sign_in_with_password(email, password),
        )
        .await;

        let error = match attempt {
            Ok(Ok(user)) => {
                let identity = self.remote_identity(&user).await;
                return Ok(self.activate_remote(identity));
            }
            Ok(Err(e)) if !e.is_connectivity_issue() => return Err(e.into()),
            Ok(Err(e)) => AuthError::Provider(e),
            Err(_) => AuthError::Timeout {
                after_secs: self.inner.timeout.as_secs(),
            },
        };

        self.flag_connectivity_issue();
        match fallback {
            Some(identity) => {
                warn!(error = %error, "Provider unreachable, using demo account");
                Ok(self.activate_fallback(identity))
            }
            None => Err(error),
        }
    }

    /// Create an account and sign in if the provider allows it immediately.
    ///
    /// Returns `None` when the provider requires email confirmation first.
    ///
    /// # Errors
    ///
    /// Returns the provider's error or `AuthError::Timeout`. Sign-up never
    /// falls back to a demo account.
    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn sign_up(&self, request: &SignUpRequest) -> Result<Option<Identity>, AuthError> {
        let _transition = self.inner.transitions.lock().await;

        let outcome = tokio::time::timeout(self.inner.timeout, self.inner.provider.sign_up(request))
            .await
            .map_err(|_| {
                self.flag_connectivity_issue();
                AuthError::Timeout {
                    after_secs: self.inner.timeout.as_secs(),
                }
            })?;

        let user = outcome.inspect_err(|e| {
            if e.is_connectivity_issue() {
                self.flag_connectivity_issue();
            }
        })?;

        let Some(user) = user else {
            return Ok(None);
        };
        let identity = self.remote_identity(&user).await;
        Ok(Some(self.activate_remote(identity)))
    }

    /// Sign out.
    ///
    /// Local state (the fallback identity, the signed-in marker and the
    /// in-memory identity) is cleared first; the remote sign-out is then
    /// attempted and its failure reported without undoing the local part.
    ///
    /// The local clear waits for any transition already in progress, so a
    /// sign-out issued during a slow sign-in lands after it (at most two
    /// auth timeouts later) and is never overwritten by it. The remote call
    /// runs after the transition lock is released.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::RemoteSignOut` if the provider could not be told.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let transition = self.inner.transitions.lock().await;
        self.inner.store.clear();
        self.apply(Transition::SignedOut);
        drop(transition);
        info!("Signed out");

        match tokio::time::timeout(self.inner.timeout, self.inner.provider.sign_out()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(error = %e, "Remote sign-out failed");
                Err(AuthError::RemoteSignOut(e))
            }
            Err(_) => {
                warn!("Remote sign-out timed out");
                Err(AuthError::RemoteSignOut(ProviderError::Timeout))
            }
        }
    }

    /// Apply provider events (sign-ins from elsewhere, expired sessions) on
    /// the current runtime.
    ///
    /// Abort the returned handle to stop listening.
    #[must_use]
    pub fn spawn_event_listener(&self) -> JoinHandle<()> {
        let facade = self.clone();
        let mut events = self.inner.provider.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => facade.apply_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Auth event listener fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    async fn apply_event(&self, event: AuthEvent) {
        let _transition = self.inner.transitions.lock().await;

        match event {
            AuthEvent::SignedIn(user) => {
                let current = self.snapshot();
                if current
                    .identity
                    .as_ref()
                    .is_some_and(|i| i.is_remote() && i.id == user.id)
                {
                    return;
                }

                // the event may be stale; only act on the live session
                match self.inner.provider.get_session().await {
                    Ok(Some(session)) if session.user.id == user.id => {
                        let identity = self.remote_identity(&user).await;
                        self.activate_remote(identity);
                    }
                    Ok(_) => debug!(user_id = %user.id, "Ignoring stale sign-in event"),
                    Err(e) => warn!(error = %e, "Could not confirm sign-in event"),
                }
            }
            AuthEvent::SignedOut => {
                let on_fallback = self
                    .snapshot()
                    .identity
                    .is_some_and(|i| i.source == IdentitySource::Fallback);
                if !on_fallback {
                    self.inner.store.clear();
                }
                self.apply(Transition::RemoteSessionEnded);
            }
            AuthEvent::TokenRefreshed(user) => debug!(user_id = %user.id, "Session refreshed"),
        }
    }

    fn apply(&self, transition: Transition) {
        debug!(?transition, "Auth transition");
        self.inner
            .state
            .send_modify(|snapshot| *snapshot = state::reduce(snapshot, transition));
    }

    /// The full identity of `user`; degrades to the account metadata if the
    /// profile lookup fails.
    async fn remote_identity(&self, user: &RemoteUser) -> Identity {
        match tokio::time::timeout(self.inner.timeout, self.inner.provider.fetch_profile(user))
            .await
        {
            Ok(Ok(identity)) => identity,
            Ok(Err(e)) => {
                warn!(user_id = %user.id, error = %e, "Profile lookup failed");
                user.to_identity()
            }
            Err(_) => {
                warn!(user_id = %user.id, "Profile lookup timed out");
                user.to_identity()
            }
        }
    }

    fn activate_remote(&self, identity: Identity) -> Identity {
        let identity = identity.with_source(IdentitySource::Remote);
        self.inner.store.clear();
        self.inner.store.mark_authenticated();
        self.apply(Transition::RemoteSignedIn(identity.clone()));
        identity
    }

    fn activate_fallback(&self, identity: Identity) -> Identity {
        let identity = identity.with_source(IdentitySource::Fallback);
        self.inner.store.save(&identity);
        self.apply(Transition::FallbackActivated(identity.clone()));
        identity
    }

    fn restore_fallback(&self) {
        match self.inner.store.load() {
            Some(identity) => {
                info!(user_id = %identity.id, "Restored demo account");
                self.apply(Transition::FallbackActivated(identity));
            }
            None => {
                self.inner.store.clear();
                self.apply(Transition::SignedOut);
            }
        }
    }

    fn flag_connectivity_issue(&self) {
        if !self.inner.connectivity_issues.swap(true, Ordering::AcqRel) {
            warn!("Auth provider connectivity issues detected");
        }
    }
}

impl std::fmt::Debug for AuthFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthFacade")
            .field("state", &*self.inner.state.borrow())
            .field("timeout", &self.inner.timeout)
            .field("fallback_enabled", &self.fallback_enabled())
            .field("connectivity_issues", &self.has_connectivity_issues())
            .finish_non_exhaustive()
    }
}
