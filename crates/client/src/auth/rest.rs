//! Auth provider backed by the hosted backend's REST auth API.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |---|---|
//! | password sign-in | `POST auth/v1/token?grant_type=password` |
//! | token refresh | `POST auth/v1/token?grant_type=refresh_token` |
//! | sign-up | `POST auth/v1/signup` |
//! | sign-out | `POST auth/v1/logout` |
//! | current user | `GET auth/v1/user` |
//! | profile | `GET rest/v1/profiles?id=eq.{id}&select=*` |
//!
//! The session is mirrored into durable storage under
//! [`SESSION_STORAGE_KEY`] so it survives restarts.

use std::sync::Arc;

use async_trait::async_trait;
use fairway_core::{Handicap, Identity, IdentitySource};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use super::error::ProviderError;
use super::provider::{AuthEvent, AuthProvider, RemoteSession, RemoteUser, SignUpRequest};
use crate::clock::Clock;
use crate::fetch::{HttpMethod, Transport, TransportRequest};
use crate::storage::KeyValueStore;

/// Storage key of the persisted remote session.
pub const SESSION_STORAGE_KEY: &str = "fairway_auth_session";

/// Seconds before expiry at which the session is refreshed.
const REFRESH_LEEWAY_SECS: i64 = 60;

/// Capacity of the auth event channel.
const EVENT_CAPACITY: usize = 16;

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: RemoteUser,
}

/// A `profiles` row.
#[derive(Debug, Deserialize)]
struct ProfileRow {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    handicap: Option<f64>,
}

/// [`AuthProvider`] over the backend's REST API.
pub struct RestAuthProvider {
    transport: Arc<dyn Transport>,
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    session: RwLock<Option<RemoteSession>>,
    events: broadcast::Sender<AuthEvent>,
}

impl RestAuthProvider {
    /// Create a provider, restoring any session persisted in `storage`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let session = load_session(storage.as_ref());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            transport,
            storage,
            clock,
            session: RwLock::new(session),
            events,
        }
    }

    /// The session currently held, without refreshing it.
    #[must_use]
    pub fn current_session(&self) -> Option<RemoteSession> {
        self.session.read().clone()
    }

    fn session_from(&self, token: TokenResponse) -> (RemoteSession, RemoteUser) {
        let now_secs = self.clock.now_millis() / 1000;
        let expires_at = token
            .expires_at
            .or_else(|| token.expires_in.map(|secs| now_secs.saturating_add(secs)))
            .unwrap_or(now_secs);

        let session = RemoteSession {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
            user: (&token.user).into(),
        };
        (session, token.user)
    }

    fn store_session(&self, session: Option<RemoteSession>) {
        let result = match &session {
            Some(session) => serde_json::to_string(session)
                .map_err(crate::storage::StorageError::from)
                .and_then(|encoded| self.storage.set_item(SESSION_STORAGE_KEY, &encoded)),
            None => self.storage.remove_item(SESSION_STORAGE_KEY),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist auth session");
        }
        *self.session.write() = session;
    }

    fn announce(&self, event: AuthEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn bearer(&self) -> Option<String> {
        self.session
            .read()
            .as_ref()
            .map(|s| format!("Bearer {}", s.access_token))
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, ProviderError> {
        let request = TransportRequest {
            path: path.to_string(),
            method: HttpMethod::Post,
            body: Some(body),
            ..TransportRequest::default()
        };
        Ok(self.transport.send(&request).await?)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RemoteSession, ProviderError> {
        let response = self
            .post(
                "auth/v1/token?grant_type=refresh_token",
                json!({ "refresh_token": refresh_token }),
            )
            .await?;
        let token: TokenResponse = parse(response)?;
        let (session, user) = self.session_from(token);

        self.store_session(Some(session.clone()));
        self.announce(AuthEvent::TokenRefreshed(user));
        Ok(session)
    }
}

#[async_trait]
impl AuthProvider for RestAuthProvider {
    #[instrument(skip(self, password))]
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<RemoteUser, ProviderError> {
        let response = self
            .post(
                "auth/v1/token?grant_type=password",
                json!({ "email": email, "password": password }),
            )
            .await?;
        let token: TokenResponse = parse(response)?;
        let (session, user) = self.session_from(token);

        self.store_session(Some(session));
        info!(user_id = %user.id, "Signed in");
        self.announce(AuthEvent::SignedIn(user.clone()));
        Ok(user)
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    async fn sign_up(&self, request: &SignUpRequest) -> Result<Option<RemoteUser>, ProviderError> {
        let response = self
            .post(
                "auth/v1/signup",
                json!({
                    "email": request.email,
                    "password": request.password,
                    "data": {
                        "first_name": request.first_name,
                        "last_name": request.last_name,
                        "username": request.username,
                    }
                }),
            )
            .await?;

        // a session comes back only when no email confirmation is required
        if response.get("access_token").is_none() {
            let user: RemoteUser = parse(response)?;
            info!(user_id = %user.id, "Signed up, confirmation pending");
            return Ok(None);
        }

        let token: TokenResponse = parse(response)?;
        let (session, user) = self.session_from(token);
        self.store_session(Some(session));
        info!(user_id = %user.id, "Signed up");
        self.announce(AuthEvent::SignedIn(user.clone()));
        Ok(Some(user))
    }

    #[instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), ProviderError> {
        let bearer = self.bearer();
        self.store_session(None);
        self.announce(AuthEvent::SignedOut);

        let Some(bearer) = bearer else {
            return Ok(());
        };

        let mut request = TransportRequest {
            path: "auth/v1/logout".to_string(),
            method: HttpMethod::Post,
            ..TransportRequest::default()
        };
        request.headers.insert("Authorization".to_string(), bearer);
        self.transport.send(&request).await?;
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<RemoteSession>, ProviderError> {
        let Some(session) = self.current_session() else {
            return Ok(None);
        };

        if !session.expires_within(self.clock.now_millis(), REFRESH_LEEWAY_SECS) {
            return Ok(Some(session));
        }

        debug!("Session about to expire, refreshing");
        match self.refresh(&session.refresh_token).await {
            Ok(session) => Ok(Some(session)),
            Err(e) if e.is_unauthorized() => {
                info!(error = %e, "Refresh token rejected, dropping session");
                self.store_session(None);
                self.announce(AuthEvent::SignedOut);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_current_user(&self) -> Result<Option<RemoteUser>, ProviderError> {
        let Some(session) = self.get_session().await? else {
            return Ok(None);
        };

        let mut request = TransportRequest::get("auth/v1/user");
        request.headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", session.access_token),
        );

        match self.transport.send(&request).await.map_err(ProviderError::from) {
            Ok(response) => parse(response).map(Some),
            Err(e) if e.is_unauthorized() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_profile(&self, user: &RemoteUser) -> Result<Identity, ProviderError> {
        let mut request =
            TransportRequest::get(format!("rest/v1/profiles?id=eq.{}&select=*", user.id));
        if let Some(bearer) = self.bearer() {
            request.headers.insert("Authorization".to_string(), bearer);
        }

        let rows: Vec<ProfileRow> = parse(self.transport.send(&request).await?)?;
        let Some(row) = rows.into_iter().next() else {
            debug!(user_id = %user.id, "No profile row, using account metadata");
            return Ok(user.to_identity());
        };

        let base = user.to_identity();
        Ok(Identity {
            id: user.id,
            email: user.email.clone(),
            first_name: row.first_name.unwrap_or(base.first_name),
            last_name: row.last_name.unwrap_or(base.last_name),
            username: row.username.unwrap_or(base.username),
            avatar_url: row.avatar_url.or(base.avatar_url),
            handicap: row
                .handicap
                .and_then(|h| Handicap::try_from(h).ok())
                .or(base.handicap),
            source: IdentitySource::Remote,
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for RestAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestAuthProvider")
            .field("session", &*self.session.read())
            .finish_non_exhaustive()
    }
}

fn parse<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, ProviderError> {
    serde_json::from_value(value).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

fn load_session(storage: &dyn KeyValueStore) -> Option<RemoteSession> {
    let raw = match storage.get_item(SESSION_STORAGE_KEY) {
        Ok(raw) => raw?,
        Err(e) => {
            warn!(error = %e, "Failed to read persisted auth session");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!(error = %e, "Discarding unreadable auth session");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;

    use parking_lot::Mutex;

    use super::*;
    use crate::clock::ManualClock;
    use crate::fetch::TransportError;
    use crate::storage::MemoryStore;

    const USER_ID: &str = "7f0c0f1e-5d5c-4b43-9d4b-8c1e3d7b2a10";

    /// Transport that records requests and replays canned responses.
    #[derive(Default)]
    struct RecordingTransport {
        responses: Mutex<VecDeque<Result<Value, TransportError>>>,
        requests: Mutex<Vec<TransportRequest>>,
    }

    impl RecordingTransport {
        fn with(responses: Vec<Result<Value, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn paths(&self) -> Vec<String> {
            self.requests.lock().iter().map(|r| r.path.clone()).collect()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, request: &TransportRequest) -> Result<Value, TransportError> {
            self.requests.lock().push(request.clone());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Network("no response".into())))
        }
    }

    fn token(access: &str, expires_in: i64) -> Value {
        json!({
            "access_token": access,
            "refresh_token": format!("{access}-refresh"),
            "expires_in": expires_in,
            "user": { "id": USER_ID, "email": "ben@fairway.golf", "user_metadata": {} }
        })
    }

    fn provider(
        transport: Arc<RecordingTransport>,
        storage: Arc<MemoryStore>,
        clock: &ManualClock,
    ) -> RestAuthProvider {
        RestAuthProvider::new(transport, storage, Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_sign_in_persists_session_and_announces() {
        let transport = RecordingTransport::with(vec![Ok(token("t1", 3600))]);
        let storage = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(1_000_000);
        let provider = provider(transport.clone(), storage.clone(), &clock);
        let mut events = provider.subscribe();

        let user = provider
            .sign_in_with_password("ben@fairway.golf", "pw")
            .await
            .unwrap();

        assert_eq!(user.id.to_string(), USER_ID);
        assert_eq!(transport.paths(), vec!["auth/v1/token?grant_type=password"]);
        assert!(matches!(events.try_recv().unwrap(), AuthEvent::SignedIn(_)));
        assert_eq!(
            load_session(storage.as_ref()).map(|s| s.user.id),
            Some(user.id)
        );

        // a new provider over the same storage picks the session up
        let restored = RestAuthProvider::new(
            RecordingTransport::with(vec![]),
            storage,
            Arc::new(clock.clone()),
        );
        let session = restored.get_session().await.unwrap().unwrap();
        assert_eq!(session.access_token, "t1");
        assert_eq!(session.expires_at, 1_000 + 3_600);
    }

    #[tokio::test]
    async fn test_rejected_sign_in_keeps_no_session() {
        let transport = RecordingTransport::with(vec![Err(TransportError::Status {
            status: 400,
            message: "Invalid login credentials".into(),
        })]);
        let storage = Arc::new(MemoryStore::new());
        let provider = provider(transport, storage.clone(), &ManualClock::new(0));

        let err = provider
            .sign_in_with_password("ben@fairway.golf", "wrong")
            .await
            .unwrap_err();

        assert!(err.is_unauthorized());
        assert!(storage.is_empty());
        assert!(provider.current_session().is_none());
    }

    #[tokio::test]
    async fn test_expiring_session_is_refreshed() {
        let transport =
            RecordingTransport::with(vec![Ok(token("t1", 100)), Ok(token("t2", 3600))]);
        let storage = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(0);
        let provider = provider(transport.clone(), storage, &clock);
        provider.sign_in_with_password("ben@fairway.golf", "pw").await.unwrap();
        let mut events = provider.subscribe();

        clock.advance(std::time::Duration::from_secs(50));
        let session = provider.get_session().await.unwrap().unwrap();

        assert_eq!(session.access_token, "t2");
        assert_eq!(
            transport.paths().last().map(String::as_str),
            Some("auth/v1/token?grant_type=refresh_token")
        );
        assert!(matches!(events.try_recv().unwrap(), AuthEvent::TokenRefreshed(_)));
    }

    #[tokio::test]
    async fn test_rejected_refresh_drops_session() {
        let transport = RecordingTransport::with(vec![
            Ok(token("t1", 10)),
            Err(TransportError::Status {
                status: 400,
                message: "Invalid Refresh Token".into(),
            }),
        ]);
        let storage = Arc::new(MemoryStore::new());
        let provider = provider(transport, storage.clone(), &ManualClock::new(0));
        provider.sign_in_with_password("ben@fairway.golf", "pw").await.unwrap();

        assert!(provider.get_session().await.unwrap().is_none());
        assert!(storage.get_item(SESSION_STORAGE_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_offline_refresh_keeps_session() {
        let transport = RecordingTransport::with(vec![Ok(token("t1", 10))]);
        let storage = Arc::new(MemoryStore::new());
        let provider = provider(transport, storage, &ManualClock::new(0));
        provider.sign_in_with_password("ben@fairway.golf", "pw").await.unwrap();

        let err = provider.get_session().await.unwrap_err();
        assert!(err.is_connectivity_issue());
        assert!(provider.current_session().is_some());
    }

    #[tokio::test]
    async fn test_sign_up_requiring_confirmation() {
        let transport = RecordingTransport::with(vec![Ok(json!({
            "id": USER_ID,
            "email": "new@fairway.golf",
            "user_metadata": { "first_name": "New" }
        }))]);
        let storage = Arc::new(MemoryStore::new());
        let provider = provider(transport.clone(), storage.clone(), &ManualClock::new(0));

        let user = provider
            .sign_up(&SignUpRequest {
                email: "new@fairway.golf".into(),
                password: "pw".into(),
                first_name: "New".into(),
                ..SignUpRequest::default()
            })
            .await
            .unwrap();

        assert!(user.is_none());
        assert!(storage.is_empty());
        let body = transport.requests.lock()[0].body.clone().unwrap();
        assert_eq!(body["data"]["first_name"], "New");
    }

    #[tokio::test]
    async fn test_sign_out_clears_session_even_when_offline() {
        let transport = RecordingTransport::with(vec![Ok(token("t1", 3600))]);
        let storage = Arc::new(MemoryStore::new());
        let provider = provider(transport.clone(), storage.clone(), &ManualClock::new(0));
        provider.sign_in_with_password("ben@fairway.golf", "pw").await.unwrap();

        let err = provider.sign_out().await.unwrap_err();

        assert!(err.is_connectivity_issue());
        assert!(storage.is_empty());
        let logout = transport.requests.lock()[1].clone();
        assert_eq!(logout.path, "auth/v1/logout");
        assert_eq!(logout.headers["Authorization"], "Bearer t1");
    }

    #[tokio::test]
    async fn test_profile_merges_row_over_metadata() {
        let transport = RecordingTransport::with(vec![Ok(json!([{
            "id": USER_ID,
            "first_name": "Ben",
            "last_name": "Hogan",
            "username": "hawk",
            "handicap": -1.5
        }]))]);
        let provider = provider(
            transport.clone(),
            Arc::new(MemoryStore::new()),
            &ManualClock::new(0),
        );
        let user: RemoteUser = serde_json::from_value(json!({
            "id": USER_ID,
            "email": "ben@fairway.golf",
            "user_metadata": { "avatar_url": "https://cdn.fairway.golf/ben.png" }
        }))
        .unwrap();

        let identity = provider.fetch_profile(&user).await.unwrap();

        assert_eq!(identity.username, "hawk");
        assert!(identity.handicap.unwrap().is_plus());
        assert_eq!(
            identity.avatar_url.as_deref(),
            Some("https://cdn.fairway.golf/ben.png")
        );
        assert_eq!(
            transport.paths(),
            vec![format!("rest/v1/profiles?id=eq.{USER_ID}&select=*")]
        );
    }

    #[tokio::test]
    async fn test_missing_profile_uses_metadata() {
        let transport = RecordingTransport::with(vec![Ok(json!([]))]);
        let provider = provider(
            transport,
            Arc::new(MemoryStore::new()),
            &ManualClock::new(0),
        );
        let user: RemoteUser = serde_json::from_value(json!({
            "id": USER_ID,
            "email": "ben@fairway.golf",
            "user_metadata": { "username": "hawk" }
        }))
        .unwrap();

        let identity = provider.fetch_profile(&user).await.unwrap();
        assert_eq!(identity.username, "hawk");
    }
}
