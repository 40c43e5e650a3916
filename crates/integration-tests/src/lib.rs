//! Integration tests for the Fairway client.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p fairway-integration-tests
//! ```
//!
//! Everything runs in-process: [`ScriptedTransport`] stands in for the
//! resource API and [`FakeAuthBackend`] for the auth and profile endpoints,
//! so no network is needed. Time-sensitive tests run on a paused tokio clock
//! and drive cache expiry with a [`ManualClock`].
//!
//! # Test Categories
//!
//! - `fetch_cache` - de-duplication, cache short-circuit, retries
//! - `auth_fallback` - demo account fallback, restore and sign-out
//! - `cache_eviction` - quota recovery and maintenance
//! - `client` - the wired client bundle and data client

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fairway_client::auth::FallbackConfig;
use fairway_client::cache::{CachePolicy, CacheStore};
use fairway_client::clock::ManualClock;
use fairway_client::fetch::{
    FetchOptions, HttpMethod, ResilientFetcher, Transport, TransportError, TransportRequest,
};
use fairway_client::storage::KeyValueStore;
use fairway_core::{Email, Identity, IdentitySource, UserId};
use parking_lot::Mutex;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::time::Instant;

/// Start time for manual clocks; keeps timestamps a fixed width.
pub const CLOCK_START_MILLIS: i64 = 1_000_000;

/// Password shared by the demo accounts.
pub const DEMO_PASSWORD: &str = "demo123";

/// Allow-listed demo account.
pub const DEMO_EMAIL: &str = "demo@fairway.golf";

// =============================================================================
// Resource transport
// =============================================================================

/// Transport answering from a script, then with a fixed default.
pub struct ScriptedTransport {
    latency: Duration,
    script: Mutex<VecDeque<Result<Value, TransportError>>>,
    default: Result<Value, TransportError>,
    calls: Mutex<Vec<(Instant, TransportRequest)>>,
}

impl ScriptedTransport {
    /// Answer every request with `default` after `latency`.
    pub fn new(latency: Duration, default: Result<Value, TransportError>) -> Arc<Self> {
        Self::scripted(latency, Vec::new(), default)
    }

    /// Answer the first requests from `script`, then with `default`.
    pub fn scripted(
        latency: Duration,
        script: Vec<Result<Value, TransportError>>,
        default: Result<Value, TransportError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            latency,
            script: Mutex::new(script.into()),
            default,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Number of requests received.
    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// When each request was received.
    pub fn call_instants(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(at, _)| *at).collect()
    }

    /// The requests received, in order.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.calls.lock().iter().map(|(_, r)| r.clone()).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &TransportRequest) -> Result<Value, TransportError> {
        self.calls.lock().push((Instant::now(), request.clone()));
        tokio::time::sleep(self.latency).await;
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

/// Cache over `store` with the default policy, timed by `clock`.
pub fn cache_over(store: Arc<dyn KeyValueStore>, clock: &ManualClock) -> CacheStore {
    CacheStore::new(store, Arc::new(clock.clone()), CachePolicy::default())
}

/// Fetcher over `transport` with a fresh in-memory cache.
pub fn fetcher(transport: Arc<dyn Transport>) -> (ResilientFetcher, ManualClock) {
    let clock = ManualClock::new(CLOCK_START_MILLIS);
    let store = Arc::new(fairway_client::storage::MemoryStore::new());
    let fetcher = ResilientFetcher::new(
        transport,
        cache_over(store, &clock),
        FetchOptions::default(),
    );
    (fetcher, clock)
}

// =============================================================================
// Auth backend
// =============================================================================

/// How the fake auth backend responds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Online,
    /// Every request fails as if the host were unreachable.
    Offline,
    /// Requests never complete.
    Hanging,
}

struct Account {
    id: UserId,
    password: String,
    metadata: Value,
}

/// In-process stand-in for the auth and profile endpoints, plus a
/// `check_ins` collection scoped to the caller's token.
pub struct FakeAuthBackend {
    mode: Mutex<BackendMode>,
    accounts: Mutex<HashMap<String, Account>>,
    token_requests: AtomicUsize,
    requests: Mutex<Vec<TransportRequest>>,
}

impl FakeAuthBackend {
    pub fn new(mode: BackendMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            accounts: Mutex::new(HashMap::new()),
            token_requests: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn set_mode(&self, mode: BackendMode) {
        *self.mode.lock() = mode;
    }

    /// Register an account; returns its id.
    pub fn register(&self, email: &str, password: &str, first_name: &str) -> UserId {
        let id = UserId::random();
        self.accounts.lock().insert(
            email.to_lowercase(),
            Account {
                id,
                password: password.to_string(),
                metadata: json!({ "first_name": first_name }),
            },
        );
        id
    }

    /// Number of password sign-in attempts that reached the backend.
    pub fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }

    /// Paths of every request received.
    pub fn paths(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.path.clone()).collect()
    }

    fn token(&self, email: &str, password: &str) -> Result<Value, TransportError> {
        let accounts = self.accounts.lock();
        let account = accounts
            .get(&email.to_lowercase())
            .filter(|account| account.password == password)
            .ok_or_else(|| TransportError::Status {
                status: 400,
                message: "Invalid login credentials".to_string(),
            })?;

        Ok(json!({
            "access_token": format!("access-{}", account.id),
            "refresh_token": format!("refresh-{}", account.id),
            "expires_in": 3600,
            "user": {
                "id": account.id,
                "email": email,
                "user_metadata": account.metadata,
            }
        }))
    }
}

#[async_trait]
impl Transport for FakeAuthBackend {
    async fn send(&self, request: &TransportRequest) -> Result<Value, TransportError> {
        self.requests.lock().push(request.clone());
        let is_token = request.path.starts_with("auth/v1/token?grant_type=password");
        if is_token {
            self.token_requests.fetch_add(1, Ordering::SeqCst);
        }

        let mode = *self.mode.lock();
        match mode {
            BackendMode::Online => {}
            BackendMode::Offline => {
                return Err(TransportError::Network(
                    "error sending request: Failed to fetch".to_string(),
                ));
            }
            BackendMode::Hanging => std::future::pending().await,
        }

        let body = request.body.clone().unwrap_or(Value::Null);
        let field = |name: &str| {
            body.get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        match (request.method, request.path.as_str()) {
            (HttpMethod::Post, _) if is_token => self.token(&field("email"), &field("password")),
            (HttpMethod::Post, "auth/v1/logout") => Ok(Value::Null),
            (HttpMethod::Get, path) if path.starts_with("rest/v1/profiles?") => Ok(json!([])),
            // row-level security: each caller sees only rows it owns
            (HttpMethod::Get, path) if path.starts_with("rest/v1/check_ins?") => {
                let owner = request
                    .headers
                    .get("Authorization")
                    .map_or("anon", String::as_str);
                Ok(json!([{ "owner": owner }]))
            }
            _ => Err(TransportError::Status {
                status: 404,
                message: format!("no route for {}", request.path),
            }),
        }
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// The demo allow-list used across tests.
pub fn demo_accounts() -> FallbackConfig {
    FallbackConfig::new(
        SecretString::from(DEMO_PASSWORD),
        vec![demo_identity()],
    )
}

/// The identity behind [`DEMO_EMAIL`].
pub fn demo_identity() -> Identity {
    Identity {
        id: UserId::new(uuid::Uuid::from_u128(0x5eed)),
        email: Email::parse(DEMO_EMAIL).unwrap(),
        first_name: "Demo".to_string(),
        last_name: "Golfer".to_string(),
        username: "demo".to_string(),
        avatar_url: None,
        handicap: None,
        source: IdentitySource::Fallback,
    }
}
