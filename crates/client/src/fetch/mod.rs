//! Resilient fetch cache.
//!
//! [`ResilientFetcher::fetch_resource`] wraps a [`Transport`] call with:
//!
//! - in-flight de-duplication: concurrent calls with the same request key
//!   share one underlying operation and observe the same outcome
//! - a read-through [`CacheStore`] lookup keyed by the cache key
//! - bounded retries with exponential backoff (`base * 2^n`)
//! - a timeout on every attempt (the attempt is dropped, aborting the request)
//!
//! The attempt sequence runs on its own task, so it settles, writes the
//! cache and unregisters itself even if every caller stops waiting.
//!
//! # Example
//!
//! ```rust,ignore
//! let fetcher = ResilientFetcher::new(transport, cache, FetchOptions::default());
//!
//! let courses: Vec<Course> = fetcher
//!     .fetch_resource("rest/v1/courses?select=*", fetcher.options().with_ttl(ONE_HOUR))
//!     .await?;
//! ```

mod error;
mod options;
mod transport;

pub use error::{FetchError, TransportError};
pub use options::FetchOptions;
pub use transport::{HttpMethod, HttpTransport, Transport, TransportRequest};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::cache::CacheStore;

type SharedFetch = Shared<BoxFuture<'static, Result<Value, FetchError>>>;

/// Fetch layer combining caching, de-duplication, retry and timeouts.
///
/// Cheap to clone; clones share the cache and the in-flight registry.
#[derive(Clone)]
pub struct ResilientFetcher {
    inner: Arc<FetcherInner>,
}

struct FetcherInner {
    transport: Arc<dyn Transport>,
    cache: CacheStore,
    defaults: FetchOptions,
    pending: Mutex<HashMap<String, SharedFetch>>,
}

/// Attempt-sequence settings copied out of [`FetchOptions`].
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    timeout: Duration,
}

impl ResilientFetcher {
    /// Create a fetcher.
    ///
    /// `defaults` is what [`options`](Self::options) hands out, typically
    /// built from configuration.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, cache: CacheStore, defaults: FetchOptions) -> Self {
        Self {
            inner: Arc::new(FetcherInner {
                transport,
                cache,
                defaults,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// A copy of the configured default options.
    #[must_use]
    pub fn options(&self) -> FetchOptions {
        self.inner.defaults.clone()
    }

    /// The cache backing this fetcher.
    #[must_use]
    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    /// The transport used for attempts.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Number of requests currently in flight.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Fetch `resource_id` and decode it as `T`.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error once retries are exhausted (or on the
    /// first non-retryable error), or `FetchError::Decode` if the payload is
    /// not a `T`.
    pub async fn fetch_resource<T: DeserializeOwned>(
        &self,
        resource_id: &str,
        options: FetchOptions,
    ) -> Result<T, FetchError> {
        let value = self.fetch_value(resource_id, options).await?;
        serde_json::from_value(value).map_err(|e| FetchError::Decode(e.to_string()))
    }

    /// Fetch `resource_id` as raw JSON.
    ///
    /// # Errors
    ///
    /// See [`fetch_resource`](Self::fetch_resource).
    #[instrument(skip(self, options), fields(resource = %resource_id))]
    pub async fn fetch_value(
        &self,
        resource_id: &str,
        options: FetchOptions,
    ) -> Result<Value, FetchError> {
        let request_key = options.request_key(resource_id);

        let operation = {
            let mut pending = self.inner.pending.lock();

            if options.dedupe
                && let Some(in_flight) = pending.get(&request_key)
            {
                debug!("Joining in-flight request");
                in_flight.clone()
            } else {
                let cache_key = options.effective_cache_key(resource_id);
                if !options.skip_cache
                    && let Some(value) = self.inner.cache.get::<Value>(cache_key)
                {
                    debug!(cache_key = %cache_key, "Cache hit");
                    return Ok(value);
                }

                let operation = self.start(resource_id, &request_key, &options);
                if options.dedupe {
                    pending.insert(request_key, operation.clone());
                }
                operation
            }
        };

        operation.await
    }

    /// Spawn the attempt sequence and return a shareable handle to it.
    ///
    /// Must be called with the pending registry locked so the registration
    /// happens before the task can unregister it.
    fn start(&self, resource_id: &str, request_key: &str, options: &FetchOptions) -> SharedFetch {
        let inner = Arc::clone(&self.inner);
        let request = options.to_request(resource_id);
        let cache_key = options.effective_cache_key(resource_id).to_string();
        let ttl = options.ttl;
        let policy = RetryPolicy {
            max_retries: options.max_retries,
            base_delay: options.retry_base_delay,
            timeout: options.timeout,
        };
        let registration = options.dedupe.then(|| PendingRegistration {
            inner: Arc::clone(&inner),
            request_key: request_key.to_string(),
        });

        debug!(cache_key = %cache_key, "Starting request");
        let task = tokio::spawn(async move {
            // dropped last: the cache is written before the request unregisters
            let _registration = registration;

            let result = run_attempts(inner.transport.as_ref(), &request, policy).await;
            if let Ok(value) = &result {
                // file-backed stores rewrite the whole file on each write
                let cache = inner.cache.clone();
                let value = value.clone();
                let write = tokio::task::spawn_blocking(move || cache.set(&cache_key, &value, ttl));
                if let Err(e) = write.await {
                    warn!(error = %e, "Cache write did not complete");
                }
            }
            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(FetchError::Interrupted(e.to_string())),
            }
        }
        .boxed()
        .shared()
    }
}

impl std::fmt::Debug for ResilientFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientFetcher")
            .field("cache", &self.inner.cache)
            .field("pending", &self.pending_requests())
            .finish_non_exhaustive()
    }
}

/// Removes a request from the in-flight registry when dropped, whether the
/// task settled, panicked or was cancelled.
struct PendingRegistration {
    inner: Arc<FetcherInner>,
    request_key: String,
}

impl Drop for PendingRegistration {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(&self.request_key);
    }
}

/// Run up to `max_retries + 1` attempts, each bounded by `timeout`.
async fn run_attempts(
    transport: &dyn Transport,
    request: &TransportRequest,
    policy: RetryPolicy,
) -> Result<Value, FetchError> {
    let total_attempts = policy.max_retries.saturating_add(1);
    let mut attempt: u32 = 0;

    loop {
        let error = match tokio::time::timeout(policy.timeout, transport.send(request)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => FetchError::Transport(e),
            Err(_) => FetchError::TimedOut {
                after_ms: u64::try_from(policy.timeout.as_millis()).unwrap_or(u64::MAX),
            },
        };

        attempt += 1;
        if attempt >= total_attempts || !error.is_retryable() {
            warn!(attempts = attempt, error = %error, "Request failed");
            return Err(error);
        }

        let delay = backoff_delay(policy.base_delay, attempt - 1);
        debug!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "Attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Delay before retry number `retry_index` (0-based): `base * 2^retry_index`.
fn backoff_delay(base: Duration, retry_index: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(retry_index))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::cache::CachePolicy;
    use crate::clock::ManualClock;
    use crate::storage::{FileStore, KeyValueStore, MemoryStore};

    /// Transport replaying scripted outcomes after a fixed latency.
    struct ScriptedTransport {
        latency: Duration,
        script: Mutex<VecDeque<Result<Value, TransportError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(latency: Duration, script: Vec<Result<Value, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                latency,
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _request: &TransportRequest) -> Result<Value, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Network("script exhausted".into())))
        }
    }

    fn fetcher(transport: Arc<ScriptedTransport>) -> (ResilientFetcher, ManualClock) {
        let clock = ManualClock::new(0);
        let cache = CacheStore::new(
            Arc::new(MemoryStore::new()),
            Arc::new(clock.clone()),
            CachePolicy::default(),
        );
        (
            ResilientFetcher::new(transport, cache, FetchOptions::default()),
            clock,
        )
    }

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(300);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(300));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(600));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(1200));
    }

    #[test]
    fn test_backoff_saturates() {
        assert_eq!(
            backoff_delay(Duration::from_secs(u64::MAX / 2), 40),
            Duration::MAX
        );
    }

    #[tokio::test]
    async fn test_file_backed_result_is_on_disk_when_fetch_returns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        let clock = ManualClock::new(0);
        let cache = CacheStore::new(
            Arc::new(FileStore::open(&path, None).unwrap()),
            Arc::new(clock),
            CachePolicy::default(),
        );
        let transport =
            ScriptedTransport::new(Duration::ZERO, vec![Ok(json!(["Pebble Beach"]))]);
        let fetcher = ResilientFetcher::new(transport, cache, FetchOptions::default());

        fetcher.fetch_value("courses", FetchOptions::new()).await.unwrap();

        let reopened = FileStore::open(&path, None).unwrap();
        assert!(
            reopened
                .get_item("fairway_cache_v1_courses")
                .unwrap()
                .is_some_and(|raw| raw.contains("Pebble Beach"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_is_cached_and_registry_is_empty() {
        let transport = ScriptedTransport::new(Duration::from_millis(50), vec![Ok(json!([1, 2]))]);
        let (fetcher, _) = fetcher(transport.clone());

        let first: Vec<u32> = fetcher.fetch_resource("courses", FetchOptions::new()).await.unwrap();
        let second: Vec<u32> = fetcher
            .fetch_resource("courses", FetchOptions::new())
            .await
            .unwrap();

        assert_eq!(first, vec![1, 2]);
        assert_eq!(second, first);
        assert_eq!(transport.calls(), 1);
        assert_eq!(fetcher.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_cache_refetches() {
        let transport = ScriptedTransport::new(
            Duration::from_millis(1),
            vec![Ok(json!(1)), Ok(json!(2))],
        );
        let (fetcher, _) = fetcher(transport.clone());

        let _: u32 = fetcher.fetch_resource("n", FetchOptions::new()).await.unwrap();
        let fresh: u32 = fetcher
            .fetch_resource("n", FetchOptions::new().with_skip_cache(true))
            .await
            .unwrap();

        assert_eq!(fresh, 2);
        assert_eq!(transport.calls(), 2);
        // the refreshed value replaced the cached one
        assert_eq!(fetcher.cache().get::<u32>("n"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_key_override() {
        let transport = ScriptedTransport::new(Duration::from_millis(1), vec![Ok(json!("feed"))]);
        let (fetcher, _) = fetcher(transport);

        let _: String = fetcher
            .fetch_resource(
                "rest/v1/posts",
                FetchOptions::new().with_cache_key("feed:home"),
            )
            .await
            .unwrap();

        assert_eq!(
            fetcher.cache().get::<String>("feed:home").as_deref(),
            Some("feed")
        );
        assert_eq!(fetcher.cache().get::<String>("rest/v1/posts"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_immediately() {
        let transport = ScriptedTransport::new(
            Duration::from_millis(1),
            vec![Err(TransportError::Status {
                status: 401,
                message: "JWT expired".into(),
            })],
        );
        let (fetcher, _) = fetcher(transport.clone());

        let err = fetcher
            .fetch_resource::<Value>("profile", FetchOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FetchError::Transport(TransportError::Status { status: 401, .. })
        ));
        assert_eq!(transport.calls(), 1);
        assert_eq!(fetcher.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retried() {
        let transport = ScriptedTransport::new(
            Duration::from_secs(30),
            vec![Ok(json!(1)), Ok(json!(2)), Ok(json!(3))],
        );
        let (fetcher, _) = fetcher(transport.clone());

        let err = fetcher
            .fetch_resource::<u32>(
                "slow",
                FetchOptions::new().with_timeout(Duration::from_secs(1)),
            )
            .await
            .unwrap_err();

        assert_eq!(err, FetchError::TimedOut { after_ms: 1_000 });
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_error_does_not_poison_cache() {
        let transport = ScriptedTransport::new(Duration::from_millis(1), vec![Ok(json!({"a": 1}))]);
        let (fetcher, _) = fetcher(transport);

        let err = fetcher
            .fetch_resource::<Vec<u32>>("weird", FetchOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));

        // the raw payload was valid JSON and stays cached for other readers
        let raw: Value = fetcher.fetch_resource("weird", FetchOptions::new()).await.unwrap();
        assert_eq!(raw, json!({"a": 1}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_dedupe_requests_are_independent() {
        let transport = ScriptedTransport::new(
            Duration::from_millis(100),
            vec![Ok(json!(1)), Ok(json!(2))],
        );
        let (fetcher, _) = fetcher(transport.clone());
        let options = FetchOptions::new().with_dedupe(false);

        let (a, b) = tokio::join!(
            fetcher.fetch_resource::<u32>("n", options.clone()),
            fetcher.fetch_resource::<u32>("n", options),
        );

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_still_settles_and_unregisters() {
        let transport = ScriptedTransport::new(Duration::from_millis(200), vec![Ok(json!(7))]);
        let (fetcher, _) = fetcher(transport.clone());

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            fetcher.fetch_resource::<u32>("n", FetchOptions::new()),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(fetcher.pending_requests(), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fetcher.pending_requests(), 0);
        assert_eq!(fetcher.cache().get::<u32>("n"), Some(7));
        assert_eq!(transport.calls(), 1);
    }
}
