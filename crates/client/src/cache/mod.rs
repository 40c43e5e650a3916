//! Namespaced, expiring cache over a [`KeyValueStore`].
//!
//! # Behaviour
//!
//! - Every entry key is prefixed with the configured namespace, so bumping
//!   the namespace (e.g. `fairway_cache_v1_` -> `fairway_cache_v2_`) retires
//!   old payload schemas without a migration
//! - Expired or undecodable entries are deleted when read (lazy expiration)
//! - A write rejected for capacity evicts the oldest share of this
//!   namespace's entries and is retried exactly once
//! - Storage errors are logged and swallowed: the cache is best-effort and
//!   degrades to a no-op instead of failing the caller
//!
//! # Example
//!
//! ```rust,ignore
//! let cache = CacheStore::new(storage, Arc::new(SystemClock), CachePolicy::default());
//!
//! cache.set("courses", &courses, Duration::from_secs(1800));
//! let cached: Option<Vec<Course>> = cache.get("courses");
//! ```

mod entry;

pub use entry::CacheEntry;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::storage::{KeyValueStore, StorageError};

use entry::EntryHeader;

/// Eviction and namespacing policy for a [`CacheStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    /// Prefix applied to every cache key in the backing store.
    pub namespace: String,
    /// Maintenance trims the namespace once it holds more than this many entries.
    pub soft_limit: usize,
    /// Entry count maintenance trims down to.
    pub target_entries: usize,
    /// Share of the namespace (percent, rounded up, at least one entry)
    /// evicted when a write hits the capacity limit.
    pub evict_percent: u8,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            namespace: "fairway_cache_v1_".to_string(),
            soft_limit: 50,
            target_entries: 30,
            evict_percent: 20,
        }
    }
}

/// Outcome of a maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Expired or unparseable entries deleted.
    pub expired_removed: usize,
    /// Valid entries deleted to get back under the soft limit.
    pub overflow_removed: usize,
    /// Entries left in the namespace.
    pub remaining: usize,
}

/// Expiring, namespaced cache.
///
/// Cheap to clone; clones share the backing store.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<CacheStoreInner>,
}

struct CacheStoreInner {
    backend: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    policy: CachePolicy,
}

impl CacheStore {
    /// Create a cache over `backend`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            inner: Arc::new(CacheStoreInner {
                backend,
                clock,
                policy,
            }),
        }
    }

    /// The active policy.
    #[must_use]
    pub fn policy(&self) -> &CachePolicy {
        &self.inner.policy
    }

    /// Current time according to the cache's clock.
    #[must_use]
    pub fn now_millis(&self) -> i64 {
        self.inner.clock.now_millis()
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{key}", self.inner.policy.namespace)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a valid cached value.
    ///
    /// Returns `None` when the entry is missing, expired or cannot be decoded
    /// as `T`; the latter two are deleted as a side effect.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_entry(key).map(|entry| entry.payload)
    }

    /// Get a valid cached entry with its timestamps.
    #[must_use]
    pub fn get_entry<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let storage_key = self.storage_key(key);

        let raw = match self.inner.backend.get_item(&storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed");
                return None;
            }
        };

        let entry = match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "Dropping corrupt cache entry");
                self.delete_storage_key(&storage_key);
                return None;
            }
        };

        if !entry.is_valid_at(self.now_millis()) {
            debug!(key = %key, "Cache entry expired");
            self.delete_storage_key(&storage_key);
            return None;
        }

        Some(entry)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store a value for `ttl`.
    ///
    /// If the store is full, the oldest share of this namespace is evicted
    /// and the write retried once; if it still fails it is dropped.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let entry = CacheEntry {
            key: key.to_string(),
            payload: value,
            stored_at: self.now_millis(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        };

        let encoded = match serde_json::to_string(&entry) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache entry could not be serialized");
                return;
            }
        };

        let storage_key = self.storage_key(key);
        match self.inner.backend.set_item(&storage_key, &encoded) {
            Ok(()) => {}
            Err(e) if e.is_quota_exceeded() => {
                let evicted = self.evict_oldest();
                debug!(key = %key, evicted, "Cache full, evicted oldest entries");
                if let Err(e) = self.inner.backend.set_item(&storage_key, &encoded) {
                    warn!(key = %key, error = %e, "Cache write dropped after eviction");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "Cache write failed"),
        }
    }

    /// Delete a single entry. Deleting a missing entry is a no-op.
    pub fn remove(&self, key: &str) {
        self.delete_storage_key(&self.storage_key(key));
    }

    /// Delete every entry in this namespace.
    pub fn clear(&self) {
        let keys = self.namespace_keys();
        let count = keys.len();
        for storage_key in keys {
            self.delete_storage_key(&storage_key);
        }
        debug!(count, "Cleared cache namespace");
    }

    /// Delete every entry whose key starts with `prefix`.
    ///
    /// Returns the number of entries deleted.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let full_prefix = self.storage_key(prefix);
        let keys: Vec<String> = self
            .namespace_keys()
            .into_iter()
            .filter(|k| k.starts_with(&full_prefix))
            .collect();
        let count = keys.len();
        for storage_key in keys {
            self.delete_storage_key(&storage_key);
        }
        count
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Sweep expired and corrupt entries, then trim to the target size if the
    /// namespace is over the soft limit (oldest first).
    #[instrument(skip(self), fields(namespace = %self.inner.policy.namespace))]
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let now = self.now_millis();
        let mut report = MaintenanceReport::default();
        let mut live = Vec::new();

        for (storage_key, header) in self.namespace_headers() {
            match header {
                Some(header) if header.is_valid_at(now) => {
                    live.push((storage_key, header.stored_at));
                }
                _ => {
                    self.delete_storage_key(&storage_key);
                    report.expired_removed += 1;
                }
            }
        }

        let policy = &self.inner.policy;
        if live.len() > policy.soft_limit {
            live.sort_by_key(|(_, stored_at)| *stored_at);
            let excess = live.len().saturating_sub(policy.target_entries);
            for (storage_key, _) in live.drain(..excess) {
                self.delete_storage_key(&storage_key);
                report.overflow_removed += 1;
            }
        }

        report.remaining = live.len();
        info!(
            expired_removed = report.expired_removed,
            overflow_removed = report.overflow_removed,
            remaining = report.remaining,
            "Cache maintenance complete"
        );
        report
    }

    /// Run maintenance now and then every `interval` on the current runtime.
    ///
    /// Abort the returned handle to stop it.
    #[must_use]
    pub fn spawn_maintenance(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                // first tick completes immediately
                ticker.tick().await;
                cache.run_maintenance();
            }
        })
    }

    /// Evict the oldest `evict_percent` of the namespace; corrupt entries go first.
    fn evict_oldest(&self) -> usize {
        let mut entries: Vec<(String, i64)> = self
            .namespace_headers()
            .into_iter()
            .map(|(k, header)| (k, header.map_or(i64::MIN, |h| h.stored_at)))
            .collect();

        if entries.is_empty() {
            return 0;
        }

        entries.sort_by_key(|(_, stored_at)| *stored_at);
        let count = eviction_count(entries.len(), self.inner.policy.evict_percent);
        for (storage_key, _) in entries.iter().take(count) {
            self.delete_storage_key(storage_key);
        }
        count
    }

    fn namespace_keys(&self) -> Vec<String> {
        match self.inner.backend.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter(|k| k.starts_with(&self.inner.policy.namespace))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Cache key listing failed");
                Vec::new()
            }
        }
    }

    /// Namespace keys with their parsed timestamps (`None` if unreadable).
    fn namespace_headers(&self) -> Vec<(String, Option<EntryHeader>)> {
        self.namespace_keys()
            .into_iter()
            .map(|storage_key| {
                let header = self
                    .inner
                    .backend
                    .get_item(&storage_key)
                    .ok()
                    .flatten()
                    .and_then(|raw| serde_json::from_str::<EntryHeader>(&raw).ok());
                (storage_key, header)
            })
            .collect()
    }

    fn delete_storage_key(&self, storage_key: &str) {
        if let Err(e) = self.inner.backend.remove_item(storage_key) {
            log_storage_error("remove", storage_key, &e);
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

fn log_storage_error(operation: &str, storage_key: &str, error: &StorageError) {
    warn!(operation, key = %storage_key, error = %error, "Cache storage error");
}

/// `ceil(len * percent / 100)`, at least one.
fn eviction_count(len: usize, percent: u8) -> usize {
    let percent = usize::from(percent.min(100));
    (len * percent).div_ceil(100).max(1).min(len)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;

    fn cache_with(store: Arc<MemoryStore>, clock: &ManualClock, policy: CachePolicy) -> CacheStore {
        CacheStore::new(store, Arc::new(clock.clone()), policy)
    }

    fn cache() -> (CacheStore, Arc<MemoryStore>, ManualClock) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(1_000_000);
        let cache = cache_with(store.clone(), &clock, CachePolicy::default());
        (cache, store, clock)
    }

    #[test]
    fn test_get_returns_value_within_ttl() {
        let (cache, _, clock) = cache();
        cache.set("courses", &vec!["Pine Valley"], Duration::from_secs(1));

        clock.advance(Duration::from_millis(500));
        let value: Option<Vec<String>> = cache.get("courses");
        assert_eq!(value, Some(vec!["Pine Valley".to_string()]));
    }

    #[test]
    fn test_expired_entry_is_deleted_on_read() {
        let (cache, store, clock) = cache();
        cache.set("courses", &1, Duration::from_secs(1));

        clock.advance(Duration::from_millis(1_000));
        assert_eq!(cache.get::<i32>("courses"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_entry_is_deleted_on_read() {
        let (cache, store, _) = cache();
        store.set_item("fairway_cache_v1_bad", "{not json").unwrap();

        assert_eq!(cache.get::<i32>("bad"), None);
        assert!(store.get_item("fairway_cache_v1_bad").unwrap().is_none());
    }

    #[test]
    fn test_wrong_payload_type_is_treated_as_corrupt() {
        let (cache, store, _) = cache();
        cache.set("feed", &"text", Duration::from_secs(60));

        assert_eq!(cache.get::<Vec<u32>>("feed"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_entries_are_namespaced() {
        let (cache, store, _) = cache();
        cache.set("news", &1, Duration::from_secs(60));
        assert!(store.get_item("fairway_cache_v1_news").unwrap().is_some());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (cache, _, _) = cache();
        cache.set("news", &1, Duration::from_secs(60));
        cache.remove("news");
        cache.remove("news");
        assert_eq!(cache.get::<i32>("news"), None);
    }

    #[test]
    fn test_clear_only_touches_namespace() {
        let (cache, store, _) = cache();
        store.set_item("fairway_auth_fallback_user", "{}").unwrap();
        cache.set("a", &1, Duration::from_secs(60));
        cache.set("b", &2, Duration::from_secs(60));

        cache.clear();
        assert_eq!(
            store.keys().unwrap(),
            vec!["fairway_auth_fallback_user".to_string()]
        );
    }

    #[test]
    fn test_invalidate_prefix() {
        let (cache, _, _) = cache();
        cache.set("rest/v1/courses?select=*", &1, Duration::from_secs(60));
        cache.set("rest/v1/courses?id=eq.1", &2, Duration::from_secs(60));
        cache.set("rest/v1/posts?select=*", &3, Duration::from_secs(60));

        assert_eq!(cache.invalidate_prefix("rest/v1/courses"), 2);
        assert_eq!(cache.get::<i32>("rest/v1/posts?select=*"), Some(3));
    }

    #[test]
    fn test_quota_evicts_oldest_share_and_retries() {
        let store = Arc::new(MemoryStore::new());
        // fixed-width timestamps keep every entry the same size
        let clock = ManualClock::new(1_000_000);
        let sizing = cache_with(store.clone(), &clock, CachePolicy::default());

        // measure one entry so the capacity holds exactly ten
        sizing.set("k0", &"x", Duration::from_secs(600));
        let entry_size = store.usage_bytes();
        sizing.clear();

        let bounded = Arc::new(MemoryStore::with_capacity(entry_size * 10));
        let cache = cache_with(bounded.clone(), &clock, CachePolicy::default());
        for i in 0..10 {
            cache.set(&format!("k{i}"), &"x", Duration::from_secs(600));
            clock.advance(Duration::from_millis(10));
        }
        assert_eq!(bounded.len(), 10);

        cache.set("k_new", &"x", Duration::from_secs(600));

        // 20% of 10 evicted, then the write fits
        assert_eq!(cache.get::<String>("k0"), None);
        assert_eq!(cache.get::<String>("k1"), None);
        assert_eq!(cache.get::<String>("k2").as_deref(), Some("x"));
        assert_eq!(cache.get::<String>("k_new").as_deref(), Some("x"));
        assert_eq!(bounded.len(), 9);
    }

    #[test]
    fn test_write_dropped_when_eviction_is_not_enough() {
        let store = Arc::new(MemoryStore::with_capacity(16));
        let clock = ManualClock::new(0);
        let cache = cache_with(store.clone(), &clock, CachePolicy::default());

        cache.set("huge", &"x".repeat(100), Duration::from_secs(60));
        assert!(store.is_empty());
    }

    #[test]
    fn test_maintenance_removes_expired_and_corrupt() {
        let (cache, store, clock) = cache();
        cache.set("short", &1, Duration::from_secs(1));
        cache.set("long", &2, Duration::from_secs(60));
        store.set_item("fairway_cache_v1_junk", "garbage").unwrap();
        store.set_item("other_app_key", "garbage").unwrap();

        clock.advance(Duration::from_secs(2));
        let report = cache.run_maintenance();

        assert_eq!(report.expired_removed, 2);
        assert_eq!(report.overflow_removed, 0);
        assert_eq!(report.remaining, 1);
        assert!(store.get_item("other_app_key").unwrap().is_some());
    }

    #[test]
    fn test_maintenance_trims_to_target_oldest_first() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(0);
        let policy = CachePolicy {
            soft_limit: 5,
            target_entries: 3,
            ..CachePolicy::default()
        };
        let cache = cache_with(store, &clock, policy);

        for i in 0..6 {
            cache.set(&format!("k{i}"), &i, Duration::from_secs(600));
            clock.advance(Duration::from_millis(1));
        }

        let report = cache.run_maintenance();
        assert_eq!(report.overflow_removed, 3);
        assert_eq!(report.remaining, 3);
        assert_eq!(cache.get::<i32>("k2"), None);
        assert_eq!(cache.get::<i32>("k3"), Some(3));
    }

    #[test]
    fn test_maintenance_under_soft_limit_keeps_everything() {
        let (cache, _, _) = cache();
        for i in 0..10 {
            cache.set(&format!("k{i}"), &i, Duration::from_secs(600));
        }
        let report = cache.run_maintenance();
        assert_eq!(report.remaining, 10);
        assert_eq!(report.overflow_removed, 0);
    }

    #[test]
    fn test_eviction_count() {
        assert_eq!(eviction_count(10, 20), 2);
        assert_eq!(eviction_count(11, 20), 3);
        assert_eq!(eviction_count(1, 20), 1);
        assert_eq!(eviction_count(3, 0), 1);
        assert_eq!(eviction_count(3, 200), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_maintenance_runs_immediately() {
        let (cache, store, clock) = cache();
        cache.set("short", &1, Duration::from_secs(1));
        clock.advance(Duration::from_secs(2));

        let handle = cache.spawn_maintenance(Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_millis(1)).await;
        handle.abort();

        assert!(store.is_empty());
    }
}
