//! Stored cache entry format.

use serde::{Deserialize, Serialize};

/// A cached payload with its write time and validity window.
///
/// An entry is valid while `now - stored_at < ttl_ms`; invalid entries are
/// treated as absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// Unnamespaced cache key.
    pub key: String,
    /// Cached value.
    pub payload: T,
    /// Milliseconds since the Unix epoch when the entry was written.
    pub stored_at: i64,
    /// Validity window in milliseconds.
    pub ttl_ms: u64,
}

impl<T> CacheEntry<T> {
    /// Whether the entry is still valid at `now_millis`.
    #[must_use]
    pub fn is_valid_at(&self, now_millis: i64) -> bool {
        is_valid(self.stored_at, self.ttl_ms, now_millis)
    }

    /// Milliseconds since the entry was written (zero if written "in the future").
    #[must_use]
    pub fn age_ms(&self, now_millis: i64) -> u64 {
        u64::try_from(now_millis.saturating_sub(self.stored_at)).unwrap_or(0)
    }
}

/// Timestamp fields only, for sweeping without decoding payloads.
#[derive(Debug, Clone, Copy, Deserialize)]
pub(super) struct EntryHeader {
    pub stored_at: i64,
    pub ttl_ms: u64,
}

impl EntryHeader {
    pub(super) fn is_valid_at(&self, now_millis: i64) -> bool {
        is_valid(self.stored_at, self.ttl_ms, now_millis)
    }
}

fn is_valid(stored_at: i64, ttl_ms: u64, now_millis: i64) -> bool {
    let age = i128::from(now_millis) - i128::from(stored_at);
    age < i128::from(ttl_ms)
}
