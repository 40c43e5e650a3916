//! Durable client key-value storage.
//!
//! # Architecture
//!
//! - [`KeyValueStore`] is a synchronous, string-keyed store with a finite
//!   capacity that may reject writes, mirroring browser local storage
//! - [`MemoryStore`] keeps everything in process (tests, ephemeral sessions)
//! - [`FileStore`] persists the whole map to a JSON file on every mutation
//!
//! Both backends count capacity as the byte length of every key plus value.
//! A write that would push usage past the capacity fails with
//! [`StorageError::QuotaExceeded`] and leaves the store untouched.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::collections::BTreeMap;

use thiserror::Error;

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The write would exceed the store's capacity.
    #[error("storage quota exceeded: {requested} bytes requested, capacity is {capacity}")]
    QuotaExceeded {
        /// Usage in bytes the write would have produced.
        requested: usize,
        /// Configured capacity in bytes.
        capacity: usize,
    },

    /// Reading or writing the backing file failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file could not be encoded.
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether this error means the store is full.
    #[must_use]
    pub const fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

/// A synchronous string key-value store with finite capacity.
///
/// Implementations must be safe to share across tasks; every call completes
/// before returning, so callers never observe a torn write.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::QuotaExceeded` if the write does not fit.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a value. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// List every key currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// Bytes used by a map of entries.
fn usage_of(entries: &BTreeMap<String, String>) -> usize {
    entries.iter().map(|(k, v)| k.len() + v.len()).sum()
}

/// Check that replacing `key` with `value` stays within `capacity`.
fn check_capacity(
    entries: &BTreeMap<String, String>,
    capacity: Option<usize>,
    key: &str,
    value: &str,
) -> Result<(), StorageError> {
    let Some(capacity) = capacity else {
        return Ok(());
    };

    let current = usage_of(entries);
    let replaced = entries.get(key).map_or(0, |old| key.len() + old.len());
    let requested = current - replaced + key.len() + value.len();

    if requested > capacity {
        return Err(StorageError::QuotaExceeded {
            requested,
            capacity,
        });
    }
    Ok(())
}
