//! In-process storage backend.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::{KeyValueStore, StorageError, check_capacity, usage_of};

/// Key-value store held entirely in memory.
///
/// Optionally capacity-bounded, which makes it the natural stand-in for a
/// quota-limited browser store in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
    capacity: Option<usize>,
}

impl MemoryStore {
    /// Create an unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes beyond `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            capacity: Some(capacity),
        }
    }

    /// Bytes currently used by keys and values.
    #[must_use]
    pub fn usage_bytes(&self) -> usize {
        usage_of(&self.entries.read())
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write();
        check_capacity(&entries, self.capacity, key, value)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}
