//! Demo-account fallback: the allow-list and the persisted fallback identity.

use std::path::Path;
use std::sync::Arc;

use fairway_core::{Identity, IdentitySource};
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::storage::{KeyValueStore, StorageError};

/// Storage key of the persisted fallback identity.
pub const FALLBACK_USER_KEY: &str = "fairway_auth_fallback_user";

/// Storage key of the "signed in" marker.
pub const AUTHENTICATED_KEY: &str = "fairway_auth_authenticated";

/// Allow-list of demo accounts that may sign in while the provider is
/// unreachable.
///
/// All accounts share one password.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    password: SecretString,
    accounts: Vec<Identity>,
}

/// Errors loading a demo account file.
#[derive(Debug, thiserror::Error)]
pub enum FallbackLoadError {
    #[error("failed to read demo accounts: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid demo accounts file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl FallbackConfig {
    /// Create an allow-list.
    #[must_use]
    pub fn new(password: SecretString, accounts: Vec<Identity>) -> Self {
        Self { password, accounts }
    }

    /// Load the accounts from a JSON array of identities.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path, password: SecretString) -> Result<Self, FallbackLoadError> {
        let raw = std::fs::read_to_string(path)?;
        let accounts: Vec<Identity> = serde_json::from_str(&raw)?;
        Ok(Self::new(password, accounts))
    }

    /// The allow-listed identities.
    #[must_use]
    pub fn accounts(&self) -> &[Identity] {
        &self.accounts
    }

    /// The fallback identity for these credentials, if they are allow-listed.
    ///
    /// Emails compare case-insensitively; the password must match exactly.
    #[must_use]
    pub fn matching(&self, email: &str, password: &str) -> Option<Identity> {
        if password != self.password.expose_secret() {
            return None;
        }
        self.accounts
            .iter()
            .find(|account| account.email.matches(email))
            .map(|account| account.clone().with_source(IdentitySource::Fallback))
    }
}

/// Reads and writes the persisted fallback identity.
#[derive(Clone)]
pub(crate) struct FallbackStore {
    storage: Arc<dyn KeyValueStore>,
}

impl FallbackStore {
    pub(crate) fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    /// The persisted identity, if the signed-in marker is also present.
    ///
    /// An identity without the marker, or one that cannot be decoded, is stale
    /// and gets removed.
    pub(crate) fn load(&self) -> Option<Identity> {
        let raw = self.read(FALLBACK_USER_KEY)?;
        let marked = self.read(AUTHENTICATED_KEY).is_some_and(|v| v == "true");

        match serde_json::from_str::<Identity>(&raw) {
            Ok(identity) if marked => Some(identity.with_source(IdentitySource::Fallback)),
            Ok(_) => {
                warn!("Discarding fallback identity without sign-in marker");
                self.clear();
                None
            }
            Err(e) => {
                warn!(error = %e, "Discarding unreadable fallback identity");
                self.clear();
                None
            }
        }
    }

    /// Persist `identity` and the signed-in marker.
    pub(crate) fn save(&self, identity: &Identity) {
        let result = serde_json::to_string(identity)
            .map_err(StorageError::from)
            .and_then(|encoded| self.storage.set_item(FALLBACK_USER_KEY, &encoded))
            .and_then(|()| self.storage.set_item(AUTHENTICATED_KEY, "true"));
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist fallback identity");
        }
    }

    /// Remove the persisted identity and the signed-in marker.
    pub(crate) fn clear(&self) {
        for key in [FALLBACK_USER_KEY, AUTHENTICATED_KEY] {
            if let Err(e) = self.storage.remove_item(key) {
                warn!(key, error = %e, "Failed to clear fallback state");
            }
        }
    }

    /// Set the signed-in marker alone (remote sign-ins).
    pub(crate) fn mark_authenticated(&self) {
        if let Err(e) = self.storage.set_item(AUTHENTICATED_KEY, "true") {
            warn!(error = %e, "Failed to persist sign-in marker");
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.storage.get_item(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Failed to read fallback state");
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use fairway_core::{Email, UserId};

    use super::*;
    use crate::storage::MemoryStore;

    fn demo(email: &str) -> Identity {
        Identity {
            id: UserId::random(),
            email: Email::parse(email).unwrap(),
            first_name: "Demo".into(),
            last_name: "Golfer".into(),
            username: "demo".into(),
            avatar_url: None,
            handicap: None,
            source: IdentitySource::Remote,
        }
    }

    fn config() -> FallbackConfig {
        FallbackConfig::new(
            SecretString::from("demo-pass"),
            vec![demo("demo@fairway.golf"), demo("pro@fairway.golf")],
        )
    }

    #[test]
    fn test_matching_allow_listed_account() {
        let identity = config().matching("Demo@Fairway.golf ", "demo-pass").unwrap();
        assert_eq!(identity.email.as_str(), "demo@fairway.golf");
        assert_eq!(identity.source, IdentitySource::Fallback);
    }

    #[test]
    fn test_wrong_password_or_unknown_email() {
        assert!(config().matching("demo@fairway.golf", "nope").is_none());
        assert!(config().matching("stranger@fairway.golf", "demo-pass").is_none());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.json");
        std::fs::write(
            &path,
            serde_json::to_string(&vec![demo("demo@fairway.golf")]).unwrap(),
        )
        .unwrap();

        let config = FallbackConfig::from_file(&path, SecretString::from("x")).unwrap();
        assert_eq!(config.accounts().len(), 1);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FallbackConfig::from_file(&path, SecretString::from("x")),
            Err(FallbackLoadError::Parse(_))
        ));
    }

    #[test]
    fn test_store_round_trip_and_clear() {
        let storage = Arc::new(MemoryStore::new());
        let store = FallbackStore::new(storage.clone());
        let identity = demo("demo@fairway.golf").with_source(IdentitySource::Fallback);

        store.save(&identity);
        assert_eq!(store.load(), Some(identity));

        store.clear();
        assert!(store.load().is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_identity_without_marker_is_discarded() {
        let storage = Arc::new(MemoryStore::new());
        let store = FallbackStore::new(storage.clone());
        store.save(&demo("demo@fairway.golf"));
        storage.remove_item(AUTHENTICATED_KEY).unwrap();

        assert!(store.load().is_none());
        assert!(storage.is_empty());
    }
}
