//! Signed-in golfer identity.

use serde::{Deserialize, Serialize};

use crate::{Email, Handicap, UserId};

/// Where an [`Identity`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// Verified by the remote authentication provider.
    #[default]
    Remote,
    /// Restored from the local demo allow-list while the provider is unreachable.
    Fallback,
}

/// A golfer's identity and public profile.
///
/// Remote identities combine the auth provider's user record with the
/// `profiles` row; fallback identities are fixtures from the demo allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub email: Email,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub handicap: Option<Handicap>,
    #[serde(default)]
    pub source: IdentitySource,
}

impl Identity {
    /// Full display name, falling back to the username and then the email.
    #[must_use]
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let full = full.trim();
        if !full.is_empty() {
            return full.to_string();
        }
        if !self.username.is_empty() {
            return self.username.clone();
        }
        self.email.to_string()
    }

    /// Returns a copy tagged with the given source.
    #[must_use]
    pub fn with_source(mut self, source: IdentitySource) -> Self {
        self.source = source;
        self
    }

    /// Whether this identity was verified by the remote provider.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.source == IdentitySource::Remote
    }
}
