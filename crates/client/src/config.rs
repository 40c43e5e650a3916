//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `FAIRWAY_API_URL` - Base URL of the hosted backend
//! - `FAIRWAY_ANON_KEY` - Publishable API key (base64url segments, not a placeholder)
//!
//! ## Optional
//! - `FAIRWAY_STORAGE_PATH` - Durable storage file (default: .fairway/storage.json)
//! - `FAIRWAY_STORAGE_CAPACITY_BYTES` - Storage capacity (default: 5242880)
//! - `FAIRWAY_CACHE_NAMESPACE` - Cache key prefix (default: `fairway_cache_v1_`)
//! - `FAIRWAY_CACHE_TTL_SECS` - Default cache TTL (default: 1800)
//! - `FAIRWAY_CACHE_SOFT_LIMIT` - Maintenance trims above this many entries (default: 50)
//! - `FAIRWAY_CACHE_TARGET_ENTRIES` - Maintenance trims down to this many (default: 30)
//! - `FAIRWAY_CACHE_EVICT_PERCENT` - Share evicted when storage is full (default: 20)
//! - `FAIRWAY_CACHE_MAINTENANCE_SECS` - Maintenance interval (default: 3600)
//! - `FAIRWAY_FETCH_MAX_RETRIES` - Retries after the first attempt (default: 2)
//! - `FAIRWAY_FETCH_RETRY_BASE_MS` - First backoff delay (default: 300)
//! - `FAIRWAY_FETCH_TIMEOUT_MS` - Per-attempt timeout (default: 10000)
//! - `FAIRWAY_AUTH_TIMEOUT_SECS` - Sign-in timeout (default: 20)
//! - `FAIRWAY_DEMO_ACCOUNTS_FILE` - JSON list of demo identities; unset disables the fallback
//! - `FAIRWAY_DEMO_PASSWORD` - Shared demo password (required with the accounts file)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use crate::auth::{FallbackConfig, FallbackLoadError};
use crate::cache::CachePolicy;
use crate::fetch::FetchOptions;

const MIN_ANON_KEY_LEN: usize = 20;
const MIN_DISTINCT_CHARS: usize = 10;

/// Matched case-insensitively.
const PLACEHOLDER_PATTERNS: &[&str] = &["your-", "changeme", "placeholder", "example", "xxx"];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
    #[error("Failed to load demo accounts: {0}")]
    DemoAccounts(#[from] FallbackLoadError),
}

/// Client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    pub api_url: Url,
    pub anon_key: SecretString,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub auth: AuthConfig,
    pub sentry_dsn: Option<String>,
}

/// Durable storage settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub path: PathBuf,
    pub capacity_bytes: usize,
}

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub namespace: String,
    pub ttl: Duration,
    pub soft_limit: usize,
    pub target_entries: usize,
    pub evict_percent: u8,
    pub maintenance_interval: Duration,
}

/// Fetch retry and timeout settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub timeout: Duration,
}

/// Authentication settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub timeout: Duration,
    pub demo_accounts_file: Option<PathBuf>,
    pub demo_password: Option<SecretString>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_url", &self.api_url.as_str())
            .field("anon_key", &"[REDACTED]")
            .field("storage", &self.storage)
            .field("cache", &self.cache)
            .field("fetch", &self.fetch)
            .field("auth", &self.auth)
            .field(
                "sentry_dsn",
                &self.sentry_dsn.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the API key fails validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let api_url = env.required("FAIRWAY_API_URL")?;
        let api_url = Url::parse(&api_url).map_err(|e| {
            ConfigError::InvalidEnvVar("FAIRWAY_API_URL".to_string(), e.to_string())
        })?;
        let anon_key = env.validated_secret("FAIRWAY_ANON_KEY")?;

        let storage = StorageConfig {
            path: PathBuf::from(env.or_default("FAIRWAY_STORAGE_PATH", ".fairway/storage.json")),
            capacity_bytes: env.parsed_or("FAIRWAY_STORAGE_CAPACITY_BYTES", 5 * 1024 * 1024)?,
        };

        let cache = CacheConfig {
            namespace: env.or_default("FAIRWAY_CACHE_NAMESPACE", "fairway_cache_v1_"),
            ttl: Duration::from_secs(env.parsed_or("FAIRWAY_CACHE_TTL_SECS", 1800)?),
            soft_limit: env.parsed_or("FAIRWAY_CACHE_SOFT_LIMIT", 50)?,
            target_entries: env.parsed_or("FAIRWAY_CACHE_TARGET_ENTRIES", 30)?,
            evict_percent: env.parsed_or("FAIRWAY_CACHE_EVICT_PERCENT", 20)?,
            maintenance_interval: Duration::from_secs(
                env.parsed_or("FAIRWAY_CACHE_MAINTENANCE_SECS", 3600)?,
            ),
        };
        cache.validate()?;

        let fetch = FetchConfig {
            max_retries: env.parsed_or("FAIRWAY_FETCH_MAX_RETRIES", 2)?,
            retry_base_delay: Duration::from_millis(
                env.parsed_or("FAIRWAY_FETCH_RETRY_BASE_MS", 300)?,
            ),
            timeout: Duration::from_millis(env.parsed_or("FAIRWAY_FETCH_TIMEOUT_MS", 10_000)?),
        };

        let auth = AuthConfig {
            timeout: Duration::from_secs(env.parsed_or("FAIRWAY_AUTH_TIMEOUT_SECS", 20)?),
            demo_accounts_file: env.optional("FAIRWAY_DEMO_ACCOUNTS_FILE").map(PathBuf::from),
            demo_password: env.optional("FAIRWAY_DEMO_PASSWORD").map(SecretString::from),
        };
        if auth.demo_accounts_file.is_some() && auth.demo_password.is_none() {
            return Err(ConfigError::MissingEnvVar("FAIRWAY_DEMO_PASSWORD".to_string()));
        }

        Ok(Self {
            api_url,
            anon_key,
            storage,
            cache,
            fetch,
            auth,
            sentry_dsn: env.optional("SENTRY_DSN"),
        })
    }

    /// Cache policy for the configured namespace and limits.
    #[must_use]
    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            namespace: self.cache.namespace.clone(),
            soft_limit: self.cache.soft_limit,
            target_entries: self.cache.target_entries,
            evict_percent: self.cache.evict_percent,
        }
    }

    /// Default fetch options.
    #[must_use]
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions::new()
            .with_ttl(self.cache.ttl)
            .with_max_retries(self.fetch.max_retries)
            .with_retry_base_delay(self.fetch.retry_base_delay)
            .with_timeout(self.fetch.timeout)
    }

    /// The demo allow-list, or `None` when no accounts file is configured.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::DemoAccounts` if the file cannot be loaded.
    pub fn fallback_config(&self) -> Result<Option<FallbackConfig>, ConfigError> {
        let (Some(path), Some(password)) = (&self.auth.demo_accounts_file, &self.auth.demo_password)
        else {
            return Ok(None);
        };
        Ok(Some(FallbackConfig::from_file(path, password.clone())?))
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.target_entries > self.soft_limit {
            return Err(ConfigError::InvalidEnvVar(
                "FAIRWAY_CACHE_TARGET_ENTRIES".to_string(),
                format!("must not exceed the soft limit ({})", self.soft_limit),
            ));
        }
        if !(1..=100).contains(&self.evict_percent) {
            return Err(ConfigError::InvalidEnvVar(
                "FAIRWAY_CACHE_EVICT_PERCENT".to_string(),
                "must be between 1 and 100".to_string(),
            ));
        }
        if self.maintenance_interval.is_zero() {
            return Err(ConfigError::InvalidEnvVar(
                "FAIRWAY_CACHE_MAINTENANCE_SECS".to_string(),
                "must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Variable source with the lookup helpers.
struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Get an optional variable; empty values count as unset.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    /// Get a required variable.
    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    /// Get a variable with a default value.
    fn or_default(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    /// Parse a variable, using `default` when unset.
    fn parsed_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(key).map_or(Ok(default), |value| {
            value
                .trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
        })
    }

    /// Load and validate a secret.
    fn validated_secret(&self, key: &str) -> Result<SecretString, ConfigError> {
        let value = self.required(key)?;
        check_anon_key(&value, key)?;
        Ok(SecretString::from(value))
    }
}

/// Reject placeholders and values that cannot be a publishable key.
///
/// Keys are JWT-style base64url segments joined by dots.
fn check_anon_key(key: &str, var_name: &str) -> Result<(), ConfigError> {
    let insecure = |reason: String| -> Result<(), ConfigError> {
        Err(ConfigError::InsecureSecret(var_name.to_string(), reason))
    };

    let lower = key.to_ascii_lowercase();
    if let Some(pattern) = PLACEHOLDER_PATTERNS.iter().find(|p| lower.contains(*p)) {
        return insecure(format!("appears to be a placeholder (contains '{pattern}')"));
    }
    if key.len() < MIN_ANON_KEY_LEN {
        return insecure(format!("shorter than {MIN_ANON_KEY_LEN} characters"));
    }
    if let Some(c) = key
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return insecure(format!("contains {c:?}; copy the key from the backend dashboard"));
    }
    let distinct = key.chars().collect::<BTreeSet<_>>().len();
    if distinct < MIN_DISTINCT_CHARS {
        return insecure(format!("only {distinct} distinct characters"));
    }
    Ok(())
}
