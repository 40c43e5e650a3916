//! Per-call fetch options.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Value, json};

use super::transport::{HttpMethod, TransportRequest};

/// Options for a single
/// [`ResilientFetcher::fetch_resource`](super::ResilientFetcher::fetch_resource)
/// call.
///
/// Start from [`FetchOptions::default`] (or the fetcher's configured
/// defaults) and adjust with the `with_*` builders.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    /// Cache key override; defaults to the resource id.
    pub cache_key: Option<String>,
    /// How long a successful result stays valid.
    pub ttl: Duration,
    /// Bypass the cache lookup (the result is still written back).
    pub skip_cache: bool,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each further retry.
    pub retry_base_delay: Duration,
    /// Bound on each individual attempt.
    pub timeout: Duration,
    /// Share an identical in-flight request instead of starting another.
    pub dedupe: bool,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            cache_key: None,
            ttl: Duration::from_secs(30 * 60),
            skip_cache: false,
            max_retries: 2,
            retry_base_delay: Duration::from_millis(300),
            timeout: Duration::from_secs(10),
            dedupe: true,
            method: HttpMethod::Get,
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

impl FetchOptions {
    /// Create options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache under `key` instead of the resource id.
    #[must_use]
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Set the validity window of the cached result.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Skip (or stop skipping) the cache lookup.
    #[must_use]
    pub const fn with_skip_cache(mut self, skip: bool) -> Self {
        self.skip_cache = skip;
        self
    }

    /// Set the number of retries after the first attempt.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the base backoff delay.
    #[must_use]
    pub const fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable in-flight de-duplication.
    #[must_use]
    pub const fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    /// Set the HTTP method.
    #[must_use]
    pub const fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Add a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set a JSON request body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Key under which the result is cached.
    #[must_use]
    pub fn effective_cache_key<'a>(&'a self, resource_id: &'a str) -> &'a str {
        self.cache_key.as_deref().unwrap_or(resource_id)
    }

    /// Key identifying identical in-flight requests.
    ///
    /// The resource id and transport parameters are encoded as one JSON
    /// array, so separators inside a value cannot make two different calls
    /// share a key. Header names compare case-insensitively and body objects
    /// are encoded with sorted keys.
    #[must_use]
    pub fn request_key(&self, resource_id: &str) -> String {
        let headers: BTreeMap<String, &str> = self
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.as_str()))
            .collect();
        let body = self.body.as_ref().map(canonical_json);
        let parts = json!([resource_id, self.method.to_string(), headers, body]);
        parts.to_string()
    }

    /// The transport request these options describe.
    #[must_use]
    pub fn to_request(&self, resource_id: &str) -> TransportRequest {
        TransportRequest {
            path: resource_id.to_string(),
            method: self.method,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// JSON text with object keys sorted at every level.
pub(crate) fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields = keys
                .into_iter()
                .map(|k| {
                    let key = Value::String(k.clone()).to_string();
                    let value = map.get(k).map_or_else(String::new, canonical_json);
                    format!("{key}:{value}")
                })
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{fields}}}")
        }
        Value::Array(items) => {
            let items = items.iter().map(canonical_json).collect::<Vec<_>>().join(",");
            format!("[{items}]")
        }
        other => other.to_string(),
    }
}
