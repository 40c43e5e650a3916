//! Network transport collaborator for the fetch cache.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};
use url::Url;

use super::error::TransportError;

/// HTTP method of a transport request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Self::GET,
            HttpMethod::Post => Self::POST,
            HttpMethod::Put => Self::PUT,
            HttpMethod::Patch => Self::PATCH,
            HttpMethod::Delete => Self::DELETE,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A single request handed to a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportRequest {
    /// Resource path relative to the transport's base URL (or an absolute URL).
    pub path: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl TransportRequest {
    /// A `GET` for `path` with no headers.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// Abortable network call returning a parsed payload.
///
/// Dropping the returned future must abort the underlying operation; the
/// fetch cache relies on that to enforce per-attempt timeouts.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the request.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Status` for non-2xx responses and
    /// `TransportError::Network` when the server could not be reached.
    async fn send(&self, request: &TransportRequest) -> Result<Value, TransportError>;
}

// =============================================================================
// HttpTransport
// =============================================================================

/// [`Transport`] over HTTP using `reqwest`.
///
/// Every request carries the backend's publishable key both as `apikey` and
/// as a bearer token; request headers override these defaults.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    api_key: SecretString,
}

impl HttpTransport {
    /// Create a transport rooted at `base_url`.
    ///
    /// `connect_timeout` bounds connection setup only; the fetch cache applies
    /// its own per-attempt timeout on top.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Network` if the HTTP client cannot be built.
    pub fn new(
        base_url: &Url,
        api_key: SecretString,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: with_trailing_slash(base_url),
            api_key,
        })
    }

    /// The normalised base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Default headers with the request's own headers layered on top.
    fn headers_for(&self, request: &TransportRequest) -> Result<HeaderMap, TransportError> {
        let api_key = self.api_key.expose_secret();
        let mut headers = HeaderMap::new();
        headers.insert("apikey", header_value(api_key)?);
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {api_key}"))?);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| {
                    TransportError::InvalidRequest(format!("bad header name {name}: {e}"))
                })?;
            headers.insert(name, header_value(value)?);
        }
        Ok(headers)
    }

    fn resolve(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidRequest(format!("bad resource path {path}: {e}")))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &TransportRequest) -> Result<Value, TransportError> {
        let url = self.resolve(&request.path)?;
        debug!(method = %request.method, url = %url, "Sending request");

        let headers = self.headers_for(request)?;
        let mut builder = self
            .client
            .request(request.method.into(), url)
            .headers(headers);

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(TransportError::from)?;
        let status = response.status();
        let text = response.text().await.map_err(TransportError::from)?;

        if !status.is_success() {
            error!(
                status = %status,
                body = %text.chars().take(500).collect::<String>(),
                "Backend returned non-success status"
            );
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Network(format!("request timeout: {e}"))
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Pull a human-readable message out of an error body.
///
/// Backends answer errors with `{"message": ..}`, `{"error_description": ..}`
/// or `{"msg": ..}`; anything else is returned truncated.
pub(crate) fn error_message(body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for field in ["message", "error_description", "msg", "error"] {
            if let Some(Value::String(message)) = map.get(field) {
                return message.clone();
            }
        }
    }
    body.chars().take(200).collect()
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value)
        .map_err(|e| TransportError::InvalidRequest(format!("bad header value: {e}")))
}

fn with_trailing_slash(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn transport(base: &str) -> HttpTransport {
        HttpTransport::new(
            &Url::parse(base).unwrap(),
            SecretString::from("anon-key"),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_keeps_base_path() {
        let t = transport("https://api.fairway.golf/v2");
        assert_eq!(
            t.resolve("rest/v1/courses?select=*").unwrap().as_str(),
            "https://api.fairway.golf/v2/rest/v1/courses?select=*"
        );
        assert_eq!(
            t.resolve("/auth/v1/user").unwrap().as_str(),
            "https://api.fairway.golf/v2/auth/v1/user"
        );
    }

    #[test]
    fn test_request_headers_override_defaults() {
        let t = transport("https://api.fairway.golf");
        let mut request = TransportRequest::get("auth/v1/user");
        request
            .headers
            .insert("Authorization".to_string(), "Bearer user-token".to_string());

        let headers = t.headers_for(&request).unwrap();
        assert_eq!(headers.get_all(AUTHORIZATION).iter().count(), 1);
        assert_eq!(headers[AUTHORIZATION], "Bearer user-token");
        assert_eq!(headers["apikey"], "anon-key");
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"error_description":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(error_message(r#"{"message":"JWT expired"}"#), "JWT expired");
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_method_conversion() {
        assert_eq!(
            reqwest::Method::from(HttpMethod::Patch),
            reqwest::Method::PATCH
        );
        assert_eq!(HttpMethod::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_debug_redacts_key() {
        let debug = format!("{:?}", transport("https://api.fairway.golf"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("anon-key"));
    }
}
