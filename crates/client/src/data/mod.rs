//! Remote data client for named collections.
//!
//! Reads go through the [`ResilientFetcher`] and are cached under their
//! resource path, suffixed with the user id when a session is present so one
//! user's rows are never served to another. Writes go to the transport under
//! the fetcher's timeout and then invalidate every cached read of the
//! collection (entries cached under a custom `cache_key` are left alone).

mod query;

pub use query::{FilterOp, Order, Query};

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::auth::{AuthProvider, RemoteSession};
use crate::fetch::{
    FetchError, FetchOptions, HttpMethod, ResilientFetcher, TransportError, TransportRequest,
};

/// Errors from data operations.
#[derive(Debug, Error)]
pub enum DataError {
    /// A read failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A write failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The rows could not be encoded.
    #[error("failed to encode rows: {0}")]
    Encode(serde_json::Error),

    /// The response rows could not be decoded.
    #[error("failed to decode rows: {0}")]
    Decode(serde_json::Error),

    /// A write got no response within the timeout. It may still have landed.
    #[error("write timed out after {after_ms}ms")]
    TimedOut { after_ms: u64 },

    /// Updates and deletes must be filtered.
    #[error("refusing to {operation} every row of {collection}")]
    Unfiltered {
        operation: &'static str,
        collection: String,
    },
}

/// Client for collection reads and writes.
#[derive(Clone)]
pub struct DataClient {
    fetcher: ResilientFetcher,
    auth: Option<Arc<dyn AuthProvider>>,
}

impl DataClient {
    /// Create a client that sends requests with the publishable key only.
    #[must_use]
    pub const fn new(fetcher: ResilientFetcher) -> Self {
        Self {
            fetcher,
            auth: None,
        }
    }

    /// Send the signed-in user's access token when there is a session.
    #[must_use]
    pub fn with_auth(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(provider);
        self
    }

    /// Read rows.
    ///
    /// With a session, the rows are cached per user.
    ///
    /// # Errors
    ///
    /// Returns the fetch error once retries are exhausted, or
    /// `FetchError::Decode` if the rows are not `T`s.
    #[instrument(skip(self, options), fields(collection = %query.collection()))]
    pub async fn select<T: DeserializeOwned>(
        &self,
        query: &Query,
        mut options: FetchOptions,
    ) -> Result<Vec<T>, DataError> {
        let path = query.path();
        if let Some(session) = self.session().await {
            let key = format!("{}#{}", options.effective_cache_key(&path), session.user.id);
            options = options
                .with_cache_key(key)
                .with_header("Authorization", bearer(&session));
        }
        Ok(self.fetcher.fetch_resource(&path, options).await?)
    }

    /// Insert rows, returning them as stored.
    ///
    /// # Errors
    ///
    /// Returns the transport error, or a decode error for unexpected rows.
    pub async fn insert<T: Serialize, R: DeserializeOwned>(
        &self,
        collection: &str,
        rows: &T,
    ) -> Result<Vec<R>, DataError> {
        let body = serde_json::to_value(rows).map_err(DataError::Encode)?;
        self.mutate(
            collection,
            query::collection_prefix(collection),
            HttpMethod::Post,
            Some(body),
            "return=representation",
        )
        .await
    }

    /// Insert rows or merge them into existing ones that conflict on
    /// `on_conflict` (the primary key if `None`).
    ///
    /// # Errors
    ///
    /// See [`insert`](Self::insert).
    pub async fn upsert<T: Serialize, R: DeserializeOwned>(
        &self,
        collection: &str,
        rows: &T,
        on_conflict: Option<&str>,
    ) -> Result<Vec<R>, DataError> {
        let body = serde_json::to_value(rows).map_err(DataError::Encode)?;
        let mut path = query::collection_prefix(collection);
        if let Some(columns) = on_conflict {
            path.push_str("on_conflict=");
            path.push_str(columns);
        }
        self.mutate(
            collection,
            path,
            HttpMethod::Post,
            Some(body),
            "resolution=merge-duplicates,return=representation",
        )
        .await
    }

    /// Apply `changes` to the rows matching `query`.
    ///
    /// # Errors
    ///
    /// Returns `DataError::Unfiltered` if `query` has no filters.
    pub async fn update<T: Serialize, R: DeserializeOwned>(
        &self,
        query: &Query,
        changes: &T,
    ) -> Result<Vec<R>, DataError> {
        require_filters(query, "update")?;
        let body = serde_json::to_value(changes).map_err(DataError::Encode)?;
        self.mutate(
            query.collection(),
            query.mutation_path(),
            HttpMethod::Patch,
            Some(body),
            "return=representation",
        )
        .await
    }

    /// Delete the rows matching `query`.
    ///
    /// # Errors
    ///
    /// Returns `DataError::Unfiltered` if `query` has no filters.
    pub async fn delete(&self, query: &Query) -> Result<(), DataError> {
        require_filters(query, "delete")?;
        let _: Vec<Value> = self
            .mutate(
                query.collection(),
                query.mutation_path(),
                HttpMethod::Delete,
                None,
                "return=minimal",
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, path, body), fields(method = %method))]
    async fn mutate<R: DeserializeOwned>(
        &self,
        collection: &str,
        path: String,
        method: HttpMethod,
        body: Option<Value>,
        prefer: &str,
    ) -> Result<Vec<R>, DataError> {
        let mut request = TransportRequest {
            path,
            method,
            body,
            ..TransportRequest::default()
        };
        request.headers.insert("Prefer".to_string(), prefer.to_string());
        if let Some(session) = self.session().await {
            request
                .headers
                .insert("Authorization".to_string(), bearer(&session));
        }

        let timeout = self.fetcher.options().timeout;
        let response = tokio::time::timeout(timeout, self.fetcher.transport().send(&request)).await;

        // the write may have landed even if the response was lost
        let invalidated = self
            .fetcher
            .cache()
            .invalidate_prefix(&query::collection_prefix(collection));
        debug!(collection, invalidated, "Invalidated cached reads");

        let Ok(response) = response else {
            return Err(DataError::TimedOut {
                after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            });
        };
        match response? {
            Value::Null => Ok(Vec::new()),
            rows => serde_json::from_value(rows).map_err(DataError::Decode),
        }
    }

    async fn session(&self) -> Option<RemoteSession> {
        let provider = self.auth.as_ref()?;
        match provider.get_session().await {
            Ok(session) => session,
            Err(e) => {
                debug!(error = %e, "No usable session, sending anonymous request");
                None
            }
        }
    }
}

impl std::fmt::Debug for DataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataClient")
            .field("fetcher", &self.fetcher)
            .field("authenticated", &self.auth.is_some())
            .finish()
    }
}

fn bearer(session: &RemoteSession) -> String {
    format!("Bearer {}", session.access_token)
}

fn require_filters(query: &Query, operation: &'static str) -> Result<(), DataError> {
    if query.has_filters() {
        Ok(())
    } else {
        Err(DataError::Unfiltered {
            operation,
            collection: query.collection().to_string(),
        })
    }
}
