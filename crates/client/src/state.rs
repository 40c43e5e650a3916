//! Client bundle wiring storage, cache, fetcher, auth and data together.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::auth::{AuthFacade, AuthProvider, RestAuthProvider};
use crate::cache::CacheStore;
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::data::DataClient;
use crate::error::ClientError;
use crate::fetch::{HttpTransport, ResilientFetcher, Transport};
use crate::storage::{FileStore, KeyValueStore};

/// Everything a front end needs, built once and shared.
///
/// Cheap to clone via `Arc`.
#[derive(Clone)]
pub struct FairwayClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    storage: Arc<dyn KeyValueStore>,
    fetcher: ResilientFetcher,
    auth: AuthFacade,
    data: DataClient,
}

impl FairwayClient {
    /// Build the client from configuration: file-backed storage, HTTP
    /// transport and the REST auth provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage file cannot be opened, the HTTP
    /// client cannot be built or the demo accounts cannot be loaded.
    pub fn from_config(config: ClientConfig) -> Result<Self, ClientError> {
        let storage = FileStore::open(&config.storage.path, Some(config.storage.capacity_bytes))?;
        info!(path = %storage.path().display(), "Storage opened");

        let transport = HttpTransport::new(
            &config.api_url,
            config.anon_key.clone(),
            config.fetch.timeout,
        )?;

        Self::with_parts(
            config,
            Arc::new(storage),
            Arc::new(transport),
            Arc::new(SystemClock),
        )
    }

    /// Build the client around caller-supplied collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the demo accounts cannot be loaded.
    pub fn with_parts(
        config: ClientConfig,
        storage: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ClientError> {
        let cache = CacheStore::new(
            Arc::clone(&storage),
            Arc::clone(&clock),
            config.cache_policy(),
        );
        let fetcher = ResilientFetcher::new(Arc::clone(&transport), cache, config.fetch_options());

        let provider: Arc<dyn AuthProvider> =
            Arc::new(RestAuthProvider::new(transport, Arc::clone(&storage), clock));
        let fallback = config.fallback_config()?;
        if let Some(fallback) = &fallback {
            info!(accounts = fallback.accounts().len(), "Demo account fallback enabled");
        }
        let auth = AuthFacade::new(
            Arc::clone(&provider),
            Arc::clone(&storage),
            fallback,
            config.auth.timeout,
        );

        let data = DataClient::new(fetcher.clone()).with_auth(provider);

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                storage,
                fetcher,
                auth,
                data,
            }),
        })
    }

    /// Start cache maintenance and the auth event listener on the current
    /// runtime. Both stop when the returned guard is dropped.
    #[must_use]
    pub fn start_background_tasks(&self) -> BackgroundTasks {
        let maintenance = self
            .cache()
            .spawn_maintenance(self.inner.config.cache.maintenance_interval);
        let listener = self.inner.auth.spawn_event_listener();
        BackgroundTasks {
            handles: vec![maintenance, listener],
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner.storage
    }

    #[must_use]
    pub fn cache(&self) -> &CacheStore {
        self.inner.fetcher.cache()
    }

    #[must_use]
    pub fn fetcher(&self) -> &ResilientFetcher {
        &self.inner.fetcher
    }

    #[must_use]
    pub fn auth(&self) -> &AuthFacade {
        &self.inner.auth
    }

    #[must_use]
    pub fn data(&self) -> &DataClient {
        &self.inner.data
    }
}

impl std::fmt::Debug for FairwayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FairwayClient")
            .field("config", &self.inner.config)
            .field("auth", &self.inner.auth)
            .finish_non_exhaustive()
    }
}

/// Handles of the client's background tasks; aborts them on drop.
#[derive(Debug)]
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
