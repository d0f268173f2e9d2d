//! Process-scoped state handed to every fetch.

use crate::{Cache, CacheStorage, Classifier, Clients, MutationQueue, ServiceWorkerError};
use pwakit_common::WorkerConfig;
use pwakit_idb::{KeyValueStore, MemoryStore, SqliteStore};
use pwakit_net::{Connectivity, HttpNetwork, LoaderConfig, Network, Url};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Everything the fetch policy and lifecycle steps read or write.
///
/// Built once per worker with [`WorkerContextBuilder`] and shared by `Arc`.
pub struct WorkerContext {
    pub config: Arc<WorkerConfig>,
    pub classifier: Classifier,
    pub caches: CacheStorage,
    pub queue: MutationQueue,
    pub network: Arc<dyn Network>,
    pub connectivity: Connectivity,
    pub clients: Clients,
    mutation_url: Url,
    placeholder_url: Url,
    last_total: RwLock<Option<String>>,
}

impl WorkerContext {
    pub fn builder(config: WorkerConfig) -> WorkerContextBuilder {
        WorkerContextBuilder::new(config)
    }

    pub fn mutation_url(&self) -> &Url {
        &self.mutation_url
    }

    pub fn placeholder_url(&self) -> &Url {
        &self.placeholder_url
    }

    /// The cache named by the current version tag.
    pub async fn current_cache(&self) -> Cache {
        self.caches.open(&self.config.cache_name).await
    }

    /// Manifest paths resolved against the origin.
    pub fn manifest_urls(&self) -> Result<Vec<Url>, ServiceWorkerError> {
        self.config
            .manifest
            .iter()
            .map(|path| self.config.resolve(path).map_err(ServiceWorkerError::from))
            .collect()
    }

    /// The last total seen from the origin, or the configured default.
    pub async fn last_total(&self) -> String {
        self.last_total
            .read()
            .await
            .clone()
            .unwrap_or_else(|| self.config.offline_total.clone())
    }

    pub async fn record_total(&self, total: String) {
        *self.last_total.write().await = Some(total);
    }

    /// Tell controlled pages that the queue was emptied.
    pub async fn notify_processed(&self) -> usize {
        let delivered = self
            .clients
            .post_all(json!(self.config.processed_message))
            .await;
        info!(delivered, "Queued actions were processed");
        delivered
    }
}

/// Builder for [`WorkerContext`]. Unset collaborators get live defaults.
pub struct WorkerContextBuilder {
    config: WorkerConfig,
    network: Option<Arc<dyn Network>>,
    store: Option<Arc<dyn KeyValueStore>>,
    connectivity: Option<Connectivity>,
    clients: Option<Clients>,
    caches: Option<CacheStorage>,
}

impl WorkerContextBuilder {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            network: None,
            store: None,
            connectivity: None,
            clients: None,
            caches: None,
        }
    }

    pub fn network(mut self, network: Arc<dyn Network>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn clients(mut self, clients: Clients) -> Self {
        self.clients = Some(clients);
        self
    }

    /// Share caches with another context, e.g. one left by a previous version.
    pub fn caches(mut self, caches: CacheStorage) -> Self {
        self.caches = Some(caches);
        self
    }

    pub fn build(self) -> Result<Arc<WorkerContext>, ServiceWorkerError> {
        let config = self.config;
        config.validate()?;

        let mutation_url = config.mutation_url()?;
        let placeholder_url = config.placeholder_url()?;

        let network = match self.network {
            Some(network) => network,
            None => Arc::new(HttpNetwork::new(LoaderConfig::default())?),
        };
        let store = match self.store {
            Some(store) => store,
            None => open_store(&config),
        };

        info!(
            cache = %config.cache_name,
            db = store.db_name(),
            store = store.store_name(),
            "Worker context ready"
        );

        Ok(Arc::new(WorkerContext {
            classifier: Classifier::from_config(&config),
            caches: self.caches.unwrap_or_default(),
            queue: MutationQueue::new(store),
            network,
            connectivity: self.connectivity.unwrap_or_default(),
            clients: self.clients.unwrap_or_default(),
            mutation_url,
            placeholder_url,
            last_total: RwLock::new(None),
            config: Arc::new(config),
        }))
    }
}

/// Durable store at the configured path, or a transient one if it won't open.
fn open_store(config: &WorkerConfig) -> Arc<dyn KeyValueStore> {
    match SqliteStore::open(config.db_path(), &config.db_name, &config.store_name) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(error = %e, "Durable store unavailable, queue will not survive restart");
            Arc::new(MemoryStore::new(&config.db_name, &config.store_name))
        }
    }
}
