//! Named resource caches.

use crate::ServiceWorkerError;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, StatusCode};
use pwakit_common::now_millis;
use pwakit_net::{Network, Request, Response, ResponseSource, Url};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

// ==================== Entries ====================

/// A captured response stored under its request URL.
#[derive(Debug, Clone)]
pub struct CachedResource {
    /// Request URL.
    pub url: String,

    /// Response status.
    pub status: StatusCode,

    /// Response headers.
    pub headers: HeaderMap,

    /// Response body.
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CachedResource {
    pub fn from_response(url: &Url, response: &Response) -> Self {
        Self {
            url: url.to_string(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild the response exactly as it was stored.
    pub fn to_response(&self) -> Response {
        Response {
            url: Url::parse(&self.url).ok(),
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            source: ResponseSource::Cache,
        }
    }
}

type Entries = HashMap<String, CachedResource>;

#[derive(Debug, Default)]
struct Inner {
    /// Cache names in creation order.
    order: Vec<String>,
    caches: HashMap<String, Entries>,
}

impl Inner {
    fn entries_mut(&mut self, name: &str) -> &mut Entries {
        if !self.caches.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.caches.entry(name.to_string()).or_default()
    }
}

// ==================== Cache Storage ====================

/// All caches of one origin. Clones share the same caches.
#[derive(Debug, Clone, Default)]
pub struct CacheStorage {
    inner: Arc<RwLock<Inner>>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache, creating it if it doesn't exist.
    pub async fn open(&self, name: &str) -> Cache {
        self.inner.write().await.entries_mut(name);
        Cache {
            name: name.to_string(),
            storage: self.clone(),
        }
    }

    /// Check if cache exists.
    pub async fn has(&self, name: &str) -> bool {
        self.inner.read().await.caches.contains_key(name)
    }

    /// Delete a cache and everything in it.
    pub async fn delete(&self, name: &str) -> bool {
        let mut inner = self.inner.write().await;
        inner.order.retain(|n| n != name);
        let removed = inner.caches.remove(name).is_some();
        if removed {
            info!(cache = name, "Deleted cache");
        }
        removed
    }

    /// All cache names, oldest first.
    pub async fn keys(&self) -> Vec<String> {
        self.inner.read().await.order.clone()
    }

    /// Match a URL across all caches, oldest cache first.
    pub async fn match_url(&self, url: &Url) -> Option<CachedResource> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|name| inner.caches.get(name))
            .find_map(|entries| entries.get(url.as_str()))
            .cloned()
    }
}

// ==================== Cache ====================

/// Handle to one named cache.
///
/// Writing through a handle whose cache has been deleted recreates it.
#[derive(Debug, Clone)]
pub struct Cache {
    name: String,
    storage: CacheStorage,
}

impl Cache {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Match a URL in this cache.
    pub async fn match_url(&self, url: &Url) -> Option<CachedResource> {
        let inner = self.storage.inner.read().await;
        inner
            .caches
            .get(&self.name)
            .and_then(|entries| entries.get(url.as_str()))
            .cloned()
    }

    /// Store a response, replacing any previous entry for the URL.
    pub async fn put(&self, url: &Url, response: &Response) {
        let resource = CachedResource::from_response(url, response);
        let mut inner = self.storage.inner.write().await;
        inner
            .entries_mut(&self.name)
            .insert(resource.url.clone(), resource);
        debug!(cache = %self.name, url = %url, "Stored response");
    }

    /// Fetch a request and store the response.
    ///
    /// Network failures and non-2xx statuses are returned; nothing is stored.
    pub async fn add(
        &self,
        network: &dyn Network,
        request: Request,
    ) -> Result<(), ServiceWorkerError> {
        let response = fetch_ok(network, &request).await?;
        self.put(&request.url, &response).await;
        Ok(())
    }

    /// Fetch every URL, then store them all, or store nothing.
    pub async fn add_all(
        &self,
        network: &dyn Network,
        urls: &[Url],
    ) -> Result<(), ServiceWorkerError> {
        let mut fetched = Vec::with_capacity(urls.len());
        for url in urls {
            let request = Request::get(url.clone());
            let response = fetch_ok(network, &request).await?;
            fetched.push(CachedResource::from_response(url, &response));
        }

        let mut inner = self.storage.inner.write().await;
        let entries = inner.entries_mut(&self.name);
        for resource in fetched {
            entries.insert(resource.url.clone(), resource);
        }
        info!(cache = %self.name, count = urls.len(), "Cached all resources");
        Ok(())
    }

    /// Delete entry.
    pub async fn delete(&self, url: &Url) -> bool {
        let mut inner = self.storage.inner.write().await;
        inner
            .caches
            .get_mut(&self.name)
            .map(|entries| entries.remove(url.as_str()).is_some())
            .unwrap_or(false)
    }

    /// Get all keys (URLs).
    pub async fn keys(&self) -> Vec<String> {
        let inner = self.storage.inner.read().await;
        let mut keys: Vec<String> = inner
            .caches
            .get(&self.name)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

async fn fetch_ok(
    network: &dyn Network,
    request: &Request,
) -> Result<Response, ServiceWorkerError> {
    let response = network.fetch(request).await?;
    if !response.ok() {
        return Err(ServiceWorkerError::BadStatus {
            url: request.url.to_string(),
            status: response.status.as_u16(),
        });
    }
    Ok(response)
}
