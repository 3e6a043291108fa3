//! Caching policies, one per request class

use super::classify::cache_key;
use crate::cache::{CacheHandle, CachedBlob};
use crate::error::{Error, Result};
use crate::net::{FetchRequest, FetchResponse, Fetcher};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Body of the response served when an audio clip is neither cached nor
/// reachable
pub const AUDIO_OFFLINE_MESSAGE: &str = "Audio not available offline";

/// Navigation fallback served from the app partition
pub const NAVIGATION_FALLBACK: &str = "/index.html";

/// Strategy for one request class
///
/// `Err` means no response could be produced at all.
#[async_trait]
pub trait CachePolicy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, request: FetchRequest) -> Result<FetchResponse>;
}

fn cached_response(blob: CachedBlob) -> FetchResponse {
    FetchResponse::new(200, blob.content_type, blob.data)
}

fn to_blob(response: &FetchResponse) -> CachedBlob {
    CachedBlob::new(response.body.clone(), response.content_type.clone())
}

/// Store a 2xx response; storage errors only cost the cache entry
async fn store_success(cache: &CacheHandle, key: &str, response: &FetchResponse) {
    if !response.is_success() {
        return;
    }
    if let Err(e) = cache.put(key, to_blob(response)).await {
        warn!(namespace = cache.namespace(), key, error = %e, "Could not cache response");
    }
}

/// Read through a cache, treating storage errors as a miss
async fn lookup(cache: &CacheHandle, key: &str) -> Option<CachedBlob> {
    match cache.get(key).await {
        Ok(hit) => hit,
        Err(e) => {
            debug!(namespace = cache.namespace(), key, error = %e, "Cache read failed, treating as miss");
            None
        }
    }
}

/// Cached copy if present, else the network; a transport failure becomes a
/// 404 so the player gets a definite answer
pub struct CacheFirst {
    cache: CacheHandle,
    network: Arc<dyn Fetcher>,
    origin: String,
}

impl CacheFirst {
    pub fn new(cache: CacheHandle, network: Arc<dyn Fetcher>, origin: &str) -> Self {
        Self {
            cache,
            network,
            origin: origin.to_string(),
        }
    }
}

#[async_trait]
impl CachePolicy for CacheFirst {
    fn name(&self) -> &'static str {
        "cache-first"
    }

    async fn handle(&self, request: FetchRequest) -> Result<FetchResponse> {
        let key = cache_key(&request, &self.origin);
        if let Some(blob) = lookup(&self.cache, &key).await {
            debug!(key = %key, "Audio served from cache");
            return Ok(cached_response(blob));
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                store_success(&self.cache, &key, &response).await;
                Ok(response)
            }
            Err(e) => {
                debug!(key = %key, error = %e, "Audio request failed");
                Ok(FetchResponse::text(404, AUDIO_OFFLINE_MESSAGE))
            }
        }
    }
}

/// Serve the cached copy and refresh it in the background; on a miss go to
/// the network, and fall back to the cached index page for navigations
pub struct StaleWhileRevalidate {
    cache: CacheHandle,
    network: Arc<dyn Fetcher>,
    origin: String,
}

impl StaleWhileRevalidate {
    pub fn new(cache: CacheHandle, network: Arc<dyn Fetcher>, origin: &str) -> Self {
        Self {
            cache,
            network,
            origin: origin.to_string(),
        }
    }

    fn revalidate(&self, request: FetchRequest, key: String) {
        let cache = self.cache.clone();
        let network = Arc::clone(&self.network);
        tokio::spawn(async move {
            match network.fetch(request).await {
                Ok(response) => store_success(&cache, &key, &response).await,
                Err(e) => debug!(key = %key, error = %e, "Background revalidation failed"),
            }
        });
    }
}

#[async_trait]
impl CachePolicy for StaleWhileRevalidate {
    fn name(&self) -> &'static str {
        "stale-while-revalidate"
    }

    async fn handle(&self, request: FetchRequest) -> Result<FetchResponse> {
        let key = cache_key(&request, &self.origin);
        if let Some(blob) = lookup(&self.cache, &key).await {
            self.revalidate(request, key);
            return Ok(cached_response(blob));
        }

        let navigation = request.is_navigation();
        match self.network.fetch(request).await {
            Ok(response) => {
                store_success(&self.cache, &key, &response).await;
                Ok(response)
            }
            Err(e) if navigation => match lookup(&self.cache, NAVIGATION_FALLBACK).await {
                Some(blob) => {
                    debug!(key = %key, "Offline navigation, serving cached index");
                    Ok(cached_response(blob))
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }
}

/// Network response when reachable (2xx are cached), else the cached copy
pub struct NetworkFirst {
    cache: CacheHandle,
    network: Arc<dyn Fetcher>,
    origin: String,
}

impl NetworkFirst {
    pub fn new(cache: CacheHandle, network: Arc<dyn Fetcher>, origin: &str) -> Self {
        Self {
            cache,
            network,
            origin: origin.to_string(),
        }
    }
}

#[async_trait]
impl CachePolicy for NetworkFirst {
    fn name(&self) -> &'static str {
        "network-first"
    }

    async fn handle(&self, request: FetchRequest) -> Result<FetchResponse> {
        let key = cache_key(&request, &self.origin);
        match self.network.fetch(request).await {
            Ok(response) => {
                store_success(&self.cache, &key, &response).await;
                Ok(response)
            }
            Err(e) => match lookup(&self.cache, &key).await {
                Some(blob) => {
                    debug!(key = %key, "Network failed, serving cached API response");
                    Ok(cached_response(blob))
                }
                None => Err(Error::NetworkFailure(format!("{} (no cached copy of {})", e, key))),
            },
        }
    }
}
