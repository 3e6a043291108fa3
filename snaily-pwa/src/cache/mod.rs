//! Durable cache store
//!
//! Named partitions ("namespaces") of URL-keyed blobs. Writes are
//! last-write-wins per key; no locking beyond what the backend provides.
//! `StorageUnavailable` and `QuotaExceeded` are soft for every caller.

mod memory;
mod sqlite;
mod unavailable;

pub use memory::MemoryCacheStore;
pub use sqlite::SqliteCacheStore;
pub use unavailable::UnavailableCacheStore;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// One cached response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBlob {
    pub data: Bytes,
    pub content_type: Option<String>,
}

impl CachedBlob {
    pub fn new(data: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self {
            data: data.into(),
            content_type,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Partitioned key/blob storage
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Ensure the partition exists
    async fn open(&self, namespace: &str) -> Result<()>;

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CachedBlob>>;

    /// Insert or replace; creates the partition if needed
    async fn put(&self, namespace: &str, key: &str, blob: CachedBlob) -> Result<()>;

    /// Returns whether an entry was removed
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

    /// Snapshot of the partition's keys
    async fn list_keys(&self, namespace: &str) -> Result<Vec<String>>;

    /// Drop the partition and its entries; returns whether it existed
    async fn delete_namespace(&self, namespace: &str) -> Result<bool>;

    /// Names of every existing partition
    async fn namespaces(&self) -> Result<Vec<String>>;

    /// Drop every partition
    async fn clear_all(&self) -> Result<()>;
}

/// A store bound to one partition
#[derive(Clone)]
pub struct CacheHandle {
    store: Arc<dyn CacheStore>,
    namespace: String,
}

impl CacheHandle {
    /// Open `namespace` on `store` and bind to it
    pub async fn open(store: Arc<dyn CacheStore>, namespace: &str) -> Result<Self> {
        store.open(namespace).await?;
        Ok(Self::unopened(store, namespace))
    }

    /// Bind without touching storage (first `put` creates the partition)
    pub fn unopened(store: Arc<dyn CacheStore>, namespace: &str) -> Self {
        Self {
            store,
            namespace: namespace.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn get(&self, key: &str) -> Result<Option<CachedBlob>> {
        self.store.get(&self.namespace, key).await
    }

    pub async fn put(&self, key: &str, blob: CachedBlob) -> Result<()> {
        self.store.put(&self.namespace, key, blob).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.store.delete(&self.namespace, key).await
    }

    pub async fn list_keys(&self) -> Result<Vec<String>> {
        self.store.list_keys(&self.namespace).await
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.list_keys().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn clear(&self) -> Result<bool> {
        self.store.delete_namespace(&self.namespace).await
    }
}

/// Versioned partition names: `{prefix}-{app|audio|runtime}-{version}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
    pub version: String,
    pub app: String,
    pub audio: String,
    pub runtime: String,
}

impl CacheNames {
    pub fn new(prefix: &str, version: &str) -> Self {
        Self {
            version: version.to_string(),
            app: format!("{}-app-{}", prefix, version),
            audio: format!("{}-audio-{}", prefix, version),
            runtime: format!("{}-runtime-{}", prefix, version),
        }
    }

    /// Partitions the current version keeps on activation
    pub fn allow_list(&self) -> [&str; 3] {
        [
            self.app.as_str(),
            self.audio.as_str(),
            self.runtime.as_str(),
        ]
    }

    pub fn is_current(&self, namespace: &str) -> bool {
        self.allow_list().contains(&namespace)
    }
}
