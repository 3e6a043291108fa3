//! In-process cache store
//!
//! Used when no durable backend is wanted and as a test double.

use super::{CacheStore, CachedBlob};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    partitions: RwLock<BTreeMap<String, BTreeMap<String, CachedBlob>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, namespace: &str) -> Result<()> {
        self.partitions
            .write()
            .await
            .entry(namespace.to_string())
            .or_default();
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CachedBlob>> {
        Ok(self
            .partitions
            .read()
            .await
            .get(namespace)
            .and_then(|p| p.get(key))
            .cloned())
    }

    async fn put(&self, namespace: &str, key: &str, blob: CachedBlob) -> Result<()> {
        self.partitions
            .write()
            .await
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), blob);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self
            .partitions
            .write()
            .await
            .get_mut(namespace)
            .map(|p| p.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn list_keys(&self, namespace: &str) -> Result<Vec<String>> {
        Ok(self
            .partitions
            .read()
            .await
            .get(namespace)
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<bool> {
        Ok(self.partitions.write().await.remove(namespace).is_some())
    }

    async fn namespaces(&self) -> Result<Vec<String>> {
        Ok(self.partitions.read().await.keys().cloned().collect())
    }

    async fn clear_all(&self) -> Result<()> {
        self.partitions.write().await.clear();
        Ok(())
    }
}
