//! Store used when no durable storage could be opened
//!
//! Every operation fails with `StorageUnavailable`; callers absorb it and
//! fall back to memory-only or network-only behaviour.

use super::{CacheStore, CachedBlob};
use crate::error::{Error, Result};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct UnavailableCacheStore {
    reason: String,
}

impl UnavailableCacheStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn err<T>(&self) -> Result<T> {
        Err(Error::StorageUnavailable(self.reason.clone()))
    }
}

#[async_trait]
impl CacheStore for UnavailableCacheStore {
    async fn open(&self, _namespace: &str) -> Result<()> {
        self.err()
    }

    async fn get(&self, _namespace: &str, _key: &str) -> Result<Option<CachedBlob>> {
        self.err()
    }

    async fn put(&self, _namespace: &str, _key: &str, _blob: CachedBlob) -> Result<()> {
        self.err()
    }

    async fn delete(&self, _namespace: &str, _key: &str) -> Result<bool> {
        self.err()
    }

    async fn list_keys(&self, _namespace: &str) -> Result<Vec<String>> {
        self.err()
    }

    async fn delete_namespace(&self, _namespace: &str) -> Result<bool> {
        self.err()
    }

    async fn namespaces(&self) -> Result<Vec<String>> {
        self.err()
    }

    async fn clear_all(&self) -> Result<()> {
        self.err()
    }
}
