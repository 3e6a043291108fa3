//! SQLite-backed cache store
//!
//! Bodies live in `cache_entries`; `cache_namespaces` records partitions so
//! empty ones still enumerate. An optional byte quota is enforced on `put`.

use super::{CacheStore, CachedBlob};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use snaily_common::time::now_millis;
use sqlx::SqlitePool;
use tracing::{debug, warn};

/// SQLITE_FULL primary result code
const SQLITE_FULL: &str = "13";

#[derive(Debug, Clone)]
pub struct SqliteCacheStore {
    pool: SqlitePool,
    quota_bytes: Option<u64>,
}

impl SqliteCacheStore {
    /// Wrap a pool whose schema was created by `db::create_schema`
    pub fn new(pool: SqlitePool, quota_bytes: Option<u64>) -> Self {
        Self { pool, quota_bytes }
    }

    /// Total body bytes, excluding the entry about to be replaced
    async fn used_bytes_excluding(&self, namespace: &str, key: &str) -> Result<u64> {
        let used: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(LENGTH(body)), 0) FROM cache_entries
            WHERE NOT (namespace = ? AND key = ?)
            "#,
        )
        .bind(namespace)
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(used.max(0) as u64)
    }
}

/// Map a sqlx failure into the cache error taxonomy
fn storage_error(err: sqlx::Error) -> Error {
    let full = err
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == SQLITE_FULL)
        .unwrap_or(false);

    if full {
        Error::QuotaExceeded(err.to_string())
    } else {
        Error::StorageUnavailable(err.to_string())
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn open(&self, namespace: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO cache_namespaces (name, created_at) VALUES (?, ?)")
            .bind(namespace)
            .bind(now_millis())
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CachedBlob>> {
        let row: Option<(Vec<u8>, Option<String>)> = sqlx::query_as(
            "SELECT body, content_type FROM cache_entries WHERE namespace = ? AND key = ?",
        )
        .bind(namespace)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.map(|(body, content_type)| CachedBlob {
            data: Bytes::from(body),
            content_type,
        }))
    }

    async fn put(&self, namespace: &str, key: &str, blob: CachedBlob) -> Result<()> {
        if let Some(quota) = self.quota_bytes {
            let used = self.used_bytes_excluding(namespace, key).await?;
            let needed = used.saturating_add(blob.len() as u64);
            if needed > quota {
                warn!(namespace, key, used, quota, "Cache quota exceeded");
                return Err(Error::QuotaExceeded(format!(
                    "{} bytes needed, quota is {}",
                    needed, quota
                )));
            }
        }

        self.open(namespace).await?;

        sqlx::query(
            r#"
            INSERT INTO cache_entries (namespace, key, body, content_type, stored_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(namespace, key) DO UPDATE SET
                body = excluded.body,
                content_type = excluded.content_type,
                stored_at = excluded.stored_at
            "#,
        )
        .bind(namespace)
        .bind(key)
        .bind(blob.data.as_ref())
        .bind(blob.content_type.as_deref())
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        debug!(namespace, key, bytes = blob.len(), "Cached entry");
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_keys(&self, namespace: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT key FROM cache_entries WHERE namespace = ? ORDER BY stored_at, key",
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let entries = sqlx::query("DELETE FROM cache_entries WHERE namespace = ?")
            .bind(namespace)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        let partition = sqlx::query("DELETE FROM cache_namespaces WHERE name = ?")
            .bind(namespace)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        tx.commit().await.map_err(storage_error)?;
        Ok(entries.rows_affected() > 0 || partition.rows_affected() > 0)
    }

    async fn namespaces(&self) -> Result<Vec<String>> {
        // Entries written before their partition row still count
        sqlx::query_scalar(
            r#"
            SELECT name FROM cache_namespaces
            UNION
            SELECT DISTINCT namespace FROM cache_entries
            ORDER BY 1
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)
    }

    async fn clear_all(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        sqlx::query("DELETE FROM cache_entries")
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        sqlx::query("DELETE FROM cache_namespaces")
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    async fn store(quota: Option<u64>) -> SqliteCacheStore {
        SqliteCacheStore::new(open_memory_database().await.unwrap(), quota)
    }

    #[tokio::test]
    async fn test_put_get_is_byte_identical() {
        let store = store(None).await;
        let body: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let blob = CachedBlob::new(body.clone(), Some("audio/mpeg".into()));

        store.put("phonics-audio-v1.0.0", "/audio/L1audio/cat.mp3", blob).await.unwrap();
        let got = store
            .get("phonics-audio-v1.0.0", "/audio/L1audio/cat.mp3")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(got.data.as_ref(), body.as_slice());
        assert_eq!(got.content_type.as_deref(), Some("audio/mpeg"));
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = store(None).await;
        store.put("ns", "k", CachedBlob::new(vec![1u8; 10], None)).await.unwrap();
        store.put("ns", "k", CachedBlob::new(vec![2u8; 20], None)).await.unwrap();

        let got = store.get("ns", "k").await.unwrap().unwrap();
        assert_eq!(got.len(), 20);
        assert_eq!(store.list_keys("ns").await.unwrap(), vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn test_quota_rejects_oversized_put() {
        let store = store(Some(3000)).await;
        store.put("ns", "a", CachedBlob::new(vec![0u8; 2000], None)).await.unwrap();

        let result = store.put("ns", "b", CachedBlob::new(vec![0u8; 2000], None)).await;
        assert!(matches!(result, Err(Error::QuotaExceeded(_))));

        // Replacing an existing entry only counts the new size
        store.put("ns", "a", CachedBlob::new(vec![0u8; 2900], None)).await.unwrap();
    }

    #[tokio::test]
    async fn test_namespaces_and_delete_namespace() {
        let store = store(None).await;
        store.open("phonics-app-v1.0.0").await.unwrap();
        store.put("phonics-audio-v0.9.0", "/audio/cat.mp3", CachedBlob::new(vec![1u8; 5], None))
            .await
            .unwrap();

        assert_eq!(
            store.namespaces().await.unwrap(),
            vec!["phonics-app-v1.0.0".to_string(), "phonics-audio-v0.9.0".to_string()]
        );

        assert!(store.delete_namespace("phonics-audio-v0.9.0").await.unwrap());
        assert!(store.get("phonics-audio-v0.9.0", "/audio/cat.mp3").await.unwrap().is_none());
        assert_eq!(store.namespaces().await.unwrap(), vec!["phonics-app-v1.0.0".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let store = store(None).await;
        store.put("a", "1", CachedBlob::new(vec![1u8], None)).await.unwrap();
        store.put("b", "2", CachedBlob::new(vec![2u8], None)).await.unwrap();

        store.clear_all().await.unwrap();
        assert!(store.namespaces().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_partition_delete_keeps_entries() {
        let pool = open_memory_database().await.unwrap();
        let store = SqliteCacheStore::new(pool.clone(), None);
        store.open("phonics-audio-v0.9.0").await.unwrap();
        store
            .put("phonics-audio-v0.9.0", "/audio/cat.mp3", CachedBlob::new(vec![7u8; 1500], None))
            .await
            .unwrap();

        sqlx::query(
            r#"
            CREATE TRIGGER pin_partitions BEFORE DELETE ON cache_namespaces
            BEGIN SELECT RAISE(ABORT, 'partition pinned'); END
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        assert!(store.delete_namespace("phonics-audio-v0.9.0").await.is_err());
        assert!(store.clear_all().await.is_err());

        let kept = store.get("phonics-audio-v0.9.0", "/audio/cat.mp3").await.unwrap();
        assert_eq!(kept.map(|b| b.data.len()), Some(1500));
        assert_eq!(store.namespaces().await.unwrap(), vec!["phonics-audio-v0.9.0".to_string()]);
    }

    #[tokio::test]
    async fn test_closed_pool_is_storage_unavailable() {
        let pool = open_memory_database().await.unwrap();
        let store = SqliteCacheStore::new(pool.clone(), None);
        pool.close().await;

        let result = store.get("ns", "k").await;
        assert!(matches!(result, Err(Error::StorageUnavailable(_))));
    }
}
