//! Database initialization
//!
//! Builds on the shared bootstrap in snaily-common (pool, pragmas, settings
//! table) and adds the tables this service owns.

use crate::error::Result;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::debug;

/// Open (creating if needed) the service database and its tables
pub async fn open_database(db_path: &Path) -> Result<SqlitePool> {
    let pool = snaily_common::db::init_database(db_path).await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Private in-memory database with every table, for tests and degraded mode
pub async fn open_memory_database() -> Result<SqlitePool> {
    let pool = snaily_common::db::init_memory_database().await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Create every service table (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_cache_namespaces_table(pool).await?;
    create_cache_entries_table(pool).await?;
    create_offline_events_table(pool).await?;
    debug!("Service schema ready");
    Ok(())
}

async fn create_cache_namespaces_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_namespaces (
            name TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_cache_entries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            namespace TEXT NOT NULL,
            key TEXT NOT NULL,
            body BLOB NOT NULL,
            content_type TEXT,
            stored_at INTEGER NOT NULL,
            PRIMARY KEY (namespace, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_offline_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS offline_events (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            payload TEXT NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_offline_events_synced ON offline_events(synced, timestamp)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
