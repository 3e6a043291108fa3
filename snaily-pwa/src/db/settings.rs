//! Service settings stored in the `settings` table

use crate::error::Result;
use snaily_common::db::{get_setting, set_setting};
use sqlx::{Pool, Sqlite};

/// Key holding the cache version that currently controls requests
pub const ACTIVE_CACHE_VERSION: &str = "active_cache_version";

/// Cache version recorded by the last activation, if any
pub async fn get_active_cache_version(db: &Pool<Sqlite>) -> Result<Option<String>> {
    Ok(get_setting::<String>(db, ACTIVE_CACHE_VERSION).await?)
}

/// Record the cache version that just took control
pub async fn set_active_cache_version(db: &Pool<Sqlite>, version: &str) -> Result<()> {
    set_setting(db, ACTIVE_CACHE_VERSION, version).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    #[tokio::test]
    async fn test_active_version_round_trip() {
        let db = open_memory_database().await.unwrap();
        assert_eq!(get_active_cache_version(&db).await.unwrap(), None);

        set_active_cache_version(&db, "v1.0.0").await.unwrap();
        set_active_cache_version(&db, "v1.1.0").await.unwrap();
        assert_eq!(
            get_active_cache_version(&db).await.unwrap().as_deref(),
            Some("v1.1.0")
        );
    }
}
