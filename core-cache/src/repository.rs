//! SQLite persistence for cache entries.
//!
//! Write-through storage behind the in-memory store: every `put`,
//! `invalidate`, and eviction is mirrored here so cache contents survive
//! process restart.

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;

use crate::entry::{CacheEntry, RefreshSource};
use crate::error::{CacheError, Result};
use crate::policy::CachePolicy;

/// Repository trait for persisting cache entries.
#[async_trait]
pub trait CacheRepository: Send + Sync {
    /// Insert or replace an entry.
    async fn upsert(&self, entry: &CacheEntry) -> Result<()>;

    /// Update only the refresh timestamp (revalidation without a payload).
    async fn touch(&self, key: &str, last_refreshed_at: i64) -> Result<()>;

    /// Remove entries by key.
    async fn delete_many(&self, keys: &[String]) -> Result<u64>;

    /// Load every persisted entry.
    async fn load_all(&self) -> Result<Vec<CacheEntry>>;
}

/// SQLite implementation of the cache repository.
pub struct SqliteCacheRepository {
    pool: SqlitePool,
}

impl SqliteCacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database table if it doesn't exist.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                policy TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_refreshed_at INTEGER NOT NULL,
                dependencies TEXT NOT NULL,
                pinned INTEGER NOT NULL DEFAULT 0,
                refresh_endpoint TEXT,
                refresh_path TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Database(e.to_string()))?;

        Ok(())
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<CacheEntry> {
        let policy_json: String = row.get("policy");
        let policy: CachePolicy = serde_json::from_str(&policy_json)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        let deps_json: String = row.get("dependencies");
        let dependencies: BTreeSet<String> = serde_json::from_str(&deps_json)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        let refresh_endpoint: Option<String> = row.get("refresh_endpoint");
        let refresh_path: Option<String> = row.get("refresh_path");
        let refresh_source = match (refresh_endpoint, refresh_path) {
            (Some(endpoint), Some(path)) => Some(RefreshSource { endpoint, path }),
            _ => None,
        };

        Ok(CacheEntry {
            key: row.get("key"),
            value: Bytes::from(row.get::<Vec<u8>, _>("value")),
            policy,
            created_at: row.get("created_at"),
            last_refreshed_at: row.get("last_refreshed_at"),
            dependencies,
            pinned: row.get::<i64, _>("pinned") != 0,
            refresh_source,
        })
    }
}

#[async_trait]
impl CacheRepository for SqliteCacheRepository {
    async fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        let policy_json = serde_json::to_string(&entry.policy)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        let deps_json = serde_json::to_string(&entry.dependencies)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO cache_entries (
                key, value, policy, created_at, last_refreshed_at,
                dependencies, pinned, refresh_endpoint, refresh_path
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.key)
        .bind(entry.value.as_ref())
        .bind(policy_json)
        .bind(entry.created_at)
        .bind(entry.last_refreshed_at)
        .bind(deps_json)
        .bind(entry.pinned as i64)
        .bind(entry.refresh_source.as_ref().map(|s| s.endpoint.as_str()))
        .bind(entry.refresh_source.as_ref().map(|s| s.path.as_str()))
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Database(e.to_string()))?;

        Ok(())
    }

    async fn touch(&self, key: &str, last_refreshed_at: i64) -> Result<()> {
        sqlx::query("UPDATE cache_entries SET last_refreshed_at = ? WHERE key = ?")
            .bind(last_refreshed_at)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| CacheError::Database(e.to_string()))?;

        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        let mut deleted = 0;
        for key in keys {
            let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(|e| CacheError::Database(e.to_string()))?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }

    async fn load_all(&self) -> Result<Vec<CacheEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT key, value, policy, created_at, last_refreshed_at,
                   dependencies, pinned, refresh_endpoint, refresh_path
            FROM cache_entries
            ORDER BY last_refreshed_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CacheError::Database(e.to_string()))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(Self::row_to_entry(&row)?);
        }
        Ok(entries)
    }
}
