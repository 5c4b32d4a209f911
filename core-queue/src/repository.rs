//! SQLite persistence for offline operations.
//!
//! The queue is write-ahead storage for deferred mutations; every status
//! transition is persisted before it is acted on, so a crash mid-drain
//! loses no work.

use async_trait::async_trait;
use bridge_traits::Method;
use bytes::Bytes;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::error::{QueueError, Result};
use crate::operation::{OfflineOperation, OperationId, OperationStatus, Priority};

/// Repository trait for persisting offline operations.
#[async_trait]
pub trait OperationRepository: Send + Sync {
    /// Insert a new operation.
    async fn insert(&self, operation: &OfflineOperation) -> Result<()>;

    /// Persist the current state of an existing operation.
    async fn update(&self, operation: &OfflineOperation) -> Result<()>;

    /// Find an operation by ID.
    async fn find_by_id(&self, id: OperationId) -> Result<Option<OfflineOperation>>;

    /// Find the active (Pending or InFlight) operation holding an
    /// idempotency key, if any.
    async fn find_active_by_idempotency_key(&self, key: &str)
        -> Result<Option<OfflineOperation>>;

    /// The next eligible Pending operation in a lane: highest priority,
    /// then earliest submission.
    async fn next_pending_in_lane(
        &self,
        lane: &str,
        now_ms: i64,
    ) -> Result<Option<OfflineOperation>>;

    /// Whether the lane currently has an InFlight operation.
    async fn has_in_flight(&self, lane: &str) -> Result<bool>;

    /// Distinct lanes holding an eligible Pending operation.
    async fn lanes_with_pending(&self, now_ms: i64) -> Result<Vec<String>>;

    /// Revert all InFlight rows to Pending (startup recovery).
    async fn reset_in_flight(&self) -> Result<u64>;

    /// Count operations in a given status.
    async fn count_by_status(&self, status: OperationStatus) -> Result<u64>;

    /// Terminally failed operations, most recent first.
    async fn list_failed(&self) -> Result<Vec<OfflineOperation>>;
}

/// SQLite implementation of the operation repository.
pub struct SqliteOperationRepository {
    pool: SqlitePool,
}

impl SqliteOperationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database tables if they don't exist.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS offline_operations (
                id TEXT PRIMARY KEY,
                lane TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                method TEXT NOT NULL,
                path TEXT NOT NULL,
                payload BLOB NOT NULL,
                priority INTEGER NOT NULL,
                payment_class INTEGER NOT NULL DEFAULT 0,
                invalidate_keys TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL,
                next_attempt_at INTEGER NOT NULL,
                reauth_attempted INTEGER NOT NULL DEFAULT 0,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_operations_lane_status
             ON offline_operations(lane, status, next_attempt_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        // At most one active holder per idempotency key, enforced by the
        // database so concurrent enqueues cannot both insert.
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_operations_active_idempotency
             ON offline_operations(idempotency_key)
             WHERE status IN ('pending', 'in_flight') AND idempotency_key <> ''",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        Ok(())
    }

    fn row_to_operation(row: &sqlx::sqlite::SqliteRow) -> Result<OfflineOperation> {
        let id: String = row.get("id");
        let status: String = row.get("status");
        let method: String = row.get("method");
        let invalidate_json: String = row.get("invalidate_keys");
        let invalidate_keys: Vec<String> = serde_json::from_str(&invalidate_json)
            .map_err(|e| QueueError::Database(e.to_string()))?;

        Ok(OfflineOperation {
            id: OperationId::from_string(&id)?,
            lane: row.get("lane"),
            idempotency_key: row.get("idempotency_key"),
            endpoint: row.get("endpoint"),
            method: Method::parse(&method).ok_or(QueueError::InvalidMethod(method))?,
            path: row.get("path"),
            payload: Bytes::from(row.get::<Vec<u8>, _>("payload")),
            priority: Priority::from_rank(row.get("priority"))?,
            payment_class: row.get::<i64, _>("payment_class") != 0,
            invalidate_keys,
            status: OperationStatus::from_str(&status)?,
            created_at: row.get("created_at"),
            retry_count: row.get::<i64, _>("retry_count") as u32,
            max_retries: row.get::<i64, _>("max_retries") as u32,
            next_attempt_at: row.get("next_attempt_at"),
            reauth_attempted: row.get::<i64, _>("reauth_attempted") != 0,
            error_message: row.get("error_message"),
        })
    }
}

const SELECT_COLUMNS: &str = "id, lane, idempotency_key, endpoint, method, path, payload, \
     priority, payment_class, invalidate_keys, status, created_at, retry_count, \
     max_retries, next_attempt_at, reauth_attempted, error_message";

#[async_trait]
impl OperationRepository for SqliteOperationRepository {
    async fn insert(&self, operation: &OfflineOperation) -> Result<()> {
        let invalidate_json = serde_json::to_string(&operation.invalidate_keys)
            .map_err(|e| QueueError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO offline_operations (
                id, lane, idempotency_key, endpoint, method, path, payload,
                priority, payment_class, invalidate_keys, status, created_at,
                retry_count, max_retries, next_attempt_at, reauth_attempted,
                error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(operation.id.as_str())
        .bind(&operation.lane)
        .bind(&operation.idempotency_key)
        .bind(&operation.endpoint)
        .bind(operation.method.as_str())
        .bind(&operation.path)
        .bind(operation.payload.as_ref())
        .bind(operation.priority.rank())
        .bind(operation.payment_class as i64)
        .bind(invalidate_json)
        .bind(operation.status.as_str())
        .bind(operation.created_at)
        .bind(operation.retry_count as i64)
        .bind(operation.max_retries as i64)
        .bind(operation.next_attempt_at)
        .bind(operation.reauth_attempted as i64)
        .bind(&operation.error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                QueueError::DuplicateIdempotencyKey(operation.idempotency_key.clone())
            }
            _ => QueueError::Database(e.to_string()),
        })?;

        Ok(())
    }

    async fn update(&self, operation: &OfflineOperation) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE offline_operations
            SET status = ?, retry_count = ?, next_attempt_at = ?,
                reauth_attempted = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(operation.status.as_str())
        .bind(operation.retry_count as i64)
        .bind(operation.next_attempt_at)
        .bind(operation.reauth_attempted as i64)
        .bind(&operation.error_message)
        .bind(operation.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::OperationNotFound(operation.id.as_str()));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: OperationId) -> Result<Option<OfflineOperation>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM offline_operations WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_operation).transpose()
    }

    async fn find_active_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<OfflineOperation>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM offline_operations
             WHERE idempotency_key = ? AND status IN ('pending', 'in_flight')
             LIMIT 1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_operation).transpose()
    }

    async fn next_pending_in_lane(
        &self,
        lane: &str,
        now_ms: i64,
    ) -> Result<Option<OfflineOperation>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM offline_operations
             WHERE lane = ? AND status = 'pending' AND next_attempt_at <= ?
             ORDER BY priority ASC, created_at ASC, rowid ASC
             LIMIT 1"
        ))
        .bind(lane)
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_operation).transpose()
    }

    async fn has_in_flight(&self, lane: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM offline_operations
             WHERE lane = ? AND status = 'in_flight'",
        )
        .bind(lane)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        Ok(row.get::<i64, _>("count") > 0)
    }

    async fn lanes_with_pending(&self, now_ms: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT lane FROM offline_operations
             WHERE status = 'pending' AND next_attempt_at <= ?
             ORDER BY lane",
        )
        .bind(now_ms)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        Ok(rows.iter().map(|r| r.get("lane")).collect())
    }

    async fn reset_in_flight(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE offline_operations SET status = 'pending'
             WHERE status = 'in_flight'",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn count_by_status(&self, status: OperationStatus) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM offline_operations WHERE status = ?",
        )
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        Ok(row.get::<i64, _>("count") as u64)
    }

    async fn list_failed(&self) -> Result<Vec<OfflineOperation>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM offline_operations
             WHERE status = 'failed'
             ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_operation).collect()
    }
}
