// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable store-and-forward queue backed by SQLite.
//!
//! The authoritative record of work not yet confirmed done. Entries are
//! appended in arrival order, drained strictly FIFO, and destroyed only
//! after the downstream confirms the insert committed. Every failure here is
//! [`EngineError::QueueIo`] and fatal to the process: the no-loss guarantee
//! cannot be upheld without a working durable buffer.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;

use crate::error::EngineError;
use crate::record::RecipeRecord;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// One buffered record awaiting upload.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// Durable identifier, unique within the queue and strictly increasing
    /// in arrival order.
    pub id: i64,
    /// The buffered record.
    pub record: RecipeRecord,
    /// When the entry was appended.
    pub enqueued_at: DateTime<Utc>,
    /// Delivery attempts so far.
    pub attempts: i64,
}

/// SQLite-backed durable queue.
///
/// `enqueue` is called from the handshake loop, `peek_batch`/`mark_synced`
/// from the drain loop; SQLite serializes the two so an entry is never
/// visible half-written and never delivered twice.
#[derive(Clone)]
pub struct DurableQueue {
    pool: SqlitePool,
}

impl DurableQueue {
    /// Create a queue over an existing pool. Migrations must already have run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a queue from a file path.
    ///
    /// Creates parent directories and the database file if needed, connects,
    /// and runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::QueueIo {
                operation: "create_dir".to_string(),
                details: format!("failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| EngineError::QueueIo {
                operation: "connect".to_string(),
                details: format!("failed to open queue at {:?}: {}", path, e),
            })?;

        MIGRATOR.run(&pool).await.map_err(|e| EngineError::QueueIo {
            operation: "migrate".to_string(),
            details: e.to_string(),
        })?;

        info!(path = %path.display(), "durable queue opened");
        Ok(Self { pool })
    }

    /// Append a record. Atomic with respect to process crash: the entry is
    /// either fully present or absent. Has no dependency on the downstream.
    pub async fn enqueue(&self, record: &RecipeRecord) -> Result<i64, EngineError> {
        let payload = serde_json::to_string(record)?;

        let result = sqlx::query(
            r#"
            INSERT INTO pending_records (payload, enqueued_at)
            VALUES (?, ?)
            "#,
        )
        .bind(&payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::QueueIo {
            operation: "enqueue".to_string(),
            details: e.to_string(),
        })?;

        let id = result.last_insert_rowid();
        info!(entry_id = id, sequence = record.sequence, "record buffered");
        Ok(id)
    }

    /// Oldest pending entries first, up to `limit`.
    pub async fn peek_batch(&self, limit: i64) -> Result<Vec<QueueEntry>, EngineError> {
        let rows = sqlx::query_as::<_, (i64, String, DateTime<Utc>, i64)>(
            r#"
            SELECT id, payload, enqueued_at, attempts
            FROM pending_records
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::QueueIo {
            operation: "peek_batch".to_string(),
            details: e.to_string(),
        })?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, payload, enqueued_at, attempts) in rows {
            entries.push(QueueEntry {
                id,
                record: serde_json::from_str(&payload)?,
                enqueued_at,
                attempts,
            });
        }
        Ok(entries)
    }

    /// Destroy an entry after the downstream confirmed the insert committed.
    /// The only destructive operation on the queue.
    pub async fn mark_synced(&self, id: i64) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM pending_records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::QueueIo {
                operation: "mark_synced".to_string(),
                details: e.to_string(),
            })?;
        Ok(())
    }

    /// Record a failed delivery attempt for an entry.
    pub async fn increment_attempts(&self, id: i64) -> Result<(), EngineError> {
        sqlx::query("UPDATE pending_records SET attempts = attempts + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::QueueIo {
                operation: "increment_attempts".to_string(),
                details: e.to_string(),
            })?;
        Ok(())
    }

    /// Queue over a fresh in-memory database, for tests.
    #[cfg(test)]
    pub(crate) async fn in_memory() -> Result<Self, EngineError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| EngineError::QueueIo {
                operation: "connect".to_string(),
                details: e.to_string(),
            })?;
        MIGRATOR.run(&pool).await.map_err(|e| EngineError::QueueIo {
            operation: "migrate".to_string(),
            details: e.to_string(),
        })?;
        Ok(Self { pool })
    }

    /// Close the underlying pool so every subsequent operation fails, for
    /// tests exercising the fatal path.
    #[cfg(test)]
    pub(crate) async fn close_for_tests(&self) {
        self.pool.close().await;
    }

    /// Number of entries awaiting upload.
    pub async fn pending_count(&self) -> Result<i64, EngineError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pending_records")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::QueueIo {
                operation: "pending_count".to_string(),
                details: e.to_string(),
            })?;
        Ok(count)
    }
}
