//! PostgreSQL-backed downstream implementation.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{Postgres, Row};
use tracing::{info, warn};

use crate::config::FieldMappings;
use crate::error::EngineError;
use crate::record::{RecipeRecord, TagValue};

use super::Downstream;

/// Downstream that inserts records into a configured table via sqlx.
///
/// The INSERT is built from the field-to-column mappings: mapped fields
/// present in the record become columns, everything else is skipped, and the
/// host-assigned capture timestamp lands in the configured timestamp column.
pub struct PostgresDownstream {
    pool: PgPool,
    table: String,
    mappings: FieldMappings,
    connected: AtomicBool,
}

impl PostgresDownstream {
    /// Create a downstream over an existing pool.
    ///
    /// `table` and the mapping tables come from the validated configuration.
    pub fn new(pool: PgPool, table: impl Into<String>, mappings: FieldMappings) -> Self {
        Self {
            pool,
            table: table.into(),
            mappings,
            connected: AtomicBool::new(false),
        }
    }

    fn downstream_err(&self, operation: &str, err: impl std::fmt::Display) -> EngineError {
        self.connected.store(false, Ordering::SeqCst);
        EngineError::Downstream {
            operation: operation.to_string(),
            details: err.to_string(),
        }
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q TagValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        TagValue::Int(v) => query.bind(v),
        TagValue::Float(v) => query.bind(v),
        TagValue::Text(v) => query.bind(v.as_str()),
    }
}

#[async_trait]
impl Downstream for PostgresDownstream {
    async fn connect(&self) -> Result<(), EngineError> {
        let row = sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.downstream_err("connect", e))?;
        let _: i32 = row
            .try_get(0)
            .map_err(|e| self.downstream_err("connect", e))?;

        self.connected.store(true, Ordering::SeqCst);
        info!(table = %self.table, "downstream connected");
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn insert(&self, record: &RecipeRecord) -> Result<(), EngineError> {
        let mut columns: Vec<&str> = Vec::new();
        let mut values: Vec<&TagValue> = Vec::new();

        for (field, column) in &self.mappings.columns {
            if let Some(value) = record.get(field) {
                columns.push(column);
                values.push(value);
            }
        }

        if columns.is_empty() {
            warn!(
                sequence = record.sequence,
                "no mapped fields present in record, nothing to insert"
            );
            return Ok(());
        }

        let mut placeholders: Vec<String> =
            (1..=values.len()).map(|i| format!("${}", i)).collect();
        if let Some(ts_column) = &self.mappings.timestamp_column {
            columns.push(ts_column);
            placeholders.push(format!("${}", values.len() + 1));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            columns.join(", "),
            placeholders.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for value in &values {
            query = bind_value(query, value);
        }
        if self.mappings.timestamp_column.is_some() {
            query = query.bind(record.captured_at);
        }

        // One transaction per record: commit on full success, rollback on
        // any failure.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| self.downstream_err("begin", e))?;
        query
            .execute(&mut *tx)
            .await
            .map_err(|e| self.downstream_err("insert", e))?;
        tx.commit()
            .await
            .map_err(|e| self.downstream_err("commit", e))?;

        self.connected.store(true, Ordering::SeqCst);
        info!(
            sequence = record.sequence,
            table = %self.table,
            columns = columns.len(),
            "record inserted"
        );
        Ok(())
    }
}
