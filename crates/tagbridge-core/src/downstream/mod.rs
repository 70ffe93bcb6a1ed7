//! Downstream connector interface and backends.
//!
//! The downstream side is the relational database receiving one row per
//! batch event.

pub mod postgres;

pub use self::postgres::PostgresDownstream;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::record::RecipeRecord;

/// Transactional persistence of one validated record.
///
/// `insert` writes a whole row inside one explicit transaction: commit on
/// full success, rollback on any failure, never a partial row. A timeout is
/// surfaced exactly like a connection failure, as [`EngineError::Downstream`].
/// Implementations serialize their own I/O internally.
#[async_trait]
pub trait Downstream: Send + Sync {
    /// Establish the database connection.
    async fn connect(&self) -> Result<(), EngineError>;

    /// Close the database connection.
    async fn disconnect(&self);

    /// Whether the connection is currently believed reachable.
    async fn is_connected(&self) -> bool;

    /// Persist one record, committing or failing atomically.
    async fn insert(&self, record: &RecipeRecord) -> Result<(), EngineError>;
}
