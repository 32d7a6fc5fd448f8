//! Database handles the engine runs against
//!
//! A [`MigrationBackend`] hands out [`MigrationTransaction`]s. Migration
//! units only ever see the narrower [`SchemaHandle`] view of a transaction,
//! so they can execute statements but cannot commit, roll back, or touch the
//! tracking table.

use async_trait::async_trait;

use crate::error::MigrateResult;
use crate::state::{AppliedRecord, TrackingTable};

pub mod memory;
pub mod postgres;

pub use memory::MemoryDatabase;
pub use postgres::PgBackend;

/// Statement execution inside an open transaction
#[async_trait]
pub trait SchemaHandle: Send {
    /// Execute a SQL script, returning the number of rows affected
    async fn execute(&mut self, sql: &str) -> MigrateResult<u64>;
}

/// An open unit of work against the target database
#[async_trait]
pub trait MigrationTransaction: SchemaHandle {
    /// The statement-only view handed to migration units
    fn schema(&mut self) -> &mut dyn SchemaHandle;

    /// Create the tracking table if it does not exist
    async fn ensure_tracking_table(&mut self, table: &TrackingTable) -> MigrateResult<()>;

    /// All tracking rows in insertion order
    async fn applied_records(&mut self, table: &TrackingTable) -> MigrateResult<Vec<AppliedRecord>>;

    /// Insert the tracking row for `identifier`; `applied_at` comes from the
    /// database clock
    async fn insert_record(&mut self, table: &TrackingTable, identifier: &str) -> MigrateResult<AppliedRecord>;

    /// Delete the tracking row for `identifier`, returning rows removed
    async fn delete_record(&mut self, table: &TrackingTable, identifier: &str) -> MigrateResult<u64>;

    async fn commit(self: Box<Self>) -> MigrateResult<()>;

    async fn rollback(self: Box<Self>) -> MigrateResult<()>;
}

/// Source of transactions for one target database
#[async_trait]
pub trait MigrationBackend: Send + Sync {
    async fn begin(&self) -> MigrateResult<Box<dyn MigrationTransaction>>;

    /// Human readable, credential-free description of the target
    fn describe(&self) -> String;
}

#[async_trait]
impl<B: MigrationBackend + ?Sized> MigrationBackend for std::sync::Arc<B> {
    async fn begin(&self) -> MigrateResult<Box<dyn MigrationTransaction>> {
        (**self).begin().await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Roll back a transaction that is being abandoned because of an earlier
/// error. A failed rollback is logged; the caller still reports the original
/// error, and the database discards the transaction when the connection ends.
pub(crate) async fn abandon(tx: Box<dyn MigrationTransaction>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "transaction rollback failed");
    }
}
