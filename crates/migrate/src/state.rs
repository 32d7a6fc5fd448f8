//! State Store - durable record of applied migrations
//!
//! The tracking table holds one row per applied unit. Rows are inserted and
//! deleted only from inside the executor's transaction, next to the schema
//! change they describe.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::backend::{abandon, MigrationBackend, MigrationTransaction};
use crate::error::{MigrateError, MigrateResult};

/// Default name of the tracking table
pub const DEFAULT_TRACKING_TABLE: &str = "keel_migrations";

/// Row in the tracking table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedRecord {
    pub identifier: String,
    pub applied_at: DateTime<Utc>,
}

impl AppliedRecord {
    pub fn new(identifier: impl Into<String>, applied_at: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.into(),
            applied_at,
        }
    }
}

/// Tracking table name and the PostgreSQL statements that operate on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingTable {
    name: String,
}

impl TrackingTable {
    /// Create a tracking table description; `name` may be schema-qualified
    pub fn new(name: impl Into<String>) -> MigrateResult<Self> {
        let name = name.into();
        let valid_part = |part: &str| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        };

        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() > 2 || !parts.iter().all(|p| valid_part(p)) {
            return Err(MigrateError::Configuration(format!(
                "invalid tracking table name '{}': expected [schema.]table made of letters, digits and underscores",
                name
            )));
        }

        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// SQL to create the tracking table
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                id BIGSERIAL PRIMARY KEY,\n    \
                identifier VARCHAR(255) NOT NULL UNIQUE,\n    \
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now()\n\
            )",
            self.name
        )
    }

    /// SQL to list applied migrations in insertion order. The surrogate key
    /// only grows, so ordering by it does not depend on any client's clock.
    pub fn select_applied_sql(&self) -> String {
        format!(
            "SELECT identifier, applied_at FROM {} ORDER BY id ASC",
            self.name
        )
    }

    /// SQL to record a migration as applied; the database assigns `applied_at`
    pub fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (identifier) VALUES ($1) RETURNING applied_at",
            self.name
        )
    }

    /// SQL to remove a migration record (for rollback)
    pub fn delete_sql(&self) -> String {
        format!("DELETE FROM {} WHERE identifier = $1", self.name)
    }
}

impl Default for TrackingTable {
    fn default() -> Self {
        Self {
            name: DEFAULT_TRACKING_TABLE.to_string(),
        }
    }
}

/// Reads and writes applied-migration bookkeeping
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    table: TrackingTable,
}

impl StateStore {
    pub fn new(table: TrackingTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &TrackingTable {
        &self.table
    }

    /// Create the tracking table if absent; safe to call on every invocation
    pub async fn ensure_schema(&self, backend: &dyn MigrationBackend) -> MigrateResult<()> {
        let mut tx = backend.begin().await?;
        match tx.ensure_tracking_table(&self.table).await {
            Ok(()) => {
                tx.commit().await?;
                debug!(table = %self.table.name(), "tracking table ready");
                Ok(())
            }
            Err(e) => {
                abandon(tx).await;
                Err(e)
            }
        }
    }

    /// All applied records in application order
    pub async fn applied_records(&self, backend: &dyn MigrationBackend) -> MigrateResult<Vec<AppliedRecord>> {
        let mut tx = backend.begin().await?;
        match tx.applied_records(&self.table).await {
            Ok(records) => {
                tx.commit().await?;
                Ok(records)
            }
            Err(e) => {
                abandon(tx).await;
                Err(e)
            }
        }
    }

    /// Identifiers of all applied records in application order
    pub async fn applied_identifiers(&self, backend: &dyn MigrationBackend) -> MigrateResult<Vec<String>> {
        let records = self.applied_records(backend).await?;
        Ok(records.into_iter().map(|r| r.identifier).collect())
    }

    /// Insert the record for `identifier` inside the caller's transaction
    pub async fn record_applied(
        &self,
        tx: &mut dyn MigrationTransaction,
        identifier: &str,
    ) -> MigrateResult<AppliedRecord> {
        tx.insert_record(&self.table, identifier).await
    }

    /// Delete the record for `identifier` inside the caller's transaction
    pub async fn record_reverted(&self, tx: &mut dyn MigrationTransaction, identifier: &str) -> MigrateResult<()> {
        let removed = tx.delete_record(&self.table, identifier).await?;
        if removed != 1 {
            return Err(MigrateError::StateStore(format!(
                "expected to remove one record for {} from {}, removed {}",
                identifier,
                self.table.name(),
                removed
            )));
        }
        Ok(())
    }
}
