//! PostgreSQL backend built on a sqlx connection pool

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool, Postgres, Row, Transaction};
use tracing::debug;

use super::{MigrationBackend, MigrationTransaction, SchemaHandle};
use crate::error::{MigrateError, MigrateResult};
use crate::state::{AppliedRecord, TrackingTable};

/// Connection pool settings for a migration run
#[derive(Debug, Clone)]
pub struct PgBackendConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PgBackendConfig {
    fn default() -> Self {
        // One transaction is open at a time, so a small pool is enough.
        Self {
            max_connections: 2,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Migration backend for a PostgreSQL database
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
    description: String,
}

impl PgBackend {
    /// Wrap an existing pool
    pub fn new(pool: PgPool, description: impl Into<String>) -> Self {
        Self {
            pool,
            description: description.into(),
        }
    }

    /// Connect to `database_url`; `description` is what gets displayed
    pub async fn connect(
        database_url: &str,
        description: impl Into<String>,
        config: &PgBackendConfig,
    ) -> MigrateResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(database_url)
            .await?;

        Ok(Self::new(pool, description))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MigrationBackend for PgBackend {
    async fn begin(&self) -> MigrateResult<Box<dyn MigrationTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// Open PostgreSQL transaction
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SchemaHandle for PgTransaction {
    async fn execute(&mut self, sql: &str) -> MigrateResult<u64> {
        // A bare &str goes through the simple query protocol, which accepts
        // multi-statement scripts and dollar-quoted blocks.
        let result = (&mut *self.tx).execute(sql).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MigrationTransaction for PgTransaction {
    fn schema(&mut self) -> &mut dyn SchemaHandle {
        self
    }

    async fn ensure_tracking_table(&mut self, table: &TrackingTable) -> MigrateResult<()> {
        (&mut *self.tx).execute(table.create_table_sql().as_str()).await?;
        Ok(())
    }

    async fn applied_records(&mut self, table: &TrackingTable) -> MigrateResult<Vec<AppliedRecord>> {
        let sql = table.select_applied_sql();
        let rows = sqlx::query(&sql).fetch_all(&mut *self.tx).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let identifier: String = row.try_get("identifier").map_err(|e| {
                MigrateError::StateStore(format!("failed to read identifier: {}", e))
            })?;
            let applied_at: chrono::DateTime<chrono::Utc> = row.try_get("applied_at").map_err(|e| {
                MigrateError::StateStore(format!("failed to read applied_at: {}", e))
            })?;

            records.push(AppliedRecord {
                identifier,
                applied_at,
            });
        }

        Ok(records)
    }

    async fn insert_record(&mut self, table: &TrackingTable, identifier: &str) -> MigrateResult<AppliedRecord> {
        let sql = table.insert_sql();
        let row = sqlx::query(&sql)
            .bind(identifier)
            .fetch_one(&mut *self.tx)
            .await?;
        let applied_at: chrono::DateTime<chrono::Utc> = row.try_get("applied_at").map_err(|e| {
            MigrateError::StateStore(format!("failed to read applied_at: {}", e))
        })?;

        Ok(AppliedRecord::new(identifier, applied_at))
    }

    async fn delete_record(&mut self, table: &TrackingTable, identifier: &str) -> MigrateResult<u64> {
        let sql = table.delete_sql();
        let result = sqlx::query(&sql)
            .bind(identifier)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> MigrateResult<()> {
        self.tx.commit().await?;
        debug!("transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MigrateResult<()> {
        self.tx.rollback().await?;
        debug!("transaction rolled back");
        Ok(())
    }
}
