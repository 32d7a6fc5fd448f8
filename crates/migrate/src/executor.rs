//! Transactional Executor - one unit, one transaction
//!
//! A unit's body and its tracking-table mutation commit together or not at
//! all. On any error the transaction is rolled back and the error is returned
//! to the caller; nothing is retried.

use std::time::Instant;

use tracing::{error, info};

use crate::backend::{abandon, MigrationBackend, MigrationTransaction};
use crate::error::{Direction, MigrateError, MigrateResult};
use crate::state::{AppliedRecord, StateStore};
use crate::unit::MigrationUnit;

/// Applies and reverts single migration units
#[derive(Debug, Clone, Default)]
pub struct Executor {
    store: StateStore,
}

impl Executor {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Run `unit.up` and insert its tracking record in one transaction
    pub async fn run_forward(
        &self,
        unit: &dyn MigrationUnit,
        backend: &dyn MigrationBackend,
    ) -> MigrateResult<AppliedRecord> {
        let identifier = unit.id().to_string();
        let start = Instant::now();
        let mut tx = backend.begin().await?;

        let outcome = self.forward(unit, tx.as_mut(), &identifier).await;

        let record = self.finish(tx, outcome, &identifier, Direction::Up).await?;
        info!(
            identifier = %identifier,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "migration applied"
        );
        Ok(record)
    }

    /// Run `unit.down` and delete its tracking record in one transaction
    pub async fn run_backward(&self, unit: &dyn MigrationUnit, backend: &dyn MigrationBackend) -> MigrateResult<()> {
        let identifier = unit.id().to_string();
        if !unit.is_reversible() {
            return Err(MigrateError::NotReversible { identifier });
        }

        let start = Instant::now();
        let mut tx = backend.begin().await?;

        let outcome = self.backward(unit, tx.as_mut(), &identifier).await;

        self.finish(tx, outcome, &identifier, Direction::Down).await?;
        info!(
            identifier = %identifier,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "migration reverted"
        );
        Ok(())
    }

    async fn forward(
        &self,
        unit: &dyn MigrationUnit,
        tx: &mut dyn MigrationTransaction,
        identifier: &str,
    ) -> MigrateResult<AppliedRecord> {
        unit.up(tx.schema())
            .await
            .map_err(|e| wrap(identifier, Direction::Up, e))?;
        self.store.record_applied(tx, identifier).await
    }

    async fn backward(
        &self,
        unit: &dyn MigrationUnit,
        tx: &mut dyn MigrationTransaction,
        identifier: &str,
    ) -> MigrateResult<()> {
        unit.down(tx.schema())
            .await
            .map_err(|e| wrap(identifier, Direction::Down, e))?;
        self.store.record_reverted(tx, identifier).await
    }

    /// Commit on success, roll back on failure
    async fn finish<T>(
        &self,
        tx: Box<dyn MigrationTransaction>,
        outcome: MigrateResult<T>,
        identifier: &str,
        direction: Direction,
    ) -> MigrateResult<T> {
        match outcome {
            Ok(value) => {
                tx.commit()
                    .await
                    .map_err(|e| wrap(identifier, direction, e))?;
                Ok(value)
            }
            Err(e) => {
                error!(identifier = %identifier, direction = %direction, error = %e, "migration failed, rolling back");
                abandon(tx).await;
                Err(e)
            }
        }
    }
}

/// Attach the unit and direction to an error from inside its transaction
fn wrap(identifier: &str, direction: Direction, source: MigrateError) -> MigrateError {
    match source {
        already @ MigrateError::Apply { .. } => already,
        source => MigrateError::Apply {
            identifier: identifier.to_string(),
            direction,
            source: Box::new(source),
        },
    }
}
