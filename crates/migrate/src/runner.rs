//! Migration Runner - sequences the registry, state store and executor
//!
//! Implements the `status`, `migrate` and `rollback` commands and enforces
//! the production safety policy:
//!
//! - `rollback` is refused outright in production environments.
//! - `migrate` passes a [`PreflightGate`] before its first forward step in
//!   production environments.
//!
//! Units are applied strictly one at a time, in registry order, each in its
//! own transaction. The first failure halts the batch; units committed
//! before it stay committed.

use std::fmt;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::MigrationBackend;
use crate::environment::Environment;
use crate::error::{MigrateError, MigrateResult};
use crate::executor::Executor;
use crate::identifier::MigrationId;
use crate::preflight::{DelayGate, PreflightGate};
use crate::registry::{MigrationRegistry, RegistrySnapshot};
use crate::state::{AppliedRecord, StateStore, TrackingTable};
use crate::status::{classify, StatusReport};

/// Lifecycle of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    /// Tracking table not yet ensured
    Uninitialized,
    Ready,
    /// A unit is being applied or reverted
    Executing,
    /// An operation failed; the runner accepts no further commands
    Failed,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerState::Uninitialized => write!(f, "uninitialized"),
            RunnerState::Ready => write!(f, "ready"),
            RunnerState::Executing => write!(f, "executing"),
            RunnerState::Failed => write!(f, "failed"),
        }
    }
}

/// Callbacks invoked around each unit of a `migrate` or `rollback`
#[allow(clippy::type_complexity)]
#[derive(Default)]
pub struct MigrationHooks {
    /// Called before a unit starts
    pub before_migration: Option<Box<dyn Fn(&str) + Send + Sync>>,
    /// Called after a unit committed
    pub after_migration: Option<Box<dyn Fn(&str) + Send + Sync>>,
    /// Called when a unit failed and was rolled back
    pub on_error: Option<Box<dyn Fn(&str, &MigrateError) + Send + Sync>>,
}

impl MigrationHooks {
    fn before(&self, identifier: &str) {
        if let Some(hook) = &self.before_migration {
            hook(identifier);
        }
    }

    fn after(&self, identifier: &str) {
        if let Some(hook) = &self.after_migration {
            hook(identifier);
        }
    }

    fn error(&self, identifier: &str, error: &MigrateError) {
        if let Some(hook) = &self.on_error {
            hook(identifier, error);
        }
    }
}

/// Result of running migrations
#[derive(Debug, Clone, Serialize)]
pub struct MigrationRunResult {
    pub environment: String,
    /// Records committed by this run, in order
    pub applied: Vec<AppliedRecord>,
    /// Units that were already applied before the run
    pub skipped_count: usize,
    /// Orphaned records seen while planning
    pub orphaned: Vec<String>,
    pub execution_time_ms: u128,
}

impl MigrationRunResult {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

/// Result of a rollback
#[derive(Debug, Clone, Serialize)]
pub struct RollbackResult {
    pub environment: String,
    /// The single reverted unit, or `None` when nothing was applied
    pub reverted: Option<String>,
    pub execution_time_ms: u128,
}

/// Orchestrates the migration commands for one environment
pub struct MigrationRunner<B> {
    registry: MigrationRegistry,
    snapshot: RegistrySnapshot,
    backend: B,
    environment: Environment,
    executor: Executor,
    preflight: Box<dyn PreflightGate>,
    hooks: MigrationHooks,
    state: RunnerState,
}

impl<B: MigrationBackend> MigrationRunner<B> {
    /// Create a runner; the registry snapshot is taken here and reused for
    /// every command this runner executes
    pub fn new(registry: MigrationRegistry, backend: B, environment: Environment) -> Self {
        let snapshot = registry.snapshot();
        Self {
            registry,
            snapshot,
            backend,
            environment,
            executor: Executor::default(),
            preflight: Box::new(DelayGate::default()),
            hooks: MigrationHooks::default(),
            state: RunnerState::Uninitialized,
        }
    }

    /// Use a custom tracking table
    pub fn with_tracking_table(mut self, table: TrackingTable) -> Self {
        self.executor = Executor::new(StateStore::new(table));
        self
    }

    /// Set the production pre-flight gate
    pub fn with_preflight(mut self, gate: impl PreflightGate + 'static) -> Self {
        self.preflight = Box::new(gate);
        self
    }

    pub fn with_hooks(mut self, hooks: MigrationHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn store(&self) -> &StateStore {
        self.executor.store()
    }

    /// Move to READY, creating the tracking table on first use
    async fn ensure_ready(&mut self) -> MigrateResult<()> {
        match self.state {
            RunnerState::Failed => Err(MigrateError::RunnerFailed { state: self.state }),
            RunnerState::Uninitialized => {
                if let Err(e) = self.executor.store().ensure_schema(&self.backend).await {
                    self.state = RunnerState::Failed;
                    return Err(e);
                }
                self.state = RunnerState::Ready;
                debug!(environment = %self.environment, "runner ready");
                Ok(())
            }
            RunnerState::Ready | RunnerState::Executing => Ok(()),
        }
    }

    async fn applied_records(&mut self) -> MigrateResult<Vec<AppliedRecord>> {
        match self.store().applied_records(&self.backend).await {
            Ok(records) => Ok(records),
            Err(e) => {
                self.state = RunnerState::Failed;
                Err(e)
            }
        }
    }

    /// Classify every identifier; read-only
    pub async fn status(&mut self) -> MigrateResult<StatusReport> {
        self.ensure_ready().await?;
        let applied = self.applied_records().await?;

        let report = StatusReport::build(
            self.environment.label(),
            self.backend.describe(),
            &self.snapshot,
            &applied,
        );
        for orphan in report.orphaned() {
            warn!(identifier = %orphan, "applied migration is missing from the registry");
        }
        Ok(report)
    }

    /// Identifiers `migrate` would apply, in order
    pub async fn plan(&mut self) -> MigrateResult<Vec<MigrationId>> {
        self.ensure_ready().await?;
        let applied = self.applied_records().await?;
        Ok(self.pending_ids(&applied))
    }

    fn pending_ids(&self, applied: &[AppliedRecord]) -> Vec<MigrationId> {
        let drift = classify(&self.snapshot, applied);
        self.snapshot
            .ids()
            .iter()
            .filter(|id| drift.pending.iter().any(|p| *id == p.as_str()))
            .cloned()
            .collect()
    }

    /// Apply every pending unit in registry order, stopping at the first failure
    pub async fn migrate(&mut self) -> MigrateResult<MigrationRunResult> {
        let start = Instant::now();
        self.ensure_ready().await?;

        let applied = self.applied_records().await?;
        let drift = classify(&self.snapshot, &applied);
        for orphan in &drift.orphaned {
            warn!(identifier = %orphan, "ignoring orphaned migration record");
        }
        let pending = self.pending_ids(&applied);

        if pending.is_empty() {
            info!(environment = %self.environment, "no pending migrations");
            return Ok(MigrationRunResult {
                environment: self.environment.label().to_string(),
                applied: Vec::new(),
                skipped_count: drift.applied.len(),
                orphaned: drift.orphaned,
                execution_time_ms: start.elapsed().as_millis(),
            });
        }

        if self.environment.requires_preflight() {
            self.preflight.confirm(&self.environment, &pending).await?;
        }

        info!(
            environment = %self.environment,
            pending = pending.len(),
            "applying migrations"
        );

        let mut committed: Vec<AppliedRecord> = Vec::with_capacity(pending.len());
        for id in &pending {
            let Some(unit) = self.registry.get(id.as_str()).cloned() else {
                self.state = RunnerState::Failed;
                return Err(MigrateError::Configuration(format!(
                    "migration {} vanished from the registry",
                    id
                )));
            };

            self.state = RunnerState::Executing;
            self.hooks.before(id.as_str());

            match self.executor.run_forward(unit.as_ref(), &self.backend).await {
                Ok(record) => {
                    self.hooks.after(id.as_str());
                    committed.push(record);
                    self.state = RunnerState::Ready;
                }
                Err(e) => {
                    self.state = RunnerState::Failed;
                    self.hooks.error(id.as_str(), &e);
                    warn!(
                        identifier = %id,
                        committed = committed.len(),
                        "migrate halted; later migrations were not attempted"
                    );
                    return Err(MigrateError::Halted {
                        failed: id.to_string(),
                        committed: committed.into_iter().map(|r| r.identifier).collect(),
                        source: Box::new(e),
                    });
                }
            }
        }

        Ok(MigrationRunResult {
            environment: self.environment.label().to_string(),
            applied: committed,
            skipped_count: drift.applied.len(),
            orphaned: drift.orphaned,
            execution_time_ms: start.elapsed().as_millis(),
        })
    }

    /// Revert the single most recently applied unit that is still registered
    pub async fn rollback(&mut self) -> MigrateResult<RollbackResult> {
        let start = Instant::now();

        // Policy is decided before touching the database.
        if !self.environment.allows_rollback() {
            return Err(MigrateError::PolicyRefusal {
                operation: "rollback",
                environment: self.environment.label().to_string(),
            });
        }

        self.ensure_ready().await?;
        let applied = self.applied_records().await?;

        let mut target = None;
        for record in applied.iter().rev() {
            if self.snapshot.contains(&record.identifier) {
                target = Some(record.identifier.clone());
                break;
            }
            warn!(
                identifier = %record.identifier,
                "skipping orphaned migration record during rollback"
            );
        }

        let Some(identifier) = target else {
            info!(environment = %self.environment, "nothing to roll back");
            return Ok(RollbackResult {
                environment: self.environment.label().to_string(),
                reverted: None,
                execution_time_ms: start.elapsed().as_millis(),
            });
        };

        let Some(unit) = self.registry.get(&identifier).cloned() else {
            self.state = RunnerState::Failed;
            return Err(MigrateError::Configuration(format!(
                "migration {} vanished from the registry",
                identifier
            )));
        };

        if !unit.is_reversible() {
            return Err(MigrateError::NotReversible { identifier });
        }

        self.state = RunnerState::Executing;
        self.hooks.before(&identifier);

        match self.executor.run_backward(unit.as_ref(), &self.backend).await {
            Ok(()) => {
                self.hooks.after(&identifier);
                self.state = RunnerState::Ready;
                Ok(RollbackResult {
                    environment: self.environment.label().to_string(),
                    reverted: Some(identifier),
                    execution_time_ms: start.elapsed().as_millis(),
                })
            }
            Err(e) => {
                self.state = RunnerState::Failed;
                self.hooks.error(&identifier, &e);
                Err(e)
            }
        }
    }
}
