//! # keel-migrate: transactional schema migrations
//!
//! Applies an ordered, statically registered set of migration units to a
//! database exactly once each, records what ran in a tracking table, reverts
//! the most recent unit on request, and reports drift between the registry
//! and the recorded state.
//!
//! ```rust,no_run
//! use keel_migrate::{Environment, MigrationRegistry, MigrationRunner, PgBackend, SqlMigration};
//! use keel_migrate::backend::postgres::PgBackendConfig;
//!
//! # async fn example() -> keel_migrate::MigrateResult<()> {
//! let registry = MigrationRegistry::builder()
//!     .register(
//!         SqlMigration::new("001_create_users", "CREATE TABLE users (id BIGSERIAL PRIMARY KEY)")?
//!             .with_down("DROP TABLE users"),
//!     )
//!     .build()?;
//!
//! let backend = PgBackend::connect("postgres://localhost/app", "local", &PgBackendConfig::default()).await?;
//! let mut runner = MigrationRunner::new(registry, backend, Environment::new("development"));
//! let result = runner.migrate().await?;
//! println!("applied {} migration(s)", result.applied_count());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod environment;
pub mod error;
pub mod executor;
pub mod identifier;
pub mod preflight;
pub mod registry;
pub mod runner;
pub mod sql;
pub mod state;
pub mod status;
pub mod unit;

pub use backend::{MemoryDatabase, MigrationBackend, MigrationTransaction, PgBackend, SchemaHandle};
pub use environment::Environment;
pub use error::{Direction, MigrateError, MigrateResult};
pub use executor::Executor;
pub use identifier::MigrationId;
pub use preflight::{DelayGate, DenyGate, PreflightGate};
pub use registry::{MigrationRegistry, RegistryBuilder, RegistrySnapshot};
pub use runner::{MigrationHooks, MigrationRunResult, MigrationRunner, RollbackResult, RunnerState};
pub use state::{AppliedRecord, StateStore, TrackingTable};
pub use status::{classify, Classification, DriftReport, StatusEntry, StatusReport};
pub use unit::{MigrationUnit, SqlMigration};
