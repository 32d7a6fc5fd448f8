//! Pre-flight gate run before `migrate` touches a production environment

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::environment::Environment;
use crate::error::{MigrateError, MigrateResult};
use crate::identifier::MigrationId;

/// Default countdown before a production batch starts
pub const DEFAULT_PREFLIGHT_DELAY: Duration = Duration::from_secs(10);

/// Confirmation step between planning and the first forward migration
#[async_trait]
pub trait PreflightGate: Send + Sync {
    /// Return `Ok` to proceed; an error (usually `Aborted`) cancels the batch
    /// before anything is executed
    async fn confirm(&self, environment: &Environment, pending: &[MigrationId]) -> MigrateResult<()>;
}

/// Waits a fixed delay, leaving the operator time to interrupt the process
#[derive(Debug, Clone)]
pub struct DelayGate {
    delay: Duration,
}

impl DelayGate {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for DelayGate {
    fn default() -> Self {
        Self::new(DEFAULT_PREFLIGHT_DELAY)
    }
}

#[async_trait]
impl PreflightGate for DelayGate {
    async fn confirm(&self, environment: &Environment, pending: &[MigrationId]) -> MigrateResult<()> {
        warn!(
            environment = %environment,
            pending = pending.len(),
            delay_secs = self.delay.as_secs(),
            "applying migrations to a production environment; interrupt now to abort"
        );
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// Gate that always refuses; useful for dry inspection of production
#[derive(Debug, Clone, Default)]
pub struct DenyGate;

#[async_trait]
impl PreflightGate for DenyGate {
    async fn confirm(&self, environment: &Environment, _pending: &[MigrationId]) -> MigrateResult<()> {
        Err(MigrateError::Aborted {
            reason: format!("pre-flight denied for environment '{}'", environment),
        })
    }
}
