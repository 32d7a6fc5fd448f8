//! `status`, `migrate` and `rollback` against one environment

use console::style;
use keel_migrate::{MigrateError, MigrationBackend, MigrationHooks, MigrationRunner};

use super::Outcome;
use crate::output::{self, OutputFormat};

/// Progress lines printed while units run; silent in JSON mode
pub fn progress_hooks(format: OutputFormat) -> MigrationHooks {
    if format.is_json() {
        return MigrationHooks::default();
    }

    MigrationHooks {
        before_migration: Some(Box::new(|id: &str| {
            println!("  {} {}", style("→").cyan(), id);
        })),
        after_migration: Some(Box::new(|id: &str| {
            println!("  {} {}", style("✓").green(), id);
        })),
        on_error: Some(Box::new(|id: &str, _error: &MigrateError| {
            println!("  {} {}", style("✗").red(), id);
        })),
    }
}

pub async fn status<B: MigrationBackend>(
    runner: &mut MigrationRunner<B>,
    format: OutputFormat,
) -> anyhow::Result<Outcome> {
    let report = runner.status().await?;
    output::print_status(&report, format)?;

    Ok(if report.has_drift() {
        Outcome::Drift
    } else {
        Outcome::Success
    })
}

pub async fn run<B: MigrationBackend>(
    runner: &mut MigrationRunner<B>,
    format: OutputFormat,
) -> anyhow::Result<Outcome> {
    let result = runner.migrate().await?;
    output::print_migrate(&result, format)?;
    Ok(Outcome::Success)
}

pub async fn rollback<B: MigrationBackend>(
    runner: &mut MigrationRunner<B>,
    format: OutputFormat,
) -> anyhow::Result<Outcome> {
    let result = runner.rollback().await?;
    output::print_rollback(&result, format)?;
    Ok(Outcome::Success)
}
