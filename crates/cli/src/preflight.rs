//! Interactive pre-flight for production `migrate`
//!
//! Shows the plan, asks for confirmation and then counts down, so an operator
//! has two chances to stop the batch before the first forward step. Everything
//! is written to stderr.

use std::time::Duration;

use async_trait::async_trait;
use console::{style, Emoji};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, InquireError};
use keel_migrate::{Environment, MigrateError, MigrateResult, MigrationId, PreflightGate};

static WARNING: Emoji<'_, '_> = Emoji("⚠️  ", "! ");

/// Confirmation prompt followed by an interruptible countdown
#[derive(Debug, Clone)]
pub struct InteractiveGate {
    delay: Duration,
    assume_yes: bool,
}

impl InteractiveGate {
    pub fn new(delay: Duration, assume_yes: bool) -> Self {
        Self { delay, assume_yes }
    }

    async fn ask(&self, environment: &Environment) -> MigrateResult<()> {
        let message = format!("Apply these migrations to '{}'?", environment);
        let answer = tokio::task::spawn_blocking(move || {
            Confirm::new(&message)
                .with_default(false)
                .with_help_message("Pass --yes to skip this prompt in scripted runs")
                .prompt()
        })
        .await
        .map_err(|e| MigrateError::Aborted {
            reason: format!("confirmation prompt failed: {}", e),
        })?;

        match answer {
            Ok(true) => Ok(()),
            Ok(false) => Err(MigrateError::Aborted {
                reason: "declined by operator".to_string(),
            }),
            Err(InquireError::NotTTY) => Err(MigrateError::Aborted {
                reason: "no terminal available for confirmation; pass --yes to proceed".to_string(),
            }),
            Err(InquireError::OperationCanceled) | Err(InquireError::OperationInterrupted) => {
                Err(MigrateError::Aborted {
                    reason: "confirmation cancelled".to_string(),
                })
            }
            Err(e) => Err(MigrateError::Aborted {
                reason: format!("confirmation prompt failed: {}", e),
            }),
        }
    }

    async fn countdown(&self) -> MigrateResult<()> {
        let secs = self.delay.as_secs();
        if secs == 0 {
            return Ok(());
        }

        let pb = ProgressBar::new(secs);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{bar:30.yellow}] {pos}/{len}s")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        pb.set_message("Starting in");

        let ticks = async {
            for _ in 0..secs {
                tokio::time::sleep(Duration::from_secs(1)).await;
                pb.inc(1);
            }
        };

        tokio::select! {
            _ = ticks => {
                pb.finish_and_clear();
                Ok(())
            }
            _ = tokio::signal::ctrl_c() => {
                pb.abandon_with_message("Interrupted");
                Err(MigrateError::Aborted {
                    reason: "interrupted during countdown".to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl PreflightGate for InteractiveGate {
    async fn confirm(&self, environment: &Environment, pending: &[MigrationId]) -> MigrateResult<()> {
        eprintln!();
        eprintln!(
            "{}{}",
            WARNING,
            style(format!("'{}' is a production environment", environment))
                .yellow()
                .bold()
        );
        eprintln!("   {} migration(s) will be applied, in order:", pending.len());
        for id in pending {
            eprintln!("     {} {}", style("→").dim(), id);
        }
        eprintln!();

        if self.assume_yes {
            tracing::info!(environment = %environment, "confirmation skipped (--yes)");
        } else {
            self.ask(environment).await?;
        }

        self.countdown().await
    }
}
