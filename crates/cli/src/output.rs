//! Rendering of command results
//!
//! Text output is for operators; JSON output is one document per invocation
//! on stdout for scripts.

use clap::ValueEnum;
use console::{style, Emoji};
use keel_migrate::{Classification, MigrateError, MigrationRunResult, RollbackResult, StatusReport};
use serde_json::{json, Value};

static CHECK: Emoji<'_, '_> = Emoji("✅ ", "");
static CROSS: Emoji<'_, '_> = Emoji("❌ ", "");
static STOP: Emoji<'_, '_> = Emoji("⛔ ", "");

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        self == OutputFormat::Json
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_status(report: &StatusReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Text => {
            print!("{}", render_status(report));
            Ok(())
        }
    }
}

pub fn render_status(report: &StatusReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} {} ({})\n\n",
        style("Migration status for").bold(),
        style(&report.environment).cyan().bold(),
        style(&report.target).dim()
    ));

    if report.entries.is_empty() {
        out.push_str("  No migrations registered.\n");
        return out;
    }

    for entry in &report.entries {
        let label = match entry.classification {
            Classification::Applied => style(format!("{:<8}", "applied")).green(),
            Classification::Pending => style(format!("{:<8}", "pending")).yellow(),
            Classification::Orphaned => style(format!("{:<8}", "orphaned")).red().bold(),
        };
        let applied_at = entry
            .applied_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_default();
        out.push_str(&format!(
            "  {}  {:<48} {}\n",
            label,
            entry.identifier,
            style(applied_at).dim()
        ));
    }

    out.push_str(&format!(
        "\n  {} applied, {} pending, {} orphaned\n",
        report.applied().len(),
        report.pending().len(),
        report.orphaned().len()
    ));
    if report.has_drift() {
        out.push_str(&format!(
            "\n  {}\n",
            style("Drift detected: the database has records for migrations this build does not know.")
                .red()
        ));
    }
    out
}

pub fn print_migrate(result: &MigrationRunResult, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(result),
        OutputFormat::Text => {
            print!("{}", render_migrate(result));
            Ok(())
        }
    }
}

pub fn render_migrate(result: &MigrationRunResult) -> String {
    if result.applied.is_empty() {
        return format!(
            "{}Nothing to migrate: '{}' is up to date ({} already applied)\n",
            CHECK, result.environment, result.skipped_count
        );
    }
    format!(
        "{}Applied {} migration(s) to '{}' in {}ms\n",
        CHECK,
        result.applied_count(),
        result.environment,
        result.execution_time_ms
    )
}

pub fn print_rollback(result: &RollbackResult, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(result),
        OutputFormat::Text => {
            print!("{}", render_rollback(result));
            Ok(())
        }
    }
}

pub fn render_rollback(result: &RollbackResult) -> String {
    match &result.reverted {
        Some(identifier) => format!(
            "{}Rolled back {} on '{}' in {}ms\n",
            CHECK, identifier, result.environment, result.execution_time_ms
        ),
        None => format!("{}Nothing to roll back on '{}'\n", CHECK, result.environment),
    }
}

/// Report a failed command: text to stderr, JSON to stdout
pub fn print_error(error: &anyhow::Error, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(&error_json(error)) {
            Ok(doc) => println!("{}", doc),
            Err(_) => eprintln!("{}", error),
        },
        OutputFormat::Text => eprint!("{}", render_error(error)),
    }
}

pub fn render_error(error: &anyhow::Error) -> String {
    let Some(migrate_error) = error.downcast_ref::<MigrateError>() else {
        return format!("{}{} {:#}\n", CROSS, style("Error:").red().bold(), error);
    };

    match migrate_error {
        MigrateError::PolicyRefusal { .. } | MigrateError::Aborted { .. } => {
            format!("{}{}\n", STOP, style(migrate_error).yellow().bold())
        }
        MigrateError::Halted {
            failed,
            committed,
            source,
        } => {
            let mut out = format!(
                "{}{} migration {} failed\n",
                CROSS,
                style("Error:").red().bold(),
                style(failed).bold()
            );
            out.push_str(&format!("   cause: {}\n", source.root_cause()));
            if committed.is_empty() {
                out.push_str("   no migrations were committed by this run\n");
            } else {
                out.push_str(&format!(
                    "   {} migration(s) committed before the failure and remain applied:\n",
                    committed.len()
                ));
                for id in committed {
                    out.push_str(&format!("     {}\n", id));
                }
            }
            out
        }
        other => format!("{}{} {}\n", CROSS, style("Error:").red().bold(), other),
    }
}

pub fn error_json(error: &anyhow::Error) -> Value {
    let Some(migrate_error) = error.downcast_ref::<MigrateError>() else {
        return json!({ "error": format!("{:#}", error), "kind": "error" });
    };

    let kind = if migrate_error.is_refusal() { "refused" } else { "failed" };
    let mut doc = json!({
        "error": migrate_error.to_string(),
        "kind": kind,
        "identifier": migrate_error.identifier(),
    });
    if let MigrateError::Halted { committed, source, .. } = migrate_error {
        doc["committed"] = json!(committed);
        doc["cause"] = json!(source.root_cause().to_string());
    }
    doc
}
