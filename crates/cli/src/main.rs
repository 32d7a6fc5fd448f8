mod commands;
mod config;
mod logging;
mod migrations;
mod output;
mod preflight;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use keel_migrate::MigrationRunner;

use commands::{exit_code, Outcome};
use config::KeelConfig;
use logging::LoggingConfig;
use output::OutputFormat;
use preflight::InteractiveGate;

#[derive(Parser)]
#[command(name = "keel")]
#[command(version)]
#[command(about = "Apply, inspect and roll back schema migrations per environment")]
struct Cli {
    /// Target environment, as named in the config file
    environment: String,

    /// Command to run against the environment
    #[arg(value_enum)]
    command: Command,

    /// Path to the environment configuration
    #[arg(long, env = "KEEL_CONFIG", default_value = "keel.yaml")]
    config: PathBuf,

    /// Skip the production confirmation prompt (the countdown still runs)
    #[arg(short, long)]
    yes: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    log_json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Command {
    /// Show applied, pending and orphaned migrations
    Status,
    /// Apply every pending migration in order
    Migrate,
    /// Revert the most recently applied migration
    Rollback,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = LoggingConfig::new(&cli.log_level).with_json(cli.log_json);
    if let Err(e) = logging::init_logging(&logging) {
        eprintln!("failed to initialize logging: {:#}", e);
        return ExitCode::from(commands::exit::FAILURE);
    }

    let result = execute(&cli).await;
    if let Err(e) = &result {
        tracing::debug!(error = ?e, "command failed");
        output::print_error(e, cli.format);
    }
    ExitCode::from(exit_code(&result))
}

async fn execute(cli: &Cli) -> anyhow::Result<Outcome> {
    let registry = migrations::registry().context("migration registry is invalid")?;
    let config = KeelConfig::load(&cli.config)?;

    // Refuse before connecting; resolving would otherwise dial production.
    if cli.command == Command::Rollback {
        let settings = config.environment(&cli.environment)?;
        let environment =
            keel_migrate::Environment::new(&cli.environment).with_production(settings.production);
        if !environment.allows_rollback() {
            return Err(keel_migrate::MigrateError::PolicyRefusal {
                operation: "rollback",
                environment: environment.label().to_string(),
            }
            .into());
        }
    }

    let resolved = config::resolve(&config, &cli.environment).await?;
    tracing::info!(
        environment = %resolved.environment,
        production = resolved.environment.is_production(),
        "resolved environment"
    );

    let mut runner = MigrationRunner::new(registry, resolved.backend, resolved.environment)
        .with_tracking_table(resolved.tracking_table)
        .with_preflight(InteractiveGate::new(resolved.preflight_delay, cli.yes))
        .with_hooks(commands::migrate::progress_hooks(cli.format));

    match cli.command {
        Command::Status => commands::migrate::status(&mut runner, cli.format).await,
        Command::Migrate => commands::migrate::run(&mut runner, cli.format).await,
        Command::Rollback => commands::migrate::rollback(&mut runner, cli.format).await,
    }
}
