//! Error types for the migration engine
//!
//! Every failure the engine can report is a [`MigrateError`]. Errors raised
//! inside a transaction are never retried or swallowed; they travel up to the
//! runner, which decides to halt and report.

use std::fmt;

use crate::runner::RunnerState;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Direction a migration unit is executed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply the unit (run its `up` operation)
    Up,
    /// Revert the unit (run its `down` operation)
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Error types for migration operations
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Two or more units share an identifier; blocks every command
    #[error("duplicate migration identifiers: {}", .duplicates.join(", "))]
    Discovery { duplicates: Vec<String> },

    #[error("invalid migration identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    /// A unit body (or its bookkeeping) failed; its transaction was rolled back
    #[error("migration {identifier} failed while running {direction}: {source}")]
    Apply {
        identifier: String,
        direction: Direction,
        #[source]
        source: Box<MigrateError>,
    },

    #[error("migration {identifier} is not reversible: it has no down operation")]
    NotReversible { identifier: String },

    #[error("{operation} refused: environment '{environment}' is production")]
    PolicyRefusal {
        operation: &'static str,
        environment: String,
    },

    /// A `migrate` batch stopped at `failed`; everything in `committed` stays applied
    #[error(
        "migrate halted at {failed} after {} migration(s) committed: {source}",
        .committed.len()
    )]
    Halted {
        failed: String,
        committed: Vec<String>,
        #[source]
        source: Box<MigrateError>,
    },

    #[error("migrate aborted before the first migration: {reason}")]
    Aborted { reason: String },

    #[error("runner is unusable after an earlier failure (state: {state})")]
    RunnerFailed { state: RunnerState },

    #[error("state store error: {0}")]
    StateStore(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl MigrateError {
    /// Identifier of the unit that caused this error, when there is one
    pub fn identifier(&self) -> Option<&str> {
        match self {
            MigrateError::Apply { identifier, .. }
            | MigrateError::NotReversible { identifier }
            | MigrateError::InvalidIdentifier { identifier, .. } => Some(identifier),
            MigrateError::Halted { failed, .. } => Some(failed),
            _ => None,
        }
    }

    /// Whether this error is a deliberate refusal rather than a failure
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            MigrateError::PolicyRefusal { .. } | MigrateError::Aborted { .. }
        )
    }

    /// Innermost cause, skipping the `Halted` / `Apply` wrappers
    pub fn root_cause(&self) -> &MigrateError {
        match self {
            MigrateError::Halted { source, .. } | MigrateError::Apply { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}
