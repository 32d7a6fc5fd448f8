pub mod migrate;

use keel_migrate::MigrateError;

/// Successful end states of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// `status` found orphaned records
    Drift,
}

/// Process exit codes
pub mod exit {
    pub const SUCCESS: u8 = 0;
    pub const FAILURE: u8 = 1;
    pub const DRIFT: u8 = 2;
    pub const REFUSED: u8 = 3;
}

/// Map a command result onto the process exit code
pub fn exit_code(result: &anyhow::Result<Outcome>) -> u8 {
    match result {
        Ok(Outcome::Success) => exit::SUCCESS,
        Ok(Outcome::Drift) => exit::DRIFT,
        Err(e) => match e.downcast_ref::<MigrateError>() {
            Some(migrate_error) if migrate_error.is_refusal() => exit::REFUSED,
            _ => exit::FAILURE,
        },
    }
}
