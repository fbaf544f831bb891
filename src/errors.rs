use crate::models::MachineStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Unknown machine id or date.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The guard failed against the latest stored state. Not retryable
    /// without a different action.
    #[error("Invalid transition: machine {machine_id} is '{current}', cannot {attempted}")]
    InvalidTransition {
        machine_id: i64,
        current: MachineStatus,
        attempted: &'static str,
    },

    /// The stored version moved between read and write. Retryable by
    /// re-reading and re-deciding against fresh state.
    #[error("Machine state changed concurrently (machine {0})")]
    Conflict(i64),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
}

// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
