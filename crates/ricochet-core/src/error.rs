//! Error types for Ricochet

use thiserror::Error;

/// Ricochet error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Program error: {0}")]
    Program(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A field was popped off an access path that has no field sequence.
    #[error("Access path {0} has no field sequence")]
    EmptyFieldSequence(String),

    /// Raised by the scheduler when a query runs past its time budget.
    #[error("Time budget of {budget_ms} ms exceeded after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64, budget_ms: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Ricochet
pub type Result<T> = std::result::Result<T, Error>;
