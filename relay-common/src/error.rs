//! Error types for the chat relay.

use thiserror::Error;

/// Result type alias using the relay error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the relay's administrative operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid input or request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Persistent storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote completion service failure
    #[error("External service error: {0}")]
    External(String),
}

impl Error {
    /// Check if this error was caused by bad caller input.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }
}
