//! Error types shared by every core component

use thiserror::Error;

/// Result alias used throughout the core
pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Missing or malformed input supplied by the caller
    #[error("Validation error: {0}")]
    Validation(String),
    /// The requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),
    /// Storage engine failure; the surrounding transaction was rolled back
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    /// A thread panicked while holding the connection
    #[error("Storage connection poisoned")]
    Poisoned,
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether the caller is at fault (maps to a client error upstream)
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
