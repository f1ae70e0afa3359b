//! Oshinko error abstractions.

use thiserror::Error;

/// Application error variants.
#[derive(Debug, Error)]
pub enum AppError {
    /// The given input was invalid.
    #[error("validation error: {0}")]
    InvalidInput(String),
    /// The config map record is missing its cluster definition.
    #[error("config map {0} has no `config` data key")]
    MissingData(String),
}
