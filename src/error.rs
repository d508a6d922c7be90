//! Error types for slidegate.

use thiserror::Error;

/// Main error type for slidegate operations.
///
/// Only configuration paths produce errors. Admission checks never fail.
#[derive(Error, Debug)]
pub enum GateError {
    /// A limit was rejected before it could be installed
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration source could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for GateError {
    fn from(err: config::ConfigError) -> Self {
        GateError::Config(err.to_string())
    }
}

/// Result type alias for slidegate operations.
pub type Result<T> = std::result::Result<T, GateError>;
