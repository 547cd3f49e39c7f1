//! Error types for perfcore
//!
//! Capacity problems are never errors here: the cache evicts and the pools
//! discard. What remains are payload encoding failures, configuration
//! problems and misuse of a named pool.

use thiserror::Error;

/// Main error type for the performance core
#[derive(Error, Debug)]
pub enum CoreError {
    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Gzip compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A named pool already holds objects of a different type
    #[error("Pool '{pool}' holds a different object type")]
    PoolTypeMismatch { pool: String },

    /// Generic errors with context
    #[error("Core error: {0}")]
    Generic(String),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Convert anyhow errors to CoreError
impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Generic(err.to_string())
    }
}
