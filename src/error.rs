//! Error types for the playback state store.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for store operations.
///
/// Most of these never reach callers of [`crate::PlaybackStore`]: the trait
/// methods log them and return an empty or no-op result. Only construction
/// (configuration) errors propagate.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "mariadb")]
    #[error("MariaDB error: {0}")]
    MariaDb(#[from] mysql::Error),

    #[error("Timed out after {waited:?} waiting for lock: {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("Lock is no longer held by this owner: {0}")]
    LockLost(PathBuf),

    #[error("Checksum mismatch for {path}: expected {expected}, got {got}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        got: String,
    },

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
