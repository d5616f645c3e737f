//! Store errors.

use std::io;

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open store at {location}: {source}")]
    Open {
        location: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("store at {0} is read-only")]
    ReadOnly(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}
