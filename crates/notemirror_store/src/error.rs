//! Error types for store operations.

use notemirror_types::CodecError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying database reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A persisted note could not be encoded or decoded.
    #[error("note codec error: {0}")]
    Codec(#[from] CodecError),

    /// A persisted task or reminder could not be encoded or decoded.
    #[error("task codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// The database file does not exist.
    #[error("database file {} does not exist", .0.display())]
    NotFound(PathBuf),

    /// The database file already exists and overwriting was not requested.
    #[error("database file {} already exists", .0.display())]
    AlreadyExists(PathBuf),

    /// The file is not a mirror database.
    #[error("invalid database: {0}")]
    InvalidDatabase(String),

    /// The schema was upgraded in a way that discarded content; all
    /// watermarks were reset and the next sync starts from scratch.
    #[error("database was upgraded and needs a full resync")]
    ResyncRequired,

    /// A value cannot be represented in the database.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
