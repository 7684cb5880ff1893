//! Error types for the SQLite executor

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqliteError {
    /// Database could not be opened
    #[error("Connection error: {0}")]
    Connection(String),

    /// The statement was skipped or stopped by a cancellation request
    #[error("Statement cancelled")]
    Cancelled,

    /// The blocking worker panicked or was aborted
    #[error("Worker error: {0}")]
    Worker(String),

    /// Underlying rusqlite error
    #[error("SQLite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
}

pub type SqliteResult<T> = Result<T, SqliteError>;

impl From<tokio::task::JoinError> for SqliteError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Worker(err.to_string())
    }
}
