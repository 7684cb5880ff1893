//! SQLite executor for Strata
//!
//! This crate runs commands composed by `strata-query` against a SQLite
//! database through rusqlite.
//!
//! ## Features
//!
//! - **Executor**: [`SqliteExecutor`] implements the pipeline's executor capability
//! - **Cancellation**: a cancelled token skips or stops only the caller's own statement
//! - **WAL Mode**: Optimized for concurrent read access with write-ahead logging
//! - **Thread Safety**: Arc<Mutex<Connection>> pattern for concurrent access
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_query::{from, Inputs};
//! use strata_sqlite::{open_session, SqliteConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let session = open_session(SqliteConfig::new("./strata.db"))?;
//! let users = session
//!     .fetch(&from::<User>().take(10).produce(), &Inputs::new(), &CancellationToken::new())
//!     .await?;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod value;

// Re-exports
pub use config::SqliteConfig;
pub use connection::SqlitePool;
pub use error::{SqliteError, SqliteResult};
pub use executor::SqliteExecutor;

use strata_query::{DialectKind, QueryConfig, Session};

/// Open a database and wrap it in a session rendering SQLite SQL
pub fn open_session(config: SqliteConfig) -> SqliteResult<Session<SqliteExecutor>> {
    let pool = SqlitePool::new(config)?;
    Ok(session_for(pool))
}

/// Session over an existing pool
pub fn session_for(pool: SqlitePool) -> Session<SqliteExecutor> {
    Session::new(
        SqliteExecutor::new(pool),
        QueryConfig::new(DialectKind::Sqlite),
    )
}
