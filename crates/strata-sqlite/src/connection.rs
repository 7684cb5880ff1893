//! SQLite connection management
//!
//! Uses a simple Arc<Mutex<Connection>> pattern instead of r2d2 to avoid
//! version conflicts with other workspace crates.

use crate::config::SqliteConfig;
use crate::error::{SqliteError, SqliteResult};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// VM instructions between checks of the abort condition
const PROGRESS_OPS: i32 = 100;

/// Thread-safe SQLite connection wrapper
///
/// Statements are serialized through the mutex.
#[derive(Clone)]
pub struct SqlitePool {
    conn: Arc<Mutex<Connection>>,
    config: SqliteConfig,
}

/// Abort request for one statement. Set once the caller stops waiting.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl SqlitePool {
    pub fn new(config: SqliteConfig) -> SqliteResult<Self> {
        info!(path = ?config.path, "Opening SQLite connection");

        let conn = if config.is_memory() {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = config.path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SqliteError::Connection(format!("Failed to create directory: {}", e))
                })?;
            }
            Connection::open(&config.path)?
        };

        let pool = Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
        };
        pool.with_connection(|conn| pool.configure_pragmas(conn))?;

        Ok(pool)
    }

    /// In-memory database
    pub fn memory() -> SqliteResult<Self> {
        Self::new(SqliteConfig::memory())
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Execute a closure with the connection
    pub fn with_connection<F, T>(&self, f: F) -> SqliteResult<T>
    where
        F: FnOnce(&Connection) -> SqliteResult<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a closure with the connection unless `cancel` or `abort`
    /// fires first.
    ///
    /// Both are checked once the lock is held, before `f` runs. While `f`
    /// runs, a progress handler watching only this call's signals stops its
    /// statements; statements of other callers are never affected.
    pub fn with_cancellable<F, T>(
        &self,
        cancel: &CancellationToken,
        abort: &AbortFlag,
        f: F,
    ) -> SqliteResult<T>
    where
        F: FnOnce(&Connection) -> SqliteResult<T>,
    {
        let conn = self.conn.lock();
        let stopped = {
            let cancel = cancel.clone();
            let abort = abort.clone();
            move || cancel.is_cancelled() || abort.is_raised()
        };
        if stopped() {
            debug!("Skipping cancelled SQLite statement");
            return Err(SqliteError::Cancelled);
        }

        conn.progress_handler(PROGRESS_OPS, Some(stopped.clone()))?;
        let result = f(&conn);
        conn.progress_handler(0, None::<fn() -> bool>)?;

        match result {
            Err(_) if stopped() => Err(SqliteError::Cancelled),
            other => other,
        }
    }

    /// Run a batch of statements, e.g. table definitions
    pub fn execute_batch(&self, sql: &str) -> SqliteResult<()> {
        self.with_connection(|conn| Ok(conn.execute_batch(sql)?))
    }

    fn configure_pragmas(&self, conn: &Connection) -> SqliteResult<()> {
        debug!("Configuring SQLite pragmas");

        if self.config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        }

        if self.config.foreign_keys {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        }

        conn.execute_batch(&format!(
            "PRAGMA busy_timeout = {};",
            self.config.busy_timeout_ms
        ))?;
        conn.execute_batch(&format!("PRAGMA cache_size = {};", self.config.cache_size))?;

        if self.config.mmap_size > 0 {
            conn.execute_batch(&format!("PRAGMA mmap_size = {};", self.config.mmap_size))?;
        }

        conn.execute_batch("PRAGMA temp_store = MEMORY;")?;

        Ok(())
    }
}
