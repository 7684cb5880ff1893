//! SQLite connection settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MEMORY_PATH: &str = ":memory:";

/// Connection and PRAGMA settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file, or `:memory:`
    pub path: PathBuf,

    /// `journal_mode = WAL` with `synchronous = NORMAL`
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    #[serde(default = "default_true")]
    pub foreign_keys: bool,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Negative values are KiB, positive values are pages
    #[serde(default = "default_cache_size")]
    pub cache_size: i64,

    /// Zero disables memory-mapped I/O
    #[serde(default)]
    pub mmap_size: u64,
}

fn default_true() -> bool {
    true
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_cache_size() -> i64 {
    -16_000
}

impl SqliteConfig {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            wal_mode: true,
            foreign_keys: true,
            busy_timeout_ms: default_busy_timeout_ms(),
            cache_size: default_cache_size(),
            mmap_size: 0,
        }
    }

    /// In-memory database; WAL does not apply
    pub fn memory() -> Self {
        Self {
            wal_mode: false,
            ..Self::new(MEMORY_PATH)
        }
    }

    pub fn is_memory(&self) -> bool {
        self.path.as_os_str() == MEMORY_PATH
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self::memory()
    }
}
