//! Session configuration.
//!
//! ```toml
//! dialect = "sqlite"
//! log_statements = true
//! ```

use crate::error::ConfigError;
use crate::render::{Dialect, DialectKind};
use serde::{Deserialize, Serialize};

/// Settings for a [`Session`](crate::execute::Session)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// SQL dialect commands are rendered for
    #[serde(default)]
    pub dialect: DialectKind,

    /// Log every command text at info level (debug otherwise)
    #[serde(default)]
    pub log_statements: bool,
}

impl QueryConfig {
    pub fn new(dialect: DialectKind) -> Self {
        Self {
            dialect,
            ..Default::default()
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn with_statement_logging(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    pub fn dialect(&self) -> &'static dyn Dialect {
        self.dialect.dialect()
    }
}
