//! Error types for the query pipeline.
//!
//! Each stage has its own error enum; [`QueryError`] aggregates them for
//! callers that drive the whole pipeline. None of these are transient: they
//! describe a query the engine does not understand, an AST that violates an
//! invariant, or rows that cannot be materialized.

use std::fmt;
use thiserror::Error;

/// Boxed error returned by an [`Executor`](crate::execute::Executor)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while translating a quoted function tree into SQL
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslateError {
    /// The node shape is outside the recognized catalog
    #[error("unsupported {kind}: {node}")]
    UnsupportedConstruct { kind: String, node: String },

    #[error("parameter `{name}` is not bound in this scope")]
    UnboundParameter { name: String },

    #[error("`{owner}` has no member `{member}`")]
    UnknownMember { owner: String, member: String },

    #[error("unknown table `{name}`")]
    UnknownTable { name: String },

    #[error("lambda takes {found} parameter(s) but {expected} source(s) are in scope: {node}")]
    ArityMismatch {
        expected: usize,
        found: usize,
        node: String,
    },
}

impl TranslateError {
    pub(crate) fn unsupported(kind: impl Into<String>, node: impl fmt::Display) -> Self {
        Self::UnsupportedConstruct {
            kind: kind.into(),
            node: node.to_string(),
        }
    }
}

/// Errors raised while composing a query tree into commands
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComposeError {
    /// The tree shape is outside the composer's catalog
    #[error("unsupported query shape {kind}: {node}")]
    UnsupportedConstruct { kind: String, node: String },

    #[error("insert into `{table}` has no rows")]
    EmptyInsert { table: String },

    #[error("insert into `{table}`: row {row} has {found} values for {expected} columns")]
    RowArity {
        table: String,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("update of `{table}` assigns no columns")]
    EmptyUpdate { table: String },

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// AST invariant violations found while rendering
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("select core has both table sources and a join clause")]
    ConflictingSources,

    #[error("select core has no result columns")]
    EmptyResultColumns,

    #[error("select statement has no cores")]
    EmptySelect,

    #[error("{cores} select cores require a compound operator")]
    MissingCompoundOperator { cores: usize },

    #[error("insert into `{table}` has no rows")]
    EmptyInsert { table: String },

    #[error("insert row {row} has {found} values for {expected} columns")]
    RowArity {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("update of `{table}` has no assignments")]
    EmptyUpdate { table: String },
}

/// A single value could not be converted to the requested type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertError {
    pub target: &'static str,
    pub found: &'static str,
    pub detail: Option<String>,
}

impl ConvertError {
    pub fn new(target: &'static str, found: &'static str) -> Self {
        Self {
            target,
            found,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl fmt::Display) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot convert {} to {}", self.found, self.target)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConvertError {}

/// A constructor argument or setter could not be filled from a row
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("column `{column}`: {cause}")]
pub struct FieldError {
    pub column: String,
    pub target: &'static str,
    pub cause: ConvertError,
}

/// Errors raised while materializing rows into typed values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("no constructor of `{target}` matches columns [{}] in `{statement}`", .columns.join(", "))]
    NoMatchingConstructor {
        target: &'static str,
        columns: Vec<String>,
        statement: String,
    },

    #[error("cannot bind column `{column}` to `{target}` in `{statement}`: {cause}")]
    ConversionFailure {
        column: String,
        target: &'static str,
        #[source]
        cause: ConvertError,
        statement: String,
    },
}

/// Errors raised while running a command list
#[derive(Error, Debug)]
pub enum ExecuteError {
    /// The executor failed; the command text is attached, parameters are not
    #[error("executor failed on `{command}`: {source}")]
    Executor {
        command: String,
        #[source]
        source: BoxError,
    },

    #[error("execution cancelled after {completed} of {total} command(s)")]
    Cancelled { completed: usize, total: usize },

    #[error("no value supplied for input `{name}`")]
    MissingInput { name: String },

    #[error("command list is empty")]
    EmptyCommandList,

    #[error("expected a single value from `{command}`, got {rows} row(s) of {columns} column(s)")]
    NotScalar {
        command: String,
        rows: usize,
        columns: usize,
    },

    #[error("`{command}` produced {found}, expected {expected}")]
    UnexpectedOutcome {
        command: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error(transparent)]
    Bind(#[from] BindError),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid query config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Umbrella error for callers driving the whole pipeline
#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Execute(#[from] ExecuteError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type TranslateResult<T> = Result<T, TranslateError>;
pub type ComposeResult<T> = Result<T, ComposeError>;
pub type RenderResult<T> = Result<T, RenderError>;
pub type BindResult<T> = Result<T, BindError>;
pub type ExecuteResult<T> = Result<T, ExecuteError>;
pub type QueryResult<T> = Result<T, QueryError>;
