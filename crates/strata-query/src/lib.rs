//! Typed query composition and SQL translation for Strata
//!
//! Queries are built as immutable trees with a fluent API, compiled into one or
//! more dialect-specific SQL commands, run through a caller-supplied
//! [`Executor`], and bound back into typed values.
//!
//! ## Pipeline
//!
//! - **Query algebra** ([`query`]): `from::<T>().filter(..).map(..).take(..)`
//! - **Quoted functions** ([`quote`]): inspectable lambdas for predicates, keys,
//!   projections and setters
//! - **Translation** ([`translate`]): lambdas and sequence expressions to SQL AST
//! - **Composition** ([`compose`]): query trees to ordered command lists
//! - **Rendering** ([`render`]): SQL AST to dialect text plus named parameters
//! - **Binding** ([`bind`]): rows to scalars or records by column name
//! - **Execution** ([`execute`]): sequential, cancellable command runs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_query::{from, constant, lambda, param, Inputs, QueryConfig, Session};
//! use tokio_util::sync::CancellationToken;
//!
//! let session = Session::new(executor, QueryConfig::default());
//! let query = from::<User>()
//!     .filter(lambda(["u"], param("u").member("Name").equals(constant("Jeremy"))))
//!     .produce();
//! let users = session.fetch(&query, &Inputs::new(), &CancellationToken::new()).await?;
//! ```

pub mod bind;
pub mod compose;
pub mod config;
pub mod error;
pub mod execute;
pub mod model;
pub mod query;
pub mod quote;
pub mod render;
pub mod sql;
pub mod translate;
pub mod tree;
pub mod value;

// Re-exports
pub use bind::{bind_rows, Bind, ColumnInfo, RecordShape, RowSet, Shape};
pub use compose::{Command, Composer, ResultKind};
pub use config::QueryConfig;
pub use error::{
    BindError, BoxError, ComposeError, ConfigError, ExecuteError, QueryError, QueryResult,
    RenderError, TranslateError,
};
pub use execute::{Executor, Inputs, Outcome, Parameter, Session};
pub use model::{Catalog, ColumnModel, Entity, SchemaProvider, TableModel};
pub use query::{from, Count, Produce, Query, QueryNode};
pub use quote::{constant, input, lambda, object, param, source, Lambda, Quoted};
pub use render::{render, Dialect, DialectKind, ParameterSlot, RenderedCommand};
pub use tree::ImmutableList;
pub use value::{FromValue, Value, ValueType};
