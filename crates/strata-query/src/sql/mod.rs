//! SQL abstract syntax tree.
//!
//! A closed set of immutable node types describing the statements the engine
//! emits. Nodes have no behavior beyond constructors; rendering lives in
//! [`crate::render`]. Every node is `Eq + Hash`, so two structurally equal
//! statements compare equal regardless of how they were built.

mod expr;
mod stmt;

pub use expr::*;
pub use stmt::*;
