//! Query tree to command list.
//!
//! The [`Composer`] walks a [`QueryNode`] tree by variant and recognizes a
//! fixed catalog of shapes:
//!
//! | node | inner may be |
//! |---|---|
//! | `Filter` | `From`, `Quoted`, `Filter`, `Join`, `Sort`, `Insert`, `Update` |
//! | `Map` | `From`, `Quoted`, `Filter`, `Join`, `Sort`, `Insert`, `Update` |
//! | `Sort` | `From`, `Quoted`, `Filter`, `Join`, `Sort`, `Map`, `Insert`, `Update` |
//! | `Take`, `Skip` | any readable node |
//! | `Join` | sides built from `From`, `Quoted` and `Filter` |
//! | `Insert` | `From`, `Insert`, `Update` |
//! | `Update` | `From`, `Filter`, `Insert`, `Update` |
//! | `Count`, `Produce` | any readable node; root only |
//!
//! Everything else is a [`ComposeError::UnsupportedConstruct`].
//!
//! Mutations wrapped by reads are emitted as earlier commands; the read then
//! starts over from the whole mutated table. Only the last command's result is
//! bound, but every command must run, in order.

use crate::error::{ComposeError, ComposeResult, ExecuteError, ExecuteResult};
use crate::execute::{Inputs, Parameter};
use crate::model::{SchemaProvider, TableModel};
use crate::query::QueryNode;
use crate::render::{self, Dialect, ParameterSlot};
use crate::sql::{Expr, Ident, InsertStatement, Statement};
use crate::translate::{root_table, unique_alias, JoinOn, SelectPlan, Translator};
use crate::tree::ImmutableList;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Shape of a command's result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    /// A single value
    Scalar,
    /// A list of rows
    Rows,
    /// Number of rows changed
    AffectedCount,
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Scalar => "a scalar",
            Self::Rows => "rows",
            Self::AffectedCount => "an affected-row count",
        })
    }
}

/// One executable statement
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub statement: Statement,
    /// Dialect SQL; safe to log, it never contains bound values
    pub text: String,
    pub parameters: ImmutableList<ParameterSlot>,
    pub result: ResultKind,
}

impl Command {
    /// Parameter values in placeholder order, inputs looked up in `inputs`
    pub fn resolve(&self, inputs: &Inputs) -> ExecuteResult<Vec<Parameter>> {
        self.parameters
            .iter()
            .map(|slot| match slot {
                ParameterSlot::Constant { name, value } => Ok(Parameter {
                    name: name.clone(),
                    value: value.clone(),
                }),
                ParameterSlot::Input { name, input, .. } => inputs
                    .get(input)
                    .cloned()
                    .map(|value| Parameter {
                        name: name.clone(),
                        value,
                    })
                    .ok_or_else(|| ExecuteError::MissingInput {
                        name: input.clone(),
                    }),
            })
            .collect()
    }
}

fn shape_error(node: &QueryNode, inner: &QueryNode) -> ComposeError {
    ComposeError::UnsupportedConstruct {
        kind: format!("{} over {}", node.kind(), inner.kind()),
        node: node.to_string(),
    }
}

/// Table name at the root of a read
fn root_name(node: &QueryNode) -> Option<String> {
    match node {
        QueryNode::From(model) => Some(model.name.clone()),
        QueryNode::Quoted(q) => root_table(q).map(str::to_string),
        QueryNode::Join { left, .. } => root_name(left),
        other => other.children().first().and_then(|c| root_name(c)),
    }
}

/// Compiles query trees into commands for one dialect
#[derive(Clone, Copy)]
pub struct Composer<'a> {
    dialect: &'a dyn Dialect,
    translator: Translator<'a>,
}

impl<'a> Composer<'a> {
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self {
            dialect,
            translator: Translator::new(),
        }
    }

    /// Resolve [`QueryNode::Quoted`] tables through `schema`
    pub fn with_schema(mut self, schema: &'a dyn SchemaProvider) -> Self {
        self.translator = Translator::with_schema(schema);
        self
    }

    pub fn dialect(&self) -> &'a dyn Dialect {
        self.dialect
    }

    /// Commands to run, in order, to evaluate `root`
    pub fn compose(&self, root: &QueryNode) -> ComposeResult<Vec<Command>> {
        let mut commands = Vec::new();
        match root {
            QueryNode::Produce(inner) => {
                let plan = self.read(inner, None, &mut commands)?;
                commands.push(self.emit(plan.finish(), ResultKind::Rows)?);
            }
            QueryNode::Count(inner) => {
                let plan = self.read(inner, None, &mut commands)?;
                commands.push(self.emit(plan.count(), ResultKind::Scalar)?);
            }
            QueryNode::Insert { .. } | QueryNode::Update { .. } => {
                self.mutate(root, None, &mut commands)?;
            }
            other => {
                let plan = self.read(other, None, &mut commands)?;
                commands.push(self.emit(plan.finish(), ResultKind::Rows)?);
            }
        }

        debug!(
            kind = root.kind(),
            nodes = root.size(),
            commands = commands.len(),
            "Composed query"
        );
        Ok(commands)
    }

    fn emit(&self, stmt: impl Into<Statement>, result: ResultKind) -> ComposeResult<Command> {
        let statement = stmt.into();
        let rendered = render::render(&statement, self.dialect)?;
        Ok(Command {
            statement,
            text: rendered.text,
            parameters: rendered.parameters.into(),
            result,
        })
    }

    /// Build the select for a readable node, emitting any mutations below it
    fn read(
        &self,
        node: &QueryNode,
        alias: Option<&str>,
        commands: &mut Vec<Command>,
    ) -> ComposeResult<SelectPlan> {
        let tr = &self.translator;
        match node {
            QueryNode::From(model) => {
                let alias = alias.map_or_else(|| model.name.clone(), str::to_string);
                Ok(SelectPlan::table(Arc::clone(model), alias))
            }
            QueryNode::Quoted(q) => Ok(tr.sequence_as(q, alias)?),
            QueryNode::Insert { .. } | QueryNode::Update { .. } => {
                self.mutate(node, alias, commands)
            }
            QueryNode::Filter { inner, predicate } => {
                match inner.as_ref() {
                    QueryNode::Map { .. }
                    | QueryNode::Take { .. }
                    | QueryNode::Skip { .. }
                    | QueryNode::Count(_)
                    | QueryNode::Produce(_) => return Err(shape_error(node, inner)),
                    _ => {}
                }
                let mut plan = self.read(inner, alias, commands)?;
                plan.filter(tr, predicate, node)?;
                Ok(plan)
            }
            QueryNode::Map { inner, projection } => {
                match inner.as_ref() {
                    QueryNode::Map { .. }
                    | QueryNode::Take { .. }
                    | QueryNode::Skip { .. }
                    | QueryNode::Count(_)
                    | QueryNode::Produce(_) => return Err(shape_error(node, inner)),
                    _ => {}
                }
                let mut plan = self.read(inner, alias, commands)?;
                plan.project(tr, projection, node)?;
                Ok(plan)
            }
            QueryNode::Sort {
                inner,
                key,
                direction,
                primary,
            } => {
                match inner.as_ref() {
                    QueryNode::Take { .. }
                    | QueryNode::Skip { .. }
                    | QueryNode::Count(_)
                    | QueryNode::Produce(_) => return Err(shape_error(node, inner)),
                    _ => {}
                }
                let mut plan = self.read(inner, alias, commands)?;
                plan.order(tr, key, *direction, *primary, node)?;
                Ok(plan)
            }
            QueryNode::Take { inner, count } => {
                self.check_readable(node, inner)?;
                let mut plan = self.read(inner, alias, commands)?;
                plan.take(*count);
                Ok(plan)
            }
            QueryNode::Skip { inner, count } => {
                self.check_readable(node, inner)?;
                let mut plan = self.read(inner, alias, commands)?;
                plan.skip(*count);
                Ok(plan)
            }
            QueryNode::Join {
                left,
                right,
                condition,
            } => {
                self.check_join_side(node, left)?;
                self.check_join_side(node, right)?;
                let mut plan = self.read(left, alias, commands)?;
                let right_root = root_name(right).unwrap_or_default();
                let right_alias = unique_alias(&plan.aliases(), &right_root);
                let right_plan = self.read(right, Some(&right_alias), commands)?;
                plan.join(tr, right_plan, JoinOn::Predicate(condition), node)?;
                Ok(plan)
            }
            QueryNode::Count(_) | QueryNode::Produce(_) => {
                Err(ComposeError::UnsupportedConstruct {
                    kind: format!("nested {}", node.kind()),
                    node: node.to_string(),
                })
            }
        }
    }

    fn check_readable(&self, node: &QueryNode, inner: &QueryNode) -> ComposeResult<()> {
        match inner {
            QueryNode::Count(_) | QueryNode::Produce(_) => Err(shape_error(node, inner)),
            _ => Ok(()),
        }
    }

    fn check_join_side(&self, node: &QueryNode, side: &QueryNode) -> ComposeResult<()> {
        match side {
            QueryNode::From(_) | QueryNode::Quoted(_) => Ok(()),
            QueryNode::Filter { inner, .. } => self.check_join_side(node, inner),
            other => Err(shape_error(node, other)),
        }
    }

    /// Emit an INSERT or UPDATE (and any mutations below it), then continue
    /// with a read of the whole target table
    fn mutate(
        &self,
        node: &QueryNode,
        alias: Option<&str>,
        commands: &mut Vec<Command>,
    ) -> ComposeResult<SelectPlan> {
        let model = match node {
            QueryNode::Insert {
                inner,
                columns,
                rows,
            } => {
                let model = match inner.as_ref() {
                    QueryNode::From(model) => Arc::clone(model),
                    QueryNode::Insert { .. } | QueryNode::Update { .. } => {
                        self.target_of(node, self.mutate(inner, alias, commands)?)?
                    }
                    other => return Err(shape_error(node, other)),
                };
                let insert = insert_statement(&model, columns, rows)?;
                commands.push(self.emit(insert, ResultKind::AffectedCount)?);
                model
            }
            QueryNode::Update { inner, setter } => {
                match inner.as_ref() {
                    QueryNode::From(_)
                    | QueryNode::Filter { .. }
                    | QueryNode::Insert { .. }
                    | QueryNode::Update { .. } => {}
                    other => return Err(shape_error(node, other)),
                }
                let plan = self.read(inner, alias, commands)?;
                let model = self.target_of(node, plan.clone())?;
                let update = plan.into_update(&self.translator, setter, node)?;
                if update.assignments.is_empty() {
                    return Err(ComposeError::EmptyUpdate {
                        table: model.qualified_name(),
                    });
                }
                commands.push(self.emit(update, ResultKind::AffectedCount)?);
                model
            }
            other => {
                return Err(ComposeError::UnsupportedConstruct {
                    kind: format!("{} as a mutation", other.kind()),
                    node: other.to_string(),
                })
            }
        };

        let alias = alias.map_or_else(|| model.name.clone(), str::to_string);
        Ok(SelectPlan::table(model, alias))
    }

    fn target_of(&self, node: &QueryNode, plan: SelectPlan) -> ComposeResult<Arc<TableModel>> {
        plan.root_model()
            .ok_or_else(|| ComposeError::UnsupportedConstruct {
                kind: format!("{} of a computed source", node.kind()),
                node: node.to_string(),
            })
    }
}

fn insert_statement(
    model: &TableModel,
    columns: &ImmutableList<String>,
    rows: &ImmutableList<ImmutableList<Value>>,
) -> ComposeResult<InsertStatement> {
    if rows.is_empty() {
        return Err(ComposeError::EmptyInsert {
            table: model.qualified_name(),
        });
    }
    if let Some((row, values)) = rows
        .iter()
        .enumerate()
        .find(|(_, values)| values.len() != columns.len())
    {
        return Err(ComposeError::RowArity {
            table: model.qualified_name(),
            row,
            expected: columns.len(),
            found: values.len(),
        });
    }
    let rows = rows
        .iter()
        .map(|row| {
            row.iter()
                .zip(columns.iter())
                .map(|(value, column)| {
                    let mut expr = Expr::constant(value.clone(), column.as_str());
                    if let Expr::BoundParameter(param) = &mut expr {
                        param.value_type = param
                            .value_type
                            .or_else(|| model.find_column(column).map(|c| c.value_type));
                    }
                    expr
                })
                .collect::<ImmutableList<_>>()
        })
        .collect();

    Ok(InsertStatement {
        table: Ident::new(model.name.clone()),
        schema: model.schema.clone().map(Ident::new),
        columns: columns.iter().map(Ident::new).collect(),
        rows,
    })
}
