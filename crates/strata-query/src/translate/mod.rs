//! Quoted function trees to SQL AST.
//!
//! The [`Translator`] walks a [`Quoted`] tree with a [`Scope`] that binds each
//! lambda parameter to a [`SourceBinding`]: a table under an alias, a composite
//! of bindings (join sides, constructed objects), or a scalar expression.
//!
//! The recognized catalog is fixed:
//!
//! - member access on a table binding becomes a qualified column
//! - `== != < <= > >= && || + - * /` and unary `!` map one to one onto SQL;
//!   comparing against a null constant becomes `IS [NOT] NULL`
//! - `contains`, `starts_with` and `ends_with` become `LIKE` against a
//!   `%`-wrapped concatenation; `%` and `_` inside the needle are not escaped
//! - constants and inputs become bound parameters, never literal text
//! - object construction becomes one result column per member, in order
//! - sequence calls (`where`, `select`, `order_by`, `order_by_descending`,
//!   `skip`, `take`, `join`) over a [`Quoted::Source`] build a select
//! - a sequence in value position becomes a scalar subquery; member access on
//!   a sequence narrows it to that member, aliased by the member name. Such
//!   subqueries do not see the enclosing lambda's parameters
//!
//! Anything else is rejected with [`TranslateError::UnsupportedConstruct`].

mod plan;

pub use plan::{JoinOn, SelectPlan};

use crate::error::{TranslateError, TranslateResult};
use crate::model::{SchemaProvider, TableModel};
use crate::quote::{Lambda, Quoted, QuotedBinaryOp, QuotedUnaryOp};
use crate::sql::{
    Assignment, BinaryOperator, Expr, Ident, ParameterSource, ResultColumn, SortDirection,
    TableSource, UnaryOperator,
};
use crate::value::Value;
use std::slice;
use std::sync::Arc;

/// Default suggested name of a bound constant with no better hint
const CONSTANT_NAME: &str = "p";

/// What a lambda parameter (or a member of one) stands for
#[derive(Debug, Clone, PartialEq)]
pub enum SourceBinding {
    /// Rows of a table, columns qualified by `alias`
    Table {
        alias: String,
        model: Arc<TableModel>,
    },
    /// Named members, each its own binding
    Composite(Vec<(String, SourceBinding)>),
    /// A single computed value
    Scalar(Expr),
}

impl SourceBinding {
    pub fn table(alias: impl Into<String>, model: Arc<TableModel>) -> Self {
        Self::Table {
            alias: alias.into(),
            model,
        }
    }

    /// Name of this binding when it becomes a member of a composite
    pub fn label(&self, position: usize) -> String {
        match self {
            Self::Table { alias, .. } => alias.clone(),
            _ => format!("Item{}", position + 1),
        }
    }

    /// Composite of `sides`, each under its label
    pub fn composite_of(sides: &[SourceBinding]) -> Self {
        Self::Composite(
            sides
                .iter()
                .enumerate()
                .map(|(i, side)| (side.label(i), side.clone()))
                .collect(),
        )
    }

    /// Member of a composite; exact match first, then case-insensitive
    pub fn member(&self, name: &str) -> Option<&SourceBinding> {
        let Self::Composite(members) = self else {
            return None;
        };
        members
            .iter()
            .find(|(n, _)| n == name)
            .or_else(|| members.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)))
            .map(|(_, b)| b)
    }

    /// Result columns selecting this binding
    pub fn columns(&self) -> Vec<ResultColumn> {
        let mut out = Vec::new();
        self.expand(None, &mut out);
        out
    }

    fn expand(&self, prefix: Option<&str>, out: &mut Vec<ResultColumn>) {
        match self {
            Self::Table { alias, model } => {
                for column in model.columns.iter() {
                    let expr = Expr::qualified(
                        alias.as_str(),
                        column.name.as_str(),
                        Some(column.value_type),
                    );
                    out.push(match prefix {
                        Some(p) => ResultColumn::aliased(expr, format!("{}.{}", p, column.name)),
                        None => ResultColumn::expr(expr),
                    });
                }
            }
            Self::Composite(members) => {
                for (name, member) in members {
                    let path = match prefix {
                        Some(p) => format!("{}.{}", p, name),
                        None => name.clone(),
                    };
                    match member {
                        Self::Scalar(expr) => out.push(ResultColumn::aliased(expr.clone(), path)),
                        nested => nested.expand(Some(&path), out),
                    }
                }
            }
            Self::Scalar(expr) => out.push(match prefix {
                Some(p) => ResultColumn::aliased(expr.clone(), p),
                None => ResultColumn::expr(expr.clone()),
            }),
        }
    }
}

/// Parameter bindings visible to a lambda body
#[derive(Debug, Clone, Default)]
pub struct Scope {
    entries: Vec<(String, SourceBinding)>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`, shadowing any earlier binding of the same name
    pub fn bind(mut self, name: impl Into<String>, binding: SourceBinding) -> Self {
        self.entries.push((name.into(), binding));
        self
    }

    pub fn lookup(&self, name: &str) -> Option<&SourceBinding> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b)
    }

    /// Bind a lambda's parameters to `sources`.
    ///
    /// One parameter per source binds them positionally. A single parameter
    /// over several sources binds a composite whose members are the sources'
    /// labels.
    pub fn for_lambda(lambda: &Lambda, sources: &[SourceBinding]) -> TranslateResult<Self> {
        match (lambda.params.as_slice(), sources) {
            (params, sources) if params.len() == sources.len() => Ok(params
                .iter()
                .zip(sources)
                .fold(Self::new(), |scope, (p, s)| scope.bind(p.clone(), s.clone()))),
            ([single], sources) if sources.len() > 1 => {
                Ok(Self::new().bind(single.clone(), SourceBinding::composite_of(sources)))
            }
            (params, sources) => Err(TranslateError::ArityMismatch {
                expected: sources.len(),
                found: params.len(),
                node: lambda.to_string(),
            }),
        }
    }
}

/// Output of [`Translator::translate`]
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    Expr(Expr),
    Columns(Vec<ResultColumn>),
    Source(TableSource),
}

/// Intermediate result of resolving a node
enum Resolved {
    Expr(Expr),
    Binding(SourceBinding),
}

impl Resolved {
    fn from_binding(binding: SourceBinding) -> Self {
        match binding {
            SourceBinding::Scalar(expr) => Self::Expr(expr),
            other => Self::Binding(other),
        }
    }

    fn into_binding(self) -> SourceBinding {
        match self {
            Self::Expr(expr) => SourceBinding::Scalar(expr),
            Self::Binding(binding) => binding,
        }
    }
}

fn unsupported(kind: impl Into<String>, node: impl std::fmt::Display) -> TranslateError {
    TranslateError::unsupported(kind, node)
}

/// Translates quoted trees. Holds no state beyond the optional schema lookup
/// used to resolve [`Quoted::Source`] tables.
#[derive(Clone, Copy, Default)]
pub struct Translator<'s> {
    schema: Option<&'s dyn SchemaProvider>,
}

impl<'s> Translator<'s> {
    pub fn new() -> Self {
        Self { schema: None }
    }

    pub fn with_schema(schema: &'s dyn SchemaProvider) -> Self {
        Self {
            schema: Some(schema),
        }
    }

    /// Translate any node: an expression, a row-shaped value (expanded into
    /// result columns) or a sequence (a table source)
    pub fn translate(&self, node: &Quoted, scope: &Scope) -> TranslateResult<Translation> {
        if is_sequence(node) {
            let alias = root_table(node).unwrap_or("source").to_string();
            return Ok(Translation::Source(self.sequence(node)?.into_source(alias)));
        }
        Ok(match self.resolve(node, scope)? {
            Resolved::Expr(expr) => Translation::Expr(expr),
            Resolved::Binding(binding) => Translation::Columns(binding.columns()),
        })
    }

    /// Translate a filter condition
    pub fn predicate(&self, lambda: &Lambda, sources: &[SourceBinding]) -> TranslateResult<Expr> {
        let scope = Scope::for_lambda(lambda, sources)?;
        match self.resolve(&lambda.body, &scope)? {
            Resolved::Expr(expr) => Ok(expr),
            Resolved::Binding(_) => Err(unsupported("predicate yielding a row", lambda)),
        }
    }

    /// Translate a sort or join key
    pub fn key(&self, lambda: &Lambda, sources: &[SourceBinding]) -> TranslateResult<Expr> {
        let scope = Scope::for_lambda(lambda, sources)?;
        match self.resolve(&lambda.body, &scope)? {
            Resolved::Expr(expr) => Ok(expr),
            Resolved::Binding(_) => Err(unsupported("key yielding a row", lambda)),
        }
    }

    /// Translate a projection into the binding of its result.
    ///
    /// [`SourceBinding::columns`] turns the binding into the select list; the
    /// binding itself resolves later lambdas over the projected rows.
    pub fn projection(
        &self,
        lambda: &Lambda,
        sources: &[SourceBinding],
    ) -> TranslateResult<SourceBinding> {
        let scope = Scope::for_lambda(lambda, sources)?;
        Ok(self.resolve(&lambda.body, &scope)?.into_binding())
    }

    /// Translate an update setter `x => new { Col = value, ... }` into `SET` assignments
    pub fn assignments(
        &self,
        setter: &Lambda,
        target: &SourceBinding,
    ) -> TranslateResult<Vec<Assignment>> {
        let Quoted::Construct { members, .. } = &setter.body else {
            return Err(unsupported("update setter", setter));
        };
        let SourceBinding::Table { alias, model } = target else {
            return Err(unsupported("update of a computed source", setter));
        };
        let scope = Scope::for_lambda(setter, slice::from_ref(target))?;

        members
            .iter()
            .map(|(name, value)| {
                let column =
                    model
                        .find_column(name)
                        .ok_or_else(|| TranslateError::UnknownMember {
                            owner: model.name.clone(),
                            member: name.clone(),
                        })?;
                let target_column = Expr::qualified(
                    alias.as_str(),
                    column.name.as_str(),
                    Some(column.value_type),
                );
                Ok(Assignment {
                    column: Ident::new(column.name.clone()),
                    value: with_hint(self.scalar(value, &scope)?, &target_column),
                })
            })
            .collect()
    }

    /// Build a select from a quoted sequence expression rooted at a [`Quoted::Source`]
    pub fn sequence(&self, node: &Quoted) -> TranslateResult<SelectPlan> {
        self.sequence_as(node, None)
    }

    /// [`Translator::sequence`] with the root table read under `alias`
    pub(crate) fn sequence_as(
        &self,
        node: &Quoted,
        alias: Option<&str>,
    ) -> TranslateResult<SelectPlan> {
        match node {
            Quoted::Source(name) => {
                let model = self
                    .schema
                    .and_then(|schema| schema.table(name))
                    .ok_or_else(|| TranslateError::UnknownTable { name: name.clone() })?;
                let alias = alias.map_or_else(|| model.name.clone(), str::to_string);
                Ok(SelectPlan::table(model, alias))
            }
            Quoted::Call {
                target: Some(target),
                method,
                args,
            } => {
                let mut plan = self.sequence_as(target, alias)?;
                match (method.as_str(), args.as_slice()) {
                    ("where", [predicate]) => {
                        plan.filter(self, lambda_arg(predicate)?, node)?;
                    }
                    ("select", [projection]) => {
                        plan.project(self, lambda_arg(projection)?, node)?;
                    }
                    ("order_by", [key]) => {
                        plan.order(self, lambda_arg(key)?, SortDirection::Ascending, true, node)?;
                    }
                    ("order_by_descending", [key]) => {
                        plan.order(self, lambda_arg(key)?, SortDirection::Descending, true, node)?;
                    }
                    ("skip", [count]) => plan.skip(count_arg(count)?),
                    ("take", [count]) => plan.take(count_arg(count)?),
                    ("join", [inner, outer_key, inner_key, result]) => {
                        let root =
                            root_table(inner).ok_or_else(|| unsupported("join source", inner))?;
                        let inner_alias = unique_alias(&plan.aliases(), root);
                        let right = self.sequence_as(inner, Some(&inner_alias))?;
                        let on = JoinOn::Keys {
                            outer: lambda_arg(outer_key)?,
                            inner: lambda_arg(inner_key)?,
                        };
                        plan.join(self, right, on, node)?;
                        plan.project(self, lambda_arg(result)?, node)?;
                    }
                    _ => {
                        return Err(unsupported(
                            format!("sequence call `{}`/{}", method, args.len()),
                            node,
                        ))
                    }
                }
                Ok(plan)
            }
            other => Err(unsupported("sequence source", other)),
        }
    }

    fn resolve(&self, node: &Quoted, scope: &Scope) -> TranslateResult<Resolved> {
        match node {
            Quoted::Parameter(name) => scope
                .lookup(name)
                .cloned()
                .map(Resolved::from_binding)
                .ok_or_else(|| TranslateError::UnboundParameter { name: name.clone() }),
            Quoted::Member { target, name } if is_sequence(target) => {
                let mut plan = self.sequence(target)?;
                plan.select_member(self, target, name)?;
                self.scalar_subquery(plan, node).map(Resolved::Expr)
            }
            Quoted::Member { target, name } => {
                let binding = self.resolve(target, scope)?.into_binding();
                self.member(&binding, target, name, node)
            }
            Quoted::Constant(value) => Ok(Resolved::Expr(Expr::constant(
                value.clone(),
                CONSTANT_NAME,
            ))),
            Quoted::Input { name, value_type } => {
                Ok(Resolved::Expr(Expr::input(name.clone(), *value_type)))
            }
            Quoted::Binary { op, left, right } => {
                self.binary(*op, left, right, scope, node).map(Resolved::Expr)
            }
            Quoted::Unary { op, operand } => match op {
                QuotedUnaryOp::Not => Ok(Resolved::Expr(Expr::unary(
                    UnaryOperator::Not,
                    self.scalar(operand, scope)?,
                ))),
                other => Err(unsupported(format!("operator `{}`", other.symbol()), node)),
            },
            Quoted::Call { .. } if is_sequence(node) => {
                let plan = self.sequence(node)?;
                self.scalar_subquery(plan, node).map(Resolved::Expr)
            }
            Quoted::Call {
                target,
                method,
                args,
            } => self
                .call(target.as_deref(), method, args, scope, node)
                .map(Resolved::Expr),
            Quoted::Construct { members, .. } => {
                let mut resolved = Vec::with_capacity(members.len());
                for (name, value) in members {
                    resolved.push((name.clone(), self.resolve(value, scope)?.into_binding()));
                }
                Ok(Resolved::Binding(SourceBinding::Composite(resolved)))
            }
            Quoted::Lambda(_) => Err(unsupported("nested lambda", node)),
            Quoted::Source(_) => {
                let plan = self.sequence(node)?;
                self.scalar_subquery(plan, node).map(Resolved::Expr)
            }
        }
    }

    /// `(SELECT ...)` of a plan yielding one column
    fn scalar_subquery(&self, plan: SelectPlan, node: &Quoted) -> TranslateResult<Expr> {
        let query = plan.finish();
        if query.single_column().is_none() {
            return Err(unsupported("sequence of rows in value position", node));
        }
        Ok(Expr::Subquery(Box::new(query)))
    }

    /// Resolve a node that must produce a single value
    fn scalar(&self, node: &Quoted, scope: &Scope) -> TranslateResult<Expr> {
        match self.resolve(node, scope)? {
            Resolved::Expr(expr) => Ok(expr),
            Resolved::Binding(_) => Err(unsupported("row value in scalar position", node)),
        }
    }

    fn member(
        &self,
        binding: &SourceBinding,
        target: &Quoted,
        name: &str,
        node: &Quoted,
    ) -> TranslateResult<Resolved> {
        match binding {
            SourceBinding::Table { alias, model } => model
                .find_column(name)
                .map(|column| {
                    Resolved::Expr(Expr::qualified(
                        alias.as_str(),
                        column.name.as_str(),
                        Some(column.value_type),
                    ))
                })
                .ok_or_else(|| TranslateError::UnknownMember {
                    owner: model.name.clone(),
                    member: name.to_string(),
                }),
            SourceBinding::Composite(_) => binding
                .member(name)
                .cloned()
                .map(Resolved::from_binding)
                .ok_or_else(|| TranslateError::UnknownMember {
                    owner: target.to_string(),
                    member: name.to_string(),
                }),
            SourceBinding::Scalar(Expr::Subquery(query)) => match query.single_column() {
                Some(ResultColumn::Expr {
                    alias: Some(alias), ..
                }) if alias.as_str().eq_ignore_ascii_case(name) => {
                    Ok(Resolved::Expr(Expr::Subquery(query.clone())))
                }
                _ => Err(TranslateError::UnknownMember {
                    owner: target.to_string(),
                    member: name.to_string(),
                }),
            },
            SourceBinding::Scalar(_) => Err(unsupported("member access on a computed value", node)),
        }
    }

    fn binary(
        &self,
        op: QuotedBinaryOp,
        left: &Quoted,
        right: &Quoted,
        scope: &Scope,
        node: &Quoted,
    ) -> TranslateResult<Expr> {
        let sql_op = match op {
            QuotedBinaryOp::Equal => BinaryOperator::Eq,
            QuotedBinaryOp::NotEqual => BinaryOperator::NotEq,
            QuotedBinaryOp::LessThan => BinaryOperator::Lt,
            QuotedBinaryOp::LessThanOrEqual => BinaryOperator::LtEq,
            QuotedBinaryOp::GreaterThan => BinaryOperator::Gt,
            QuotedBinaryOp::GreaterThanOrEqual => BinaryOperator::GtEq,
            QuotedBinaryOp::AndAlso => BinaryOperator::And,
            QuotedBinaryOp::OrElse => BinaryOperator::Or,
            QuotedBinaryOp::Add => BinaryOperator::Add,
            QuotedBinaryOp::Subtract => BinaryOperator::Sub,
            QuotedBinaryOp::Multiply => BinaryOperator::Mul,
            QuotedBinaryOp::Divide => BinaryOperator::Div,
            other => return Err(unsupported(format!("operator `{}`", other.symbol()), node)),
        };

        if let BinaryOperator::Eq | BinaryOperator::NotEq = sql_op {
            let test = if sql_op == BinaryOperator::Eq {
                UnaryOperator::IsNull
            } else {
                UnaryOperator::IsNotNull
            };
            match (is_null(left), is_null(right)) {
                (false, true) => return Ok(Expr::unary(test, self.scalar(left, scope)?)),
                (true, false) => return Ok(Expr::unary(test, self.scalar(right, scope)?)),
                _ => {}
            }
        }

        let l = self.scalar(left, scope)?;
        let r = self.scalar(right, scope)?;
        let named_l = with_hint(l.clone(), &r);
        let named_r = with_hint(r, &l);
        Ok(Expr::binary(named_l, sql_op, named_r))
    }

    fn call(
        &self,
        target: Option<&Quoted>,
        method: &str,
        args: &[Quoted],
        scope: &Scope,
        node: &Quoted,
    ) -> TranslateResult<Expr> {
        match (target, method, args) {
            (Some(target), "contains" | "starts_with" | "ends_with", [needle]) => {
                let haystack = self.scalar(target, scope)?;
                let needle = with_hint(self.scalar(needle, scope)?, &haystack);
                let wildcard = || Expr::LiteralString("%".to_string());
                let pattern = match method {
                    "contains" => concat(concat(wildcard(), needle), wildcard()),
                    "starts_with" => concat(needle, wildcard()),
                    _ => concat(wildcard(), needle),
                };
                Ok(Expr::binary(haystack, BinaryOperator::Like, pattern))
            }
            _ => Err(unsupported(
                format!("call `{}`/{}", method, args.len()),
                node,
            )),
        }
    }
}

fn concat(left: Expr, right: Expr) -> Expr {
    Expr::binary(left, BinaryOperator::Concat, right)
}

fn is_null(node: &Quoted) -> bool {
    matches!(node, Quoted::Constant(Value::Null))
}

/// Name a bound constant after the column it is compared with or assigned to
fn with_hint(expr: Expr, hint: &Expr) -> Expr {
    match (expr, hint.as_column()) {
        (Expr::BoundParameter(mut param), Some(column))
            if matches!(param.source, ParameterSource::Constant(_)) =>
        {
            param.suggested_name = column.name.to_string();
            param.value_type = param.value_type.or(column.value_type);
            Expr::BoundParameter(param)
        }
        (expr, _) => expr,
    }
}

fn lambda_arg(arg: &Quoted) -> TranslateResult<&Lambda> {
    match arg {
        Quoted::Lambda(lambda) => Ok(&**lambda),
        other => Err(unsupported("non-lambda sequence argument", other)),
    }
}

fn count_arg(arg: &Quoted) -> TranslateResult<u64> {
    match arg {
        Quoted::Constant(Value::Integer(n)) => {
            u64::try_from(*n).map_err(|_| unsupported("negative count", arg))
        }
        other => Err(unsupported("non-constant count", other)),
    }
}

const SEQUENCE_CALLS: &[&str] = &[
    "where",
    "select",
    "order_by",
    "order_by_descending",
    "skip",
    "take",
    "join",
];

fn is_sequence(node: &Quoted) -> bool {
    match node {
        Quoted::Source(_) => true,
        Quoted::Call {
            target: Some(target),
            method,
            ..
        } => SEQUENCE_CALLS.contains(&method.as_str()) && is_sequence(target),
        _ => false,
    }
}

/// Table name at the root of a sequence expression
pub(crate) fn root_table(node: &Quoted) -> Option<&str> {
    match node {
        Quoted::Source(name) => Some(name),
        Quoted::Call {
            target: Some(target),
            ..
        } => root_table(target),
        _ => None,
    }
}

/// `name`, or `name_2`, `name_3`, ... when `name` is already taken
pub fn unique_alias(taken: &[String], name: &str) -> String {
    let is_taken = |candidate: &str| taken.iter().any(|t| t.eq_ignore_ascii_case(candidate));
    if !is_taken(name) {
        return name.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", name, n))
        .find(|candidate| !is_taken(candidate))
        .unwrap_or_else(|| name.to_string())
}
