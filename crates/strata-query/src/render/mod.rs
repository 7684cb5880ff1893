//! SQL rendering.
//!
//! Rendering happens in two passes. [`Renderer`] turns a statement into an
//! ordered list of [`Segment`]s: raw keywords and punctuation, identifiers,
//! and bound values. [`parameterize`] then walks the segments once, left to
//! right, quoting identifiers and replacing each bound value with the next
//! placeholder while collecting the matching [`ParameterSlot`]. Bound values
//! never reach the command text.

pub mod dialect;

pub use dialect::{
    quote_identifier, unquote_identifier, Dialect, DialectKind, PagingStyle, PlaceholderStyle,
    Postgres, SqlServer, Sqlite,
};

use crate::error::{RenderError, RenderResult};
use crate::sql::{
    BinaryOperator, Column, CommonTableExpr, Expr, InsertStatement, JoinClause, OrderingTerm,
    ParameterSource, ResultColumn, SelectCore, SelectStatement, Statement, TableSource,
    UnaryOperator, UpdateStatement,
};
use crate::value::{Value, ValueType};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// One unit of rendered output
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Raw(String),
    /// Unquoted identifier, quoted by the dialect during parameterization
    Identifier(String),
    /// Value known at composition time
    BoundConstant { name: String, value: Value },
    /// Value supplied by name at execution time
    BoundInput {
        name: String,
        value_type: Option<ValueType>,
    },
}

fn raw(s: impl Into<String>) -> Segment {
    Segment::Raw(s.into())
}

fn ident(s: impl std::fmt::Display) -> Segment {
    Segment::Identifier(s.to_string())
}

/// Always-false predicate standing in for an empty page
fn no_rows() -> Expr {
    Expr::binary(Expr::LiteralInt(1), BinaryOperator::Eq, Expr::LiteralInt(0))
}

/// Concatenate `parts`, separated by raw `sep`
fn joined(parts: impl IntoIterator<Item = Vec<Segment>>, sep: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            out.push(raw(sep));
        }
        out.extend(part);
    }
    out
}

/// Where the value of a parameter comes from
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterSlot {
    Constant {
        name: String,
        value: Value,
    },
    /// Filled from the execution inputs under `input`
    Input {
        name: String,
        input: String,
        value_type: Option<ValueType>,
    },
}

impl ParameterSlot {
    /// Placeholder name, unique within its command
    pub fn name(&self) -> &str {
        match self {
            Self::Constant { name, .. } | Self::Input { name, .. } => name,
        }
    }
}

/// Command text plus its parameters in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedCommand {
    pub text: String,
    pub parameters: Vec<ParameterSlot>,
}

/// Statement to segment renderer
#[derive(Clone, Copy)]
pub struct Renderer<'d> {
    dialect: &'d dyn Dialect,
}

impl<'d> Renderer<'d> {
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        Self { dialect }
    }

    pub fn statement(&self, stmt: &Statement) -> RenderResult<Vec<Segment>> {
        match stmt {
            Statement::Select(select) => self.select(select),
            Statement::Insert(insert) => self.insert(insert),
            Statement::Update(update) => self.update(update),
        }
    }

    pub fn select(&self, stmt: &SelectStatement) -> RenderResult<Vec<Segment>> {
        if self.dialect.paging_style() == PagingStyle::OffsetFetch
            && stmt.limit == Some(Expr::LiteralInt(0))
        {
            // `FETCH NEXT 0 ROWS` is rejected; select nothing instead
            return self.select(&SelectStatement {
                select_cores: stmt
                    .select_cores
                    .iter()
                    .map(|core| core.clone().with_where(no_rows()))
                    .collect(),
                limit: None,
                offset: None,
                ..stmt.clone()
            });
        }

        let mut out = Vec::new();

        if !stmt.common_table_exprs.is_empty() {
            out.push(raw("WITH "));
            let ctes = stmt
                .common_table_exprs
                .iter()
                .map(|cte| self.cte(cte))
                .collect::<RenderResult<Vec<_>>>()?;
            out.extend(joined(ctes, ", "));
            out.push(raw(" "));
        }

        let separator = match (stmt.select_cores.len(), stmt.compound_op) {
            (0, _) => return Err(RenderError::EmptySelect),
            (1, _) => String::new(),
            (_, Some(op)) => format!(" {} ", op.as_sql()),
            (cores, None) => return Err(RenderError::MissingCompoundOperator { cores }),
        };
        let cores = stmt
            .select_cores
            .iter()
            .map(|core| self.core(core))
            .collect::<RenderResult<Vec<_>>>()?;
        out.extend(joined(cores, &separator));

        if !stmt.ordering_terms.is_empty() {
            out.push(raw(" ORDER BY "));
            let terms = stmt
                .ordering_terms
                .iter()
                .map(|t| self.ordering_term(t))
                .collect::<RenderResult<Vec<_>>>()?;
            out.extend(joined(terms, ", "));
        }

        self.paging(stmt, &mut out)?;
        Ok(out)
    }

    fn cte(&self, cte: &CommonTableExpr) -> RenderResult<Vec<Segment>> {
        let mut out = vec![ident(&cte.name)];
        if !cte.columns.is_empty() {
            out.push(raw(" ("));
            out.extend(joined(cte.columns.iter().map(|c| vec![ident(c)]), ", "));
            out.push(raw(")"));
        }
        out.push(raw(" AS ("));
        out.extend(self.select(&cte.query)?);
        out.push(raw(")"));
        Ok(out)
    }

    fn paging(&self, stmt: &SelectStatement, out: &mut Vec<Segment>) -> RenderResult<()> {
        match self.dialect.paging_style() {
            PagingStyle::LimitOffset => match (&stmt.limit, &stmt.offset) {
                (Some(limit), offset) => {
                    out.push(raw(" LIMIT "));
                    out.extend(self.expr(limit)?);
                    if let Some(offset) = offset {
                        out.push(raw(" OFFSET "));
                        out.extend(self.expr(offset)?);
                    }
                }
                (None, Some(offset)) => {
                    out.push(raw(if self.dialect.offset_requires_limit() {
                        " LIMIT -1 OFFSET "
                    } else {
                        " OFFSET "
                    }));
                    out.extend(self.expr(offset)?);
                }
                (None, None) => {}
            },
            PagingStyle::OffsetFetch => {
                if !stmt.is_paged() {
                    return Ok(());
                }
                if stmt.ordering_terms.is_empty() {
                    out.push(raw(" ORDER BY (SELECT NULL)"));
                }
                out.push(raw(" OFFSET "));
                match &stmt.offset {
                    Some(offset) => out.extend(self.expr(offset)?),
                    None => out.push(raw("0")),
                }
                out.push(raw(" ROWS"));
                if let Some(limit) = &stmt.limit {
                    out.push(raw(" FETCH NEXT "));
                    out.extend(self.expr(limit)?);
                    out.push(raw(" ROWS ONLY"));
                }
            }
        }
        Ok(())
    }

    pub fn core(&self, core: &SelectCore) -> RenderResult<Vec<Segment>> {
        if !core.table_sources.is_empty() && core.join_clause.is_some() {
            return Err(RenderError::ConflictingSources);
        }
        if core.result_columns.is_empty() {
            return Err(RenderError::EmptyResultColumns);
        }

        let mut out = vec![raw(if core.distinct {
            "SELECT DISTINCT "
        } else {
            "SELECT "
        })];
        let columns = core
            .result_columns
            .iter()
            .map(|c| self.result_column(c))
            .collect::<RenderResult<Vec<_>>>()?;
        out.extend(joined(columns, ", "));

        if let Some(join) = &core.join_clause {
            out.push(raw(" FROM "));
            out.extend(self.join_clause(join)?);
        } else if !core.table_sources.is_empty() {
            out.push(raw(" FROM "));
            let sources = core
                .table_sources
                .iter()
                .map(|s| self.table_source(s))
                .collect::<RenderResult<Vec<_>>>()?;
            out.extend(joined(sources, ", "));
        }

        if let Some(predicate) = &core.where_clause {
            out.push(raw(" WHERE "));
            out.extend(self.expr(predicate)?);
        }
        if !core.group_by.is_empty() {
            out.push(raw(" GROUP BY "));
            let keys = core
                .group_by
                .iter()
                .map(|e| self.expr(e))
                .collect::<RenderResult<Vec<_>>>()?;
            out.extend(joined(keys, ", "));
        }
        if let Some(having) = &core.having {
            out.push(raw(" HAVING "));
            out.extend(self.expr(having)?);
        }
        Ok(out)
    }

    pub fn result_column(&self, column: &ResultColumn) -> RenderResult<Vec<Segment>> {
        Ok(match column {
            ResultColumn::Asterisk => vec![raw("*")],
            ResultColumn::Expr { expr, alias } => {
                let mut out = self.expr(expr)?;
                if let Some(alias) = alias {
                    out.push(raw(" AS "));
                    out.push(ident(alias));
                }
                out
            }
            ResultColumn::TableWildcard(table) => vec![ident(table), raw(".*")],
        })
    }

    pub fn table_source(&self, source: &TableSource) -> RenderResult<Vec<Segment>> {
        match source {
            TableSource::Table {
                name,
                schema,
                alias,
            } => {
                let mut out = Vec::new();
                if let Some(schema) = schema {
                    out.push(ident(schema));
                    out.push(raw("."));
                }
                out.push(ident(name));
                if let Some(alias) = alias {
                    out.push(raw(" AS "));
                    out.push(ident(alias));
                }
                Ok(out)
            }
            TableSource::Join(join) => self.join_clause(join),
            TableSource::Subquery { query, alias } => {
                let mut out = vec![raw("(")];
                out.extend(self.select(query)?);
                out.push(raw(")"));
                if let Some(alias) = alias {
                    out.push(raw(" AS "));
                    out.push(ident(alias));
                }
                Ok(out)
            }
        }
    }

    fn join_clause(&self, join: &JoinClause) -> RenderResult<Vec<Segment>> {
        let mut out = self.table_source(&join.left)?;
        for joined_table in join.joins.iter() {
            out.push(raw(format!(" {} ", joined_table.operator.as_sql())));
            out.extend(self.table_source(&joined_table.source)?);
            if let Some(on) = &joined_table.constraint {
                out.push(raw(" ON "));
                out.extend(self.expr(on)?);
            }
        }
        Ok(out)
    }

    pub fn ordering_term(&self, term: &OrderingTerm) -> RenderResult<Vec<Segment>> {
        let mut out = self.expr(&term.expr)?;
        out.push(raw(format!(" {}", term.direction.as_sql())));
        Ok(out)
    }

    fn column(&self, column: &Column) -> Vec<Segment> {
        let mut out = Vec::with_capacity(5);
        for qualifier in [&column.schema, &column.table].into_iter().flatten() {
            out.push(ident(qualifier));
            out.push(raw("."));
        }
        out.push(ident(&column.name));
        out
    }

    pub fn expr(&self, expr: &Expr) -> RenderResult<Vec<Segment>> {
        Ok(match expr {
            Expr::Column(column) => self.column(column),
            Expr::Binary { op, left, right } => {
                let op_sql = match op {
                    BinaryOperator::Concat => self.dialect.concat_operator(),
                    other => other.as_sql(),
                };
                let mut out = vec![raw("(")];
                out.extend(self.expr(left)?);
                out.push(raw(format!(" {} ", op_sql)));
                out.extend(self.expr(right)?);
                out.push(raw(")"));
                out
            }
            Expr::Unary { op, operand } => {
                let (before, after) = match op {
                    UnaryOperator::Not => ("(NOT ", ")"),
                    UnaryOperator::IsNull => ("(", " IS NULL)"),
                    UnaryOperator::IsNotNull => ("(", " IS NOT NULL)"),
                };
                let mut out = vec![raw(before)];
                out.extend(self.expr(operand)?);
                out.push(raw(after));
                out
            }
            Expr::LiteralInt(n) => vec![raw(n.to_string())],
            Expr::LiteralString(s) => vec![raw(format!("'{}'", s.replace('\'', "''")))],
            Expr::BoundParameter(param) => vec![match &param.source {
                ParameterSource::Constant(value) => Segment::BoundConstant {
                    name: param.suggested_name.clone(),
                    value: value.clone(),
                },
                ParameterSource::Input => Segment::BoundInput {
                    name: param.suggested_name.clone(),
                    value_type: param.value_type,
                },
            }],
            Expr::CountAll => vec![raw("COUNT(*)")],
            Expr::Subquery(query) => {
                let mut out = vec![raw("(")];
                out.extend(self.select(query)?);
                out.push(raw(")"));
                out
            }
        })
    }

    pub fn insert(&self, stmt: &InsertStatement) -> RenderResult<Vec<Segment>> {
        if stmt.rows.is_empty() {
            return Err(RenderError::EmptyInsert {
                table: stmt.table.to_string(),
            });
        }
        let expected = stmt.columns.len();
        for (row, values) in stmt.rows.iter().enumerate() {
            if values.len() != expected {
                return Err(RenderError::RowArity {
                    row,
                    expected,
                    found: values.len(),
                });
            }
        }

        let mut out = vec![raw("INSERT INTO ")];
        if let Some(schema) = &stmt.schema {
            out.push(ident(schema));
            out.push(raw("."));
        }
        out.push(ident(&stmt.table));
        out.push(raw(" ("));
        out.extend(joined(stmt.columns.iter().map(|c| vec![ident(c)]), ", "));
        out.push(raw(") VALUES "));
        let rows = stmt
            .rows
            .iter()
            .map(|values| {
                let values = values
                    .iter()
                    .map(|v| self.expr(v))
                    .collect::<RenderResult<Vec<_>>>()?;
                let mut row = vec![raw("(")];
                row.extend(joined(values, ", "));
                row.push(raw(")"));
                Ok(row)
            })
            .collect::<RenderResult<Vec<_>>>()?;
        out.extend(joined(rows, ", "));
        Ok(out)
    }

    pub fn update(&self, stmt: &UpdateStatement) -> RenderResult<Vec<Segment>> {
        if stmt.assignments.is_empty() {
            return Err(RenderError::EmptyUpdate {
                table: stmt.table.to_string(),
            });
        }

        let mut out = vec![raw("UPDATE ")];
        if let Some(schema) = &stmt.schema {
            out.push(ident(schema));
            out.push(raw("."));
        }
        out.push(ident(&stmt.table));
        out.push(raw(" SET "));
        let assignments = stmt
            .assignments
            .iter()
            .map(|a| {
                let mut seg = vec![ident(&a.column), raw(" = ")];
                seg.extend(self.expr(&a.value)?);
                Ok(seg)
            })
            .collect::<RenderResult<Vec<_>>>()?;
        out.extend(joined(assignments, ", "));
        if let Some(predicate) = &stmt.where_clause {
            out.push(raw(" WHERE "));
            out.extend(self.expr(predicate)?);
        }
        Ok(out)
    }
}

static VALID_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));
static INVALID_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("valid regex"));

/// Make `suggested` usable as a named placeholder
fn sanitize(suggested: &str) -> String {
    if VALID_NAME.is_match(suggested) {
        return suggested.to_string();
    }
    let cleaned = INVALID_CHARS.replace_all(suggested, "_");
    match cleaned.chars().next() {
        None => "p".to_string(),
        Some(c) if c.is_ascii_digit() => format!("p_{}", cleaned),
        Some(_) => cleaned.into_owned(),
    }
}

/// Reserve a placeholder name not used earlier in the same command
fn reserve(suggested: &str, used: &mut HashSet<String>) -> String {
    let base = sanitize(suggested);
    let mut candidate = base.clone();
    let mut n = 2;
    while !used.insert(candidate.to_ascii_lowercase()) {
        candidate = format!("{}_{}", base, n);
        n += 1;
    }
    candidate
}

/// Turn segments into command text and ordered parameter slots.
///
/// Every bound segment becomes exactly one placeholder, numbered in the order
/// the segments appear.
pub fn parameterize(segments: &[Segment], dialect: &dyn Dialect) -> RenderedCommand {
    let mut text = String::new();
    let mut parameters = Vec::new();
    let mut used = HashSet::new();

    for segment in segments {
        match segment {
            Segment::Raw(s) => text.push_str(s),
            Segment::Identifier(name) => text.push_str(&dialect.quote_identifier(name)),
            Segment::BoundConstant { name, value } => {
                let name = reserve(name, &mut used);
                text.push_str(&dialect.placeholder(parameters.len() + 1, &name));
                parameters.push(ParameterSlot::Constant {
                    name,
                    value: value.clone(),
                });
            }
            Segment::BoundInput { name, value_type } => {
                let placeholder_name = reserve(name, &mut used);
                text.push_str(&dialect.placeholder(parameters.len() + 1, &placeholder_name));
                parameters.push(ParameterSlot::Input {
                    name: placeholder_name,
                    input: name.clone(),
                    value_type: *value_type,
                });
            }
        }
    }

    RenderedCommand { text, parameters }
}

/// Render and parameterize a statement in one step
pub fn render(stmt: &Statement, dialect: &dyn Dialect) -> RenderResult<RenderedCommand> {
    let segments = Renderer::new(dialect).statement(stmt)?;
    Ok(parameterize(&segments, dialect))
}
