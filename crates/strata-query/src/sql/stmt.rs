//! SQL statement nodes.
//!
//! Statements are plain data. The `with_*` builders consume and return the
//! node, and child lists are [`ImmutableList`]s, so a statement that has been
//! handed to someone else is never changed underneath them.

use super::expr::{Expr, Ident};
use crate::tree::ImmutableList;

/// Sort direction of an ordering term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// One entry of a select list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResultColumn {
    /// `*`
    Asterisk,
    /// `expr [AS alias]`
    Expr { expr: Expr, alias: Option<Ident> },
    /// `table.*`
    TableWildcard(Ident),
}

impl ResultColumn {
    pub fn expr(expr: Expr) -> Self {
        Self::Expr { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: impl Into<Ident>) -> Self {
        Self::Expr {
            expr,
            alias: Some(alias.into()),
        }
    }
}

/// A FROM item
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableSource {
    Table {
        name: Ident,
        schema: Option<Ident>,
        alias: Option<Ident>,
    },
    Join(Box<JoinClause>),
    Subquery {
        query: Box<SelectStatement>,
        alias: Option<Ident>,
    },
}

impl TableSource {
    pub fn table(name: impl Into<Ident>) -> Self {
        Self::Table {
            name: name.into(),
            schema: None,
            alias: None,
        }
    }

    /// Name other clauses use to qualify columns of this source
    pub fn reference_name(&self) -> Option<&Ident> {
        match self {
            Self::Table { name, alias, .. } => Some(alias.as_ref().unwrap_or(name)),
            Self::Subquery { alias, .. } => alias.as_ref(),
            Self::Join(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinOperator {
    Inner,
    Left,
    Cross,
}

impl JoinOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Cross => "CROSS JOIN",
        }
    }
}

/// `operator source [ON constraint]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinedTable {
    pub operator: JoinOperator,
    pub source: TableSource,
    pub constraint: Option<Expr>,
}

/// `left operator source ON ... operator source ON ...`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinClause {
    pub left: TableSource,
    pub joins: ImmutableList<JoinedTable>,
}

impl JoinClause {
    pub fn new(left: TableSource) -> Self {
        Self {
            left,
            joins: ImmutableList::new(),
        }
    }

    pub fn join(mut self, operator: JoinOperator, source: TableSource, on: Option<Expr>) -> Self {
        self.joins = self.joins.push_back(JoinedTable {
            operator,
            source,
            constraint: on,
        });
        self
    }
}

/// `SELECT ... FROM ... WHERE ... GROUP BY ... HAVING ...`
///
/// `table_sources` and `join_clause` are mutually exclusive; the renderer
/// rejects a core that sets both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SelectCore {
    pub distinct: bool,
    pub result_columns: ImmutableList<ResultColumn>,
    pub table_sources: ImmutableList<TableSource>,
    pub join_clause: Option<JoinClause>,
    pub where_clause: Option<Expr>,
    pub group_by: ImmutableList<Expr>,
    pub having: Option<Expr>,
}

impl SelectCore {
    /// `SELECT * FROM source`
    pub fn from_source(source: TableSource) -> Self {
        Self {
            result_columns: ImmutableList::from(vec![ResultColumn::Asterisk]),
            table_sources: ImmutableList::from(vec![source]),
            ..Default::default()
        }
    }

    pub fn with_columns(mut self, columns: ImmutableList<ResultColumn>) -> Self {
        self.result_columns = columns;
        self
    }

    /// Set the WHERE clause, AND-ing with an existing one
    pub fn with_where(mut self, predicate: Expr) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn with_join(mut self, join: JoinClause) -> Self {
        self.join_clause = Some(join);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompoundOperator {
    Union,
    UnionAll,
    Intersect,
    Except,
}

impl CompoundOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Union => "UNION",
            Self::UnionAll => "UNION ALL",
            Self::Intersect => "INTERSECT",
            Self::Except => "EXCEPT",
        }
    }
}

/// `name [(columns)] AS (query)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommonTableExpr {
    pub name: Ident,
    pub columns: ImmutableList<Ident>,
    pub query: SelectStatement,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderingTerm {
    pub expr: Expr,
    pub direction: SortDirection,
}

/// A full SELECT statement
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SelectStatement {
    pub common_table_exprs: ImmutableList<CommonTableExpr>,
    pub select_cores: ImmutableList<SelectCore>,
    pub compound_op: Option<CompoundOperator>,
    pub ordering_terms: ImmutableList<OrderingTerm>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
}

impl SelectStatement {
    pub fn from_core(core: SelectCore) -> Self {
        Self {
            select_cores: ImmutableList::from(vec![core]),
            ..Default::default()
        }
    }

    pub fn with_ordering(mut self, term: OrderingTerm) -> Self {
        self.ordering_terms = self.ordering_terms.push_back(term);
        self
    }

    pub fn with_limit(mut self, limit: Expr) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: Expr) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_cte(mut self, cte: CommonTableExpr) -> Self {
        self.common_table_exprs = self.common_table_exprs.push_back(cte);
        self
    }

    /// The only core of a non-compound statement
    pub fn single_core(&self) -> Option<&SelectCore> {
        match self.select_cores.as_slice() {
            [core] => Some(core),
            _ => None,
        }
    }

    /// The only result column of a non-compound statement
    pub fn single_column(&self) -> Option<&ResultColumn> {
        match self.single_core()?.result_columns.as_slice() {
            [column] => Some(column),
            _ => None,
        }
    }

    /// Replace the only core; a no-op for compound statements
    pub fn map_core(mut self, f: impl FnOnce(SelectCore) -> SelectCore) -> Self {
        if let [core] = self.select_cores.as_slice() {
            self.select_cores = ImmutableList::from(vec![f(core.clone())]);
        }
        self
    }

    pub fn is_paged(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }
}

/// `INSERT INTO table (columns) VALUES (...), (...)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InsertStatement {
    pub table: Ident,
    pub schema: Option<Ident>,
    pub columns: ImmutableList<Ident>,
    pub rows: ImmutableList<ImmutableList<Expr>>,
}

/// `column = value`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Assignment {
    pub column: Ident,
    pub value: Expr,
}

/// `UPDATE table SET ... [WHERE ...]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpdateStatement {
    pub table: Ident,
    pub schema: Option<Ident>,
    pub assignments: ImmutableList<Assignment>,
    pub where_clause: Option<Expr>,
}

/// Any renderable statement
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Statement {
    Select(SelectStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
}

impl Statement {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Select(_) => "select",
            Self::Insert(_) => "insert",
            Self::Update(_) => "update",
        }
    }
}

impl From<SelectStatement> for Statement {
    fn from(s: SelectStatement) -> Self {
        Self::Select(s)
    }
}

impl From<InsertStatement> for Statement {
    fn from(s: InsertStatement) -> Self {
        Self::Insert(s)
    }
}

impl From<UpdateStatement> for Statement {
    fn from(s: UpdateStatement) -> Self {
        Self::Update(s)
    }
}
