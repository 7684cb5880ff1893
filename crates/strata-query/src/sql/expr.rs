//! SQL expression nodes.

use super::stmt::{ResultColumn, SelectStatement};
use crate::value::{Value, ValueType};
use std::fmt;

/// An unquoted SQL identifier; quoting happens at render time
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(String);

impl Ident {
    #[inline]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Ident {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Ident {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&String> for Ident {
    fn from(s: &String) -> Self {
        Self(s.clone())
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A possibly qualified column reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    pub name: Ident,
    pub table: Option<Ident>,
    pub schema: Option<Ident>,
    pub value_type: Option<ValueType>,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Like,
    /// String concatenation; spelled per dialect
    Concat,
}

impl BinaryOperator {
    /// SQL spelling, except `Concat` whose spelling belongs to the dialect
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Like => "LIKE",
            Self::Concat => "||",
        }
    }

    pub fn is_predicate(&self) -> bool {
        matches!(
            self,
            Self::Eq
                | Self::NotEq
                | Self::Lt
                | Self::LtEq
                | Self::Gt
                | Self::GtEq
                | Self::And
                | Self::Or
                | Self::Like
        )
    }
}

/// Unary operators. `IsNull`/`IsNotNull` render postfix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Not,
    IsNull,
    IsNotNull,
}

/// Where a bound parameter's value comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParameterSource {
    /// Known at translation time
    Constant(Value),
    /// Supplied by name when the command is executed
    Input,
}

/// A value that reaches the database only as a parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BoundParameter {
    pub value_type: Option<ValueType>,
    pub suggested_name: String,
    pub source: ParameterSource,
}

/// SQL expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Column(Column),
    Binary {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<Expr>,
    },
    /// Engine-generated integer literal (LIMIT counts)
    LiteralInt(i64),
    /// Engine-generated string literal (LIKE wildcards); never user data
    LiteralString(String),
    BoundParameter(BoundParameter),
    /// `COUNT(*)`
    CountAll,
    /// `(SELECT ...)` yielding a single column
    Subquery(Box<SelectStatement>),
}

impl Expr {
    pub fn column(name: impl Into<Ident>) -> Self {
        Self::Column(Column {
            name: name.into(),
            table: None,
            schema: None,
            value_type: None,
        })
    }

    pub fn qualified(
        table: impl Into<Ident>,
        name: impl Into<Ident>,
        value_type: Option<ValueType>,
    ) -> Self {
        Self::Column(Column {
            name: name.into(),
            table: Some(table.into()),
            schema: None,
            value_type,
        })
    }

    pub fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOperator, operand: Expr) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn and(self, other: Expr) -> Self {
        Self::binary(self, BinaryOperator::And, other)
    }

    /// Bound constant; the value never appears in command text
    pub fn constant(value: Value, suggested_name: impl Into<String>) -> Self {
        Self::BoundParameter(BoundParameter {
            value_type: value.value_type(),
            suggested_name: suggested_name.into(),
            source: ParameterSource::Constant(value),
        })
    }

    /// Bound input, filled in at execution time
    pub fn input(name: impl Into<String>, value_type: ValueType) -> Self {
        Self::BoundParameter(BoundParameter {
            value_type: Some(value_type),
            suggested_name: name.into(),
            source: ParameterSource::Input,
        })
    }

    /// Value type of this expression, when it can be derived
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Self::Column(c) => c.value_type,
            Self::Binary { op, left, right } => match op {
                BinaryOperator::Concat => Some(ValueType::Text),
                op if op.is_predicate() => Some(ValueType::Boolean),
                _ => match (left.value_type(), right.value_type()) {
                    (Some(ValueType::Real), _) | (_, Some(ValueType::Real)) => {
                        Some(ValueType::Real)
                    }
                    (l, r) => l.or(r),
                },
            },
            Self::Unary { .. } => Some(ValueType::Boolean),
            Self::LiteralInt(_) | Self::CountAll => Some(ValueType::Integer),
            Self::LiteralString(_) => Some(ValueType::Text),
            Self::BoundParameter(p) => p.value_type,
            Self::Subquery(query) => match query.single_column() {
                Some(ResultColumn::Expr { expr, .. }) => expr.value_type(),
                _ => None,
            },
        }
    }

    /// The column, if this expression is a bare column reference
    pub fn as_column(&self) -> Option<&Column> {
        match self {
            Self::Column(c) => Some(c),
            _ => None,
        }
    }
}
