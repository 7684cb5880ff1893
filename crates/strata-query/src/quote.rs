//! Quoted function trees.
//!
//! A [`Lambda`] is an inspectable description of a small function: a filter
//! condition, a sort key, a projection or an update setter. Callers build it
//! with the helpers in this module instead of writing a closure, which lets the
//! translator turn it into SQL.
//!
//! ```rust
//! use strata_query::quote::{constant, lambda, param};
//!
//! // u => u.Name == "Jeremy"
//! let pred = lambda(["u"], param("u").member("Name").equals(constant("Jeremy")));
//! assert_eq!(pred.to_string(), r#"u => (u.Name == "Jeremy")"#);
//! ```
//!
//! The operator set is wider than what translates to SQL so that callers can
//! express (and get a clear error for) things like `%` or `??`.

use crate::value::{Value, ValueType};
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// Binary operators of the quoted language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotedBinaryOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    AndAlso,
    OrElse,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    BitAnd,
    BitOr,
    ExclusiveOr,
    LeftShift,
    RightShift,
    Coalesce,
}

impl QuotedBinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::AndAlso => "&&",
            Self::OrElse => "||",
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::ExclusiveOr => "^",
            Self::LeftShift => "<<",
            Self::RightShift => ">>",
            Self::Coalesce => "??",
        }
    }
}

/// Unary operators of the quoted language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotedUnaryOp {
    Not,
    Negate,
    BitNot,
}

impl QuotedUnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Not => "!",
            Self::Negate => "-",
            Self::BitNot => "~",
        }
    }
}

/// A node of a quoted function tree
#[derive(Debug, Clone, PartialEq)]
pub enum Quoted {
    /// Reference to a lambda parameter
    Parameter(String),
    /// `target.name`
    Member { target: Box<Quoted>, name: String },
    /// A value captured when the tree was built
    Constant(Value),
    /// A named value supplied at execution time
    Input { name: String, value_type: ValueType },
    Binary {
        op: QuotedBinaryOp,
        left: Box<Quoted>,
        right: Box<Quoted>,
    },
    Unary { op: QuotedUnaryOp, operand: Box<Quoted> },
    /// `target.method(args)`, or a free call when `target` is `None`
    Call {
        target: Option<Box<Quoted>>,
        method: String,
        args: Vec<Quoted>,
    },
    /// Tuple/object construction, members in declaration order
    Construct {
        type_name: Option<String>,
        members: Vec<(String, Quoted)>,
    },
    Lambda(Box<Lambda>),
    /// A table used as the root of a quoted sequence expression
    Source(String),
}

/// A quoted function: parameter names and a body
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Quoted,
}

impl Lambda {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// `x => x`
    pub fn identity(param_name: impl Into<String>) -> Self {
        let name = param_name.into();
        Self {
            params: vec![name.clone()],
            body: Quoted::Parameter(name),
        }
    }

    /// True for `x => x`
    pub fn is_identity(&self) -> bool {
        matches!((&self.params[..], &self.body), ([p], Quoted::Parameter(b)) if p == b)
    }
}

/// Build a lambda
pub fn lambda<I, S>(params: I, body: Quoted) -> Lambda
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Lambda {
        params: params.into_iter().map(Into::into).collect(),
        body,
    }
}

/// Reference a lambda parameter
pub fn param(name: impl Into<String>) -> Quoted {
    Quoted::Parameter(name.into())
}

/// Capture a value
pub fn constant(value: impl Into<Value>) -> Quoted {
    Quoted::Constant(value.into())
}

/// A value supplied by name at execution time
pub fn input(name: impl Into<String>, value_type: ValueType) -> Quoted {
    Quoted::Input {
        name: name.into(),
        value_type,
    }
}

/// Root a sequence expression at a table
pub fn source(table: impl Into<String>) -> Quoted {
    Quoted::Source(table.into())
}

/// Anonymous object construction: `new { A = .., B = .. }`
pub fn object<I, S>(members: I) -> Quoted
where
    I: IntoIterator<Item = (S, Quoted)>,
    S: Into<String>,
{
    Quoted::Construct {
        type_name: None,
        members: members.into_iter().map(|(n, q)| (n.into(), q)).collect(),
    }
}

/// Named type construction: `new T { A = .., B = .. }`
pub fn construct<I, S>(type_name: impl Into<String>, members: I) -> Quoted
where
    I: IntoIterator<Item = (S, Quoted)>,
    S: Into<String>,
{
    Quoted::Construct {
        type_name: Some(type_name.into()),
        members: members.into_iter().map(|(n, q)| (n.into(), q)).collect(),
    }
}

/// Free function call
pub fn call(method: impl Into<String>, args: Vec<Quoted>) -> Quoted {
    Quoted::Call {
        target: None,
        method: method.into(),
        args,
    }
}

impl Quoted {
    /// Short node kind, used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parameter(_) => "parameter",
            Self::Member { .. } => "member access",
            Self::Constant(_) => "constant",
            Self::Input { .. } => "input",
            Self::Binary { .. } => "binary expression",
            Self::Unary { .. } => "unary expression",
            Self::Call { .. } => "call",
            Self::Construct { .. } => "construction",
            Self::Lambda(_) => "lambda",
            Self::Source(_) => "source",
        }
    }

    pub fn member(self, name: impl Into<String>) -> Self {
        Self::Member {
            target: Box::new(self),
            name: name.into(),
        }
    }

    pub fn binary(self, op: QuotedBinaryOp, rhs: impl Into<Quoted>) -> Self {
        Self::Binary {
            op,
            left: Box::new(self),
            right: Box::new(rhs.into()),
        }
    }

    pub fn equals(self, rhs: impl Into<Quoted>) -> Self {
        self.binary(QuotedBinaryOp::Equal, rhs)
    }

    pub fn not_equals(self, rhs: impl Into<Quoted>) -> Self {
        self.binary(QuotedBinaryOp::NotEqual, rhs)
    }

    pub fn lt(self, rhs: impl Into<Quoted>) -> Self {
        self.binary(QuotedBinaryOp::LessThan, rhs)
    }

    pub fn le(self, rhs: impl Into<Quoted>) -> Self {
        self.binary(QuotedBinaryOp::LessThanOrEqual, rhs)
    }

    pub fn gt(self, rhs: impl Into<Quoted>) -> Self {
        self.binary(QuotedBinaryOp::GreaterThan, rhs)
    }

    pub fn ge(self, rhs: impl Into<Quoted>) -> Self {
        self.binary(QuotedBinaryOp::GreaterThanOrEqual, rhs)
    }

    pub fn and(self, rhs: impl Into<Quoted>) -> Self {
        self.binary(QuotedBinaryOp::AndAlso, rhs)
    }

    pub fn or(self, rhs: impl Into<Quoted>) -> Self {
        self.binary(QuotedBinaryOp::OrElse, rhs)
    }

    pub fn plus(self, rhs: impl Into<Quoted>) -> Self {
        self.binary(QuotedBinaryOp::Add, rhs)
    }

    pub fn minus(self, rhs: impl Into<Quoted>) -> Self {
        self.binary(QuotedBinaryOp::Subtract, rhs)
    }

    pub fn times(self, rhs: impl Into<Quoted>) -> Self {
        self.binary(QuotedBinaryOp::Multiply, rhs)
    }

    pub fn divided_by(self, rhs: impl Into<Quoted>) -> Self {
        self.binary(QuotedBinaryOp::Divide, rhs)
    }

    pub fn modulo(self, rhs: impl Into<Quoted>) -> Self {
        self.binary(QuotedBinaryOp::Modulo, rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Unary {
            op: QuotedUnaryOp::Not,
            operand: Box::new(self),
        }
    }

    pub fn negate(self) -> Self {
        Self::Unary {
            op: QuotedUnaryOp::Negate,
            operand: Box::new(self),
        }
    }

    /// `self.method(args)`
    pub fn call(self, method: impl Into<String>, args: Vec<Quoted>) -> Self {
        Self::Call {
            target: Some(Box::new(self)),
            method: method.into(),
            args,
        }
    }

    pub fn contains(self, needle: impl Into<Quoted>) -> Self {
        self.call("contains", vec![needle.into()])
    }

    pub fn starts_with(self, prefix: impl Into<Quoted>) -> Self {
        self.call("starts_with", vec![prefix.into()])
    }

    pub fn ends_with(self, suffix: impl Into<Quoted>) -> Self {
        self.call("ends_with", vec![suffix.into()])
    }

    /// `seq.where(pred)`
    pub fn where_(self, predicate: Lambda) -> Self {
        self.call("where", vec![predicate.into()])
    }

    /// `seq.select(projection)`
    pub fn select(self, projection: Lambda) -> Self {
        self.call("select", vec![projection.into()])
    }

    /// `seq.order_by(key)`
    pub fn order_by(self, key: Lambda) -> Self {
        self.call("order_by", vec![key.into()])
    }

    /// `seq.order_by_descending(key)`
    pub fn order_by_descending(self, key: Lambda) -> Self {
        self.call("order_by_descending", vec![key.into()])
    }

    /// `seq.skip(n)`
    pub fn skip(self, count: i64) -> Self {
        self.call("skip", vec![constant(count)])
    }

    /// `seq.take(n)`
    pub fn take(self, count: i64) -> Self {
        self.call("take", vec![constant(count)])
    }

    /// `outer.join(inner, outer_key, inner_key, result)`
    pub fn join(self, inner: Quoted, outer_key: Lambda, inner_key: Lambda, result: Lambda) -> Self {
        self.call(
            "join",
            vec![inner, outer_key.into(), inner_key.into(), result.into()],
        )
    }
}

impl From<Lambda> for Quoted {
    fn from(l: Lambda) -> Self {
        Self::Lambda(Box::new(l))
    }
}

impl From<Value> for Quoted {
    fn from(v: Value) -> Self {
        Self::Constant(v)
    }
}

macro_rules! quoted_from_constant {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Quoted {
                fn from(v: $ty) -> Self {
                    Self::Constant(v.into())
                }
            }
        )*
    };
}

quoted_from_constant!(i64, i32, f64, bool, String, &str, Uuid, DateTime<Utc>);

impl fmt::Display for Quoted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parameter(name) => f.write_str(name),
            Self::Member { target, name } => write!(f, "{}.{}", target, name),
            Self::Constant(v) => write!(f, "{}", v),
            Self::Input { name, .. } => write!(f, "@{}", name),
            Self::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Self::Unary { op, operand } => write!(f, "{}{}", op.symbol(), operand),
            Self::Call {
                target,
                method,
                args,
            } => {
                if let Some(target) = target {
                    write!(f, "{}.", target)?;
                }
                write!(f, "{}(", method)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Self::Construct { type_name, members } => {
                match type_name {
                    Some(name) => write!(f, "new {} {{ ", name)?,
                    None => f.write_str("new { ")?,
                }
                for (i, (name, value)) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} = {}", name, value)?;
                }
                f.write_str(" }")
            }
            Self::Lambda(l) => write!(f, "{}", l),
            Self::Source(table) => write!(f, "{}", table),
        }
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.params.as_slice() {
            [single] => write!(f, "{} => {}", single, self.body),
            params => write!(f, "({}) => {}", params.join(", "), self.body),
        }
    }
}
