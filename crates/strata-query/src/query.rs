//! Query algebra.
//!
//! A query is an immutable tree of [`QueryNode`]s. Every fluent operator on
//! [`Query`] returns a new node wrapping the receiver, so a query can be the
//! shared ancestor of any number of pipelines.
//!
//! ```rust
//! use std::sync::Arc;
//! use strata_query::bind::{Bind, RecordShape, Shape};
//! use strata_query::model::{Entity, TableModel};
//! use strata_query::query::from;
//! use strata_query::quote::{constant, lambda, param};
//! use strata_query::value::{Value, ValueType};
//!
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//!
//! impl Bind for User {
//!     fn shape() -> Shape<Self> {
//!         Shape::Record(RecordShape::new("User").constructor(vec!["Id", "Name"], |f| {
//!             Ok(User { id: f.get("Id")?, name: f.get("Name")? })
//!         }))
//!     }
//! }
//!
//! impl Entity for User {
//!     fn table() -> Arc<TableModel> {
//!         Arc::new(
//!             TableModel::new("User")
//!                 .column("Id", ValueType::Integer)
//!                 .column("Name", ValueType::Text),
//!         )
//!     }
//!
//!     fn values(&self) -> Vec<Value> {
//!         vec![self.id.into(), self.name.clone().into()]
//!     }
//! }
//!
//! let jeremys = from::<User>()
//!     .filter(lambda(["u"], param("u").member("Name").equals(constant("Jeremy"))))
//!     .take(2)
//!     .produce();
//! assert_eq!(
//!     jeremys.node().to_string(),
//!     r#"from(User).filter(u => (u.Name == "Jeremy")).take(2).produce()"#
//! );
//! ```

use crate::model::{Entity, TableModel};
use crate::quote::{Lambda, Quoted};
use crate::sql::SortDirection;
use crate::tree::ImmutableList;
use crate::value::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A node of the query tree. `From` and `Quoted` are the only leaves.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    From(Arc<TableModel>),
    /// A quoted sequence expression rooted at a table
    Quoted(Quoted),
    Filter {
        inner: Arc<QueryNode>,
        predicate: Lambda,
    },
    Join {
        left: Arc<QueryNode>,
        right: Arc<QueryNode>,
        condition: Lambda,
    },
    Map {
        inner: Arc<QueryNode>,
        projection: Lambda,
    },
    Sort {
        inner: Arc<QueryNode>,
        key: Lambda,
        direction: SortDirection,
        primary: bool,
    },
    Take {
        inner: Arc<QueryNode>,
        count: u64,
    },
    Skip {
        inner: Arc<QueryNode>,
        count: u64,
    },
    Insert {
        inner: Arc<QueryNode>,
        columns: ImmutableList<String>,
        rows: ImmutableList<ImmutableList<Value>>,
    },
    Update {
        inner: Arc<QueryNode>,
        setter: Lambda,
    },
    Count(Arc<QueryNode>),
    Produce(Arc<QueryNode>),
}

impl QueryNode {
    /// Variant name, used in diagnostics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::From(_) => "from",
            Self::Quoted(_) => "quoted",
            Self::Filter { .. } => "filter",
            Self::Join { .. } => "join",
            Self::Map { .. } => "map",
            Self::Sort { .. } => "sort",
            Self::Take { .. } => "take",
            Self::Skip { .. } => "skip",
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Count(_) => "count",
            Self::Produce(_) => "produce",
        }
    }

    /// Child nodes, left to right
    pub fn children(&self) -> Vec<&QueryNode> {
        match self {
            Self::From(_) | Self::Quoted(_) => Vec::new(),
            Self::Join { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Self::Filter { inner, .. }
            | Self::Map { inner, .. }
            | Self::Sort { inner, .. }
            | Self::Take { inner, .. }
            | Self::Skip { inner, .. }
            | Self::Insert { inner, .. }
            | Self::Update { inner, .. }
            | Self::Count(inner)
            | Self::Produce(inner) => vec![inner.as_ref()],
        }
    }

    /// Number of nodes in this tree
    pub fn size(&self) -> usize {
        1 + self.children().iter().map(|c| c.size()).sum::<usize>()
    }
}

impl fmt::Display for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::From(model) => write!(f, "from({})", model.qualified_name()),
            Self::Quoted(q) => write!(f, "quoted({})", q),
            Self::Filter { inner, predicate } => write!(f, "{}.filter({})", inner, predicate),
            Self::Join {
                left,
                right,
                condition,
            } => write!(f, "{}.join({}, {})", left, right, condition),
            Self::Map { inner, projection } => write!(f, "{}.map({})", inner, projection),
            Self::Sort {
                inner,
                key,
                direction,
                primary,
            } => {
                let op = match (primary, direction) {
                    (true, SortDirection::Ascending) => "asc",
                    (true, SortDirection::Descending) => "desc",
                    (false, SortDirection::Ascending) => "then_asc",
                    (false, SortDirection::Descending) => "then_desc",
                };
                write!(f, "{}.{}({})", inner, op, key)
            }
            Self::Take { inner, count } => write!(f, "{}.take({})", inner, count),
            Self::Skip { inner, count } => write!(f, "{}.skip({})", inner, count),
            Self::Insert { inner, rows, .. } => {
                write!(f, "{}.insert({} row(s))", inner, rows.len())
            }
            Self::Update { inner, setter } => write!(f, "{}.update({})", inner, setter),
            Self::Count(inner) => write!(f, "{}.count()", inner),
            Self::Produce(inner) => write!(f, "{}.produce()", inner),
        }
    }
}

/// A query whose rows have type `T`
pub struct Query<T> {
    node: Arc<QueryNode>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Query").field(&self.node).finish()
    }
}

/// Read every row of `T`'s table
pub fn from<T: Entity>() -> Query<T> {
    Query::from_node(QueryNode::From(T::table()))
}

impl<T> Query<T> {
    fn from_node(node: QueryNode) -> Self {
        Self {
            node: Arc::new(node),
            _marker: PhantomData,
        }
    }

    /// A query over a quoted sequence expression such as
    /// `source("User").where_(..).take(5)`
    pub fn quoted(expr: Quoted) -> Self {
        Self::from_node(QueryNode::Quoted(expr))
    }

    pub fn node(&self) -> &QueryNode {
        &self.node
    }

    fn wrap<U>(&self, node: QueryNode) -> Query<U> {
        Query::from_node(node)
    }

    fn inner(&self) -> Arc<QueryNode> {
        Arc::clone(&self.node)
    }

    pub fn filter(&self, predicate: Lambda) -> Self {
        self.wrap(QueryNode::Filter {
            inner: self.inner(),
            predicate,
        })
    }

    /// Inner join; `condition` takes one parameter per side, or one composite
    /// parameter whose members are the side table names
    pub fn join<U>(&self, right: &Query<U>, condition: Lambda) -> Query<(T, U)> {
        self.wrap(QueryNode::Join {
            left: self.inner(),
            right: right.inner(),
            condition,
        })
    }

    pub fn map<U>(&self, projection: Lambda) -> Query<U> {
        self.wrap(QueryNode::Map {
            inner: self.inner(),
            projection,
        })
    }

    fn sort(&self, key: Lambda, direction: SortDirection, primary: bool) -> Self {
        self.wrap(QueryNode::Sort {
            inner: self.inner(),
            key,
            direction,
            primary,
        })
    }

    pub fn asc(&self, key: Lambda) -> Self {
        self.sort(key, SortDirection::Ascending, true)
    }

    pub fn desc(&self, key: Lambda) -> Self {
        self.sort(key, SortDirection::Descending, true)
    }

    pub fn then_asc(&self, key: Lambda) -> Self {
        self.sort(key, SortDirection::Ascending, false)
    }

    pub fn then_desc(&self, key: Lambda) -> Self {
        self.sort(key, SortDirection::Descending, false)
    }

    pub fn take(&self, count: u64) -> Self {
        self.wrap(QueryNode::Take {
            inner: self.inner(),
            count,
        })
    }

    pub fn skip(&self, count: u64) -> Self {
        self.wrap(QueryNode::Skip {
            inner: self.inner(),
            count,
        })
    }

    /// Assign columns of every matching row: `x => new { Col = value, .. }`
    pub fn update(&self, setter: Lambda) -> Self {
        self.wrap(QueryNode::Update {
            inner: self.inner(),
            setter,
        })
    }

    /// Number of rows
    pub fn count(&self) -> Count {
        Count {
            node: Arc::new(QueryNode::Count(self.inner())),
        }
    }

    /// Fetch the rows
    pub fn produce(&self) -> Produce<T> {
        Produce {
            node: Arc::new(QueryNode::Produce(self.inner())),
            _marker: PhantomData,
        }
    }
}

impl<T: Entity> Query<T> {
    pub fn insert(&self, item: &T) -> Self {
        self.insert_range(std::iter::once(item))
    }

    /// Insert one row per item, columns in table-model order
    pub fn insert_range<'a, I>(&self, items: I) -> Self
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        let columns = T::table().column_names().map(str::to_string).collect();
        let rows = items
            .into_iter()
            .map(|item| ImmutableList::from(item.values()))
            .collect();
        self.wrap(QueryNode::Insert {
            inner: self.inner(),
            columns,
            rows,
        })
    }
}

/// Terminal: fetch rows of `T`
pub struct Produce<T> {
    node: Arc<QueryNode>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Produce<T> {
    pub fn node(&self) -> &QueryNode {
        &self.node
    }
}

impl<T> Clone for Produce<T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            _marker: PhantomData,
        }
    }
}

/// Terminal: count rows
#[derive(Debug, Clone)]
pub struct Count {
    node: Arc<QueryNode>,
}

impl Count {
    pub fn node(&self) -> &QueryNode {
        &self.node
    }
}
