//! Table models.
//!
//! The engine does not discover schema. Entity types register their table
//! model explicitly through [`Entity`], and a [`Catalog`] offers the same
//! models by name to anything that only has a table name in hand (quoted
//! sequence sources, for example).

use crate::bind::Bind;
use crate::tree::ImmutableList;
use crate::value::{Value, ValueType};
use std::collections::HashMap;
use std::sync::Arc;

/// A column of a table model
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnModel {
    pub name: String,
    /// Store type as declared in the database (`TEXT`, `uuid`, ...)
    pub store_type: String,
    pub value_type: ValueType,
    pub nullable: bool,
}

/// Read-only description of a table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableModel {
    pub schema: Option<String>,
    pub name: String,
    pub columns: ImmutableList<ColumnModel>,
    pub primary_key: ImmutableList<String>,
}

impl TableModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            columns: ImmutableList::new(),
            primary_key: ImmutableList::new(),
        }
    }

    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add a non-null column whose store type is the canonical name of `value_type`
    pub fn column(self, name: impl Into<String>, value_type: ValueType) -> Self {
        let store_type = value_type.store_name().to_string();
        self.with_column(ColumnModel {
            name: name.into(),
            store_type,
            value_type,
            nullable: false,
        })
    }

    pub fn nullable_column(self, name: impl Into<String>, value_type: ValueType) -> Self {
        let store_type = value_type.store_name().to_string();
        self.with_column(ColumnModel {
            name: name.into(),
            store_type,
            value_type,
            nullable: true,
        })
    }

    pub fn with_column(mut self, column: ColumnModel) -> Self {
        self.columns = self.columns.push_back(column);
        self
    }

    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Look up a column by member name; exact match first, then case-insensitive
    pub fn find_column(&self, member: &str) -> Option<&ColumnModel> {
        self.columns
            .iter()
            .find(|c| c.name == member)
            .or_else(|| {
                self.columns
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(member))
            })
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// `schema.name`, or just `name`
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }
}

/// A row type backed by a table.
///
/// `values` must yield one value per column of `table()`, in column order;
/// the insert path relies on it.
pub trait Entity: Bind {
    fn table() -> Arc<TableModel>;

    fn values(&self) -> Vec<Value>;
}

/// Resolves table models by name
pub trait SchemaProvider: Send + Sync {
    fn table(&self, name: &str) -> Option<Arc<TableModel>>;
}

/// Registry of table models keyed by qualified name
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: HashMap<String, Arc<TableModel>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity's table model under its qualified name
    pub fn register<E: Entity>(&mut self) -> &mut Self {
        self.register_model(E::table())
    }

    pub fn register_model(&mut self, model: Arc<TableModel>) -> &mut Self {
        self.tables.insert(model.qualified_name(), model);
        self
    }

    pub fn with<E: Entity>(mut self) -> Self {
        self.register::<E>();
        self
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl SchemaProvider for Catalog {
    /// Looks up `schema.name` or `name` as registered. A bare name that was
    /// only registered under schemas resolves when exactly one schema has it.
    fn table(&self, name: &str) -> Option<Arc<TableModel>> {
        if let Some(model) = self.tables.get(name) {
            return Some(Arc::clone(model));
        }
        if let Some((_, model)) = self
            .tables
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            return Some(Arc::clone(model));
        }

        let mut bare = self
            .tables
            .values()
            .filter(|model| model.name.eq_ignore_ascii_case(name));
        match (bare.next(), bare.next()) {
            (Some(model), None) => Some(Arc::clone(model)),
            _ => None,
        }
    }
}
