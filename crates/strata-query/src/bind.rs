//! Row materialization.
//!
//! Target types describe how they are built from a row through [`Bind`]. A
//! scalar type binds a single-column result directly. A record type registers
//! its constructors as lists of parameter names plus a build function, and may
//! also offer a default value with named setters as a fallback.
//!
//! Selection rules, given a result set's column names:
//!
//! 1. One column whose declared type feeds a scalar target: each row becomes
//!    one scalar.
//! 2. Otherwise the constructor whose parameter names are a case-insensitive
//!    subset of the columns and that uses the most columns wins; ties go to
//!    the first registered.
//! 3. Otherwise the default value is built and every column with a matching
//!    setter (case-insensitive) is assigned.
//! 4. Otherwise binding fails with [`BindError::NoMatchingConstructor`].

use crate::error::{BindError, BindResult, ConvertError, FieldError};
use crate::value::{FromValue, Value, ValueType};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Name and declared type of a result column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared: Option<ValueType>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, declared: Option<ValueType>) -> Self {
        Self {
            name: name.into(),
            declared,
        }
    }
}

/// Rows returned by a query together with their column schema
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowSet {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(name))
            })
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Named access to one row's values, handed to constructor build functions
pub struct Fields<'r> {
    row: &'r [Value],
    indices: &'r [(&'static str, usize)],
}

impl<'r> Fields<'r> {
    /// Convert the value of the column matching constructor parameter `name`
    pub fn get<T: FromValue>(&self, name: &'static str) -> Result<T, FieldError> {
        let index = self
            .indices
            .iter()
            .find(|(param, _)| *param == name)
            .map(|(_, idx)| *idx)
            .ok_or_else(|| FieldError {
                column: name.to_string(),
                target: T::TARGET,
                cause: ConvertError::new(T::TARGET, "missing column"),
            })?;
        let value = self.row.get(index).cloned().ok_or_else(|| FieldError {
            column: name.to_string(),
            target: T::TARGET,
            cause: ConvertError::new(T::TARGET, "missing value"),
        })?;
        T::from_value(value).map_err(|cause| FieldError {
            column: name.to_string(),
            target: T::TARGET,
            cause,
        })
    }
}

/// Build function of a registered constructor
pub type BuildFn<T> = fn(&Fields<'_>) -> Result<T, FieldError>;

/// Setter of the default-plus-setters fallback
pub type SetFn<T> = fn(&mut T, Value) -> Result<(), FieldError>;

/// A registered constructor: parameter names and how to build from them
pub struct Constructor<T> {
    pub params: Vec<&'static str>,
    pub build: BuildFn<T>,
}

impl<T> Constructor<T> {
    pub fn new(params: Vec<&'static str>, build: BuildFn<T>) -> Self {
        Self { params, build }
    }
}

/// A settable member for the fallback path
pub struct Setter<T> {
    pub name: &'static str,
    pub set: SetFn<T>,
}

/// Constructors and fallback of a record type
pub struct RecordShape<T> {
    pub type_name: &'static str,
    pub constructors: Vec<Constructor<T>>,
    pub default: Option<fn() -> T>,
    pub setters: Vec<Setter<T>>,
}

impl<T> RecordShape<T> {
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            constructors: Vec::new(),
            default: None,
            setters: Vec::new(),
        }
    }

    pub fn constructor(mut self, params: Vec<&'static str>, build: BuildFn<T>) -> Self {
        self.constructors.push(Constructor::new(params, build));
        self
    }

    pub fn default_with(mut self, default: fn() -> T) -> Self {
        self.default = Some(default);
        self
    }

    pub fn setter(mut self, name: &'static str, set: SetFn<T>) -> Self {
        self.setters.push(Setter { name, set });
        self
    }
}

/// How a type is built from rows
pub enum Shape<T> {
    Scalar {
        type_name: &'static str,
        value_type: ValueType,
        convert: fn(Value) -> Result<T, ConvertError>,
    },
    Record(RecordShape<T>),
}

/// Types that rows can be bound to
pub trait Bind: Sized {
    fn shape() -> Shape<Self>;
}

macro_rules! scalar_bind {
    ($($ty:ty => $vt:ident),* $(,)?) => {
        $(
            impl Bind for $ty {
                fn shape() -> Shape<Self> {
                    Shape::Scalar {
                        type_name: <$ty as FromValue>::TARGET,
                        value_type: ValueType::$vt,
                        convert: <$ty as FromValue>::from_value,
                    }
                }
            }

            impl Bind for Option<$ty> {
                fn shape() -> Shape<Self> {
                    Shape::Scalar {
                        type_name: <$ty as FromValue>::TARGET,
                        value_type: ValueType::$vt,
                        convert: <Option<$ty> as FromValue>::from_value,
                    }
                }
            }
        )*
    };
}

scalar_bind! {
    i64 => Integer,
    i32 => Integer,
    f64 => Real,
    bool => Boolean,
    String => Text,
    Vec<u8> => Blob,
    Uuid => Uuid,
    DateTime<Utc> => Timestamp,
}

/// Materialize every row of `rows` as a `T`.
///
/// `statement` is the command text the rows came from; it is attached to any
/// error for diagnosis.
pub fn bind_rows<T: Bind>(rows: RowSet, statement: &str) -> BindResult<Vec<T>> {
    match T::shape() {
        Shape::Scalar {
            type_name,
            value_type,
            convert,
        } => bind_scalars(rows, statement, type_name, value_type, convert),
        Shape::Record(shape) => bind_records(rows, statement, &shape),
    }
}

fn bind_scalars<T>(
    rows: RowSet,
    statement: &str,
    type_name: &'static str,
    value_type: ValueType,
    convert: fn(Value) -> Result<T, ConvertError>,
) -> BindResult<Vec<T>> {
    let column = match rows.columns.as_slice() {
        [only] if only.declared.map_or(true, |d| d.feeds(value_type)) => only.name.clone(),
        _ => {
            return Err(BindError::NoMatchingConstructor {
                target: type_name,
                columns: rows.column_names(),
                statement: statement.to_string(),
            })
        }
    };

    rows.rows
        .into_iter()
        .map(|row| {
            let value = row.into_iter().next().unwrap_or(Value::Null);
            convert(value).map_err(|cause| BindError::ConversionFailure {
                column: column.clone(),
                target: type_name,
                cause,
                statement: statement.to_string(),
            })
        })
        .collect()
}

/// Pick the constructor that consumes the most columns
fn select_constructor<'s, T>(
    shape: &'s RecordShape<T>,
    rows: &RowSet,
) -> Option<(&'s Constructor<T>, Vec<(&'static str, usize)>)> {
    let mut best: Option<(&Constructor<T>, Vec<(&'static str, usize)>)> = None;
    for ctor in &shape.constructors {
        let indices: Option<Vec<_>> = ctor
            .params
            .iter()
            .map(|p| rows.column_index(p).map(|idx| (*p, idx)))
            .collect();
        let Some(indices) = indices else { continue };
        let better = best
            .as_ref()
            .map_or(true, |(current, _)| ctor.params.len() > current.params.len());
        if better {
            best = Some((ctor, indices));
        }
    }
    best
}

fn bind_records<T>(rows: RowSet, statement: &str, shape: &RecordShape<T>) -> BindResult<Vec<T>> {
    let conversion = |e: FieldError| BindError::ConversionFailure {
        column: e.column,
        target: e.target,
        cause: e.cause,
        statement: statement.to_string(),
    };

    if let Some((ctor, indices)) = select_constructor(shape, &rows) {
        return rows
            .rows
            .iter()
            .map(|row| {
                let fields = Fields {
                    row,
                    indices: &indices,
                };
                (ctor.build)(&fields).map_err(conversion)
            })
            .collect();
    }

    let Some(default) = shape.default else {
        return Err(BindError::NoMatchingConstructor {
            target: shape.type_name,
            columns: rows.column_names(),
            statement: statement.to_string(),
        });
    };

    // Column index -> setter, resolved once for the whole batch
    let assignments: Vec<(usize, &Setter<T>)> = rows
        .columns
        .iter()
        .enumerate()
        .filter_map(|(idx, col)| {
            shape
                .setters
                .iter()
                .find(|s| s.name.eq_ignore_ascii_case(&col.name))
                .map(|s| (idx, s))
        })
        .collect();

    rows.rows
        .into_iter()
        .map(|row| {
            let mut item = default();
            for (idx, setter) in &assignments {
                let Some(value) = row.get(*idx).cloned() else {
                    return Err(conversion(FieldError {
                        column: setter.name.to_string(),
                        target: shape.type_name,
                        cause: ConvertError::new(shape.type_name, "missing value"),
                    }));
                };
                (setter.set)(&mut item, value).map_err(conversion)?;
            }
            Ok(item)
        })
        .collect()
}

/// Convert `value` for a setter, labelling failures with the member name
pub fn convert_field<T: FromValue>(name: &str, value: Value) -> Result<T, FieldError> {
    T::from_value(value).map_err(|cause| FieldError {
        column: name.to_string(),
        target: T::TARGET,
        cause,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rowset(columns: &[(&str, Option<ValueType>)], rows: Vec<Vec<Value>>) -> RowSet {
        RowSet {
            columns: columns
                .iter()
                .map(|(n, t)| ColumnInfo::new(*n, *t))
                .collect(),
            rows,
        }
    }

    #[derive(Debug, PartialEq)]
    struct Abc {
        a: i64,
        b: Option<String>,
        c: Option<bool>,
        ctor: &'static str,
    }

    impl Bind for Abc {
        fn shape() -> Shape<Self> {
            Shape::Record(
                RecordShape::new("Abc")
                    .constructor(vec!["A"], |f| {
                        Ok(Abc { a: f.get("A")?, b: None, c: None, ctor: "A" })
                    })
                    .constructor(vec!["A", "B"], |f| {
                        Ok(Abc { a: f.get("A")?, b: f.get("B")?, c: None, ctor: "AB" })
                    })
                    .constructor(vec!["A", "B", "C"], |f| {
                        Ok(Abc {
                            a: f.get("A")?,
                            b: f.get("B")?,
                            c: f.get("C")?,
                            ctor: "ABC",
                        })
                    }),
            )
        }
    }

    #[derive(Debug, Default, PartialEq)]
    struct Settable {
        id: i64,
        label: String,
    }

    impl Bind for Settable {
        fn shape() -> Shape<Self> {
            Shape::Record(
                RecordShape::new("Settable")
                    .default_with(Settable::default)
                    .setter("Id", |s, v| {
                        s.id = convert_field("Id", v)?;
                        Ok(())
                    })
                    .setter("Label", |s, v| {
                        s.label = convert_field("Label", v)?;
                        Ok(())
                    }),
            )
        }
    }

    #[test]
    fn test_widest_constructor_wins() {
        let rows = rowset(
            &[("a", None), ("B", None), ("c", None)],
            vec![vec![Value::Integer(1), "x".into(), Value::Boolean(true)]],
        );

        let bound: Vec<Abc> = bind_rows(rows, "SELECT ...").unwrap();
        assert_eq!(bound[0].ctor, "ABC");
        assert_eq!(bound[0].b.as_deref(), Some("x"));
        assert_eq!(bound[0].c, Some(true));
    }

    #[test]
    fn test_subset_constructor_when_columns_missing() {
        let rows = rowset(
            &[("A", None), ("B", None), ("Other", None)],
            vec![vec![Value::Integer(1), Value::Null, Value::Integer(0)]],
        );

        let bound: Vec<Abc> = bind_rows(rows, "q").unwrap();
        assert_eq!(bound[0].ctor, "AB");
        assert_eq!(bound[0].b, None);
    }

    #[test]
    fn test_no_matching_constructor_names_columns_and_statement() {
        let rows = rowset(&[("X", None)], vec![]);

        let err = bind_rows::<Abc>(rows, "SELECT X FROM T").unwrap_err();
        match err {
            BindError::NoMatchingConstructor {
                target,
                columns,
                statement,
            } => {
                assert_eq!(target, "Abc");
                assert_eq!(columns, vec!["X".to_string()]);
                assert_eq!(statement, "SELECT X FROM T");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_conversion_failure_is_not_defaulted() {
        let rows = rowset(&[("A", None)], vec![vec!["nope".into()]]);

        let err = bind_rows::<Abc>(rows, "q").unwrap_err();
        assert!(matches!(
            err,
            BindError::ConversionFailure { ref column, target: "i64", .. } if column == "A"
        ));
    }

    #[test]
    fn test_short_row_is_a_conversion_failure() {
        let rows = rowset(
            &[("A", None), ("B", None)],
            vec![vec![Value::Integer(1)]],
        );

        let err = bind_rows::<Abc>(rows, "q").unwrap_err();
        assert!(matches!(
            err,
            BindError::ConversionFailure { ref column, ref cause, .. }
                if column == "B" && cause.found == "missing value"
        ));
    }

    #[test]
    fn test_short_row_fails_setter_fallback() {
        let rows = rowset(&[("Id", None), ("Label", None)], vec![vec![Value::Integer(7)]]);

        let err = bind_rows::<Settable>(rows, "q").unwrap_err();
        assert!(matches!(
            err,
            BindError::ConversionFailure { ref column, .. } if column == "Label"
        ));
    }

    #[test]
    fn test_fallback_setters() {
        let rows = rowset(
            &[("ID", None), ("label", None), ("ignored", None)],
            vec![
                vec![Value::Integer(7), "seven".into(), Value::Null],
                vec![Value::Integer(8), "eight".into(), Value::Null],
            ],
        );

        let bound: Vec<Settable> = bind_rows(rows, "q").unwrap();
        assert_eq!(
            bound,
            vec![
                Settable { id: 7, label: "seven".into() },
                Settable { id: 8, label: "eight".into() },
            ]
        );
    }

    #[test]
    fn test_scalar_path() {
        let rows = rowset(
            &[("Id", Some(ValueType::Integer))],
            vec![vec![Value::Integer(1)], vec![Value::Integer(2)]],
        );

        let ids: Vec<i64> = bind_rows(rows, "q").unwrap();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_scalar_from_untyped_expression_column() {
        let rows = rowset(&[("COUNT(*)", None)], vec![vec![Value::Integer(3)]]);

        let counts: Vec<i64> = bind_rows(rows, "q").unwrap();
        assert_eq!(counts, vec![3]);
    }

    #[test]
    fn test_scalar_type_mismatch_has_no_constructor() {
        let rows = rowset(&[("Name", Some(ValueType::Text))], vec![vec!["a".into()]]);

        assert!(matches!(
            bind_rows::<i64>(rows, "q"),
            Err(BindError::NoMatchingConstructor { target: "i64", .. })
        ));
    }

    #[test]
    fn test_optional_scalar_accepts_null() {
        let rows = rowset(
            &[("Email", Some(ValueType::Text))],
            vec![vec![Value::Null], vec!["a@b".into()]],
        );

        let emails: Vec<Option<String>> = bind_rows(rows, "q").unwrap();
        assert_eq!(emails, vec![None, Some("a@b".to_string())]);
    }
}
