//! Conversions between pipeline values and SQLite storage classes.
//!
//! SQLite has no native boolean, UUID or timestamp types. Booleans are stored
//! as 0/1, UUIDs as hyphenated text and timestamps as RFC 3339 text; the
//! binder converts them back from the declared column type.

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use strata_query::Value;

/// Borrowed [`Value`] as a statement parameter
pub struct SqlValue<'a>(pub &'a Value);

impl ToSql for SqlValue<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(n) => ToSqlOutput::Borrowed(ValueRef::Integer(*n)),
            Value::Real(x) => ToSqlOutput::Borrowed(ValueRef::Real(*x)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Boolean(b) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*b))),
            Value::Uuid(u) => ToSqlOutput::Owned(u.hyphenated().to_string().into()),
            Value::Timestamp(t) => ToSqlOutput::Owned(t.to_rfc3339().into()),
        })
    }
}

/// Read a column value; invalid UTF-8 text is replaced lossily
pub fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Integer(n),
        ValueRef::Real(x) => Value::Real(x),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}
