//! Runtime values exchanged with the executor.
//!
//! [`Value`] is what bound parameters carry into a command and what result
//! rows carry back out. [`FromValue`] implements the per-value conversions the
//! row binder needs: null to `None`, text to UUID, text to UTC timestamps, and
//! the usual numeric/textual coercions.

use crate::error::ConvertError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Declared type of a column, parameter or expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Integer,
    Real,
    Text,
    Boolean,
    Blob,
    Uuid,
    Timestamp,
}

impl ValueType {
    /// Map a store type name (`INTEGER`, `varchar(40)`, `timestamptz`, ...) to a value type
    pub fn from_declared(declared: &str) -> Option<Self> {
        let upper = declared.trim().to_ascii_uppercase();
        if upper.is_empty() {
            return None;
        }
        // Order matters: "TIMESTAMP" and "UNIQUEIDENTIFIER" must win over the INT/TEXT checks.
        if upper.contains("UUID") || upper.contains("UNIQUEIDENTIFIER") {
            Some(Self::Uuid)
        } else if upper.contains("TIMESTAMP") || upper.contains("DATETIME") || upper == "DATE" {
            Some(Self::Timestamp)
        } else if upper.starts_with("BOOL") || upper == "BIT" {
            Some(Self::Boolean)
        } else if upper.contains("INT") {
            Some(Self::Integer)
        } else if upper.contains("CHAR") || upper.contains("TEXT") || upper.contains("CLOB") {
            Some(Self::Text)
        } else if upper.contains("BLOB") || upper.contains("BYTEA") || upper.contains("BINARY") {
            Some(Self::Blob)
        } else if upper.contains("REAL")
            || upper.contains("FLOA")
            || upper.contains("DOUB")
            || upper.contains("NUMERIC")
            || upper.contains("DECIMAL")
        {
            Some(Self::Real)
        } else {
            None
        }
    }

    /// Canonical store type name, used for diagnostics
    pub fn store_name(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Boolean => "BOOLEAN",
            Self::Blob => "BLOB",
            Self::Uuid => "UUID",
            Self::Timestamp => "TIMESTAMP",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Real)
    }

    /// Whether a column declared as `self` can feed a scalar of type `target` directly.
    ///
    /// UUIDs and timestamps are commonly stored as text, so text columns are
    /// accepted for them.
    pub fn feeds(&self, target: ValueType) -> bool {
        *self == target
            || (self.is_numeric() && target.is_numeric())
            || (*self == Self::Text && matches!(target, Self::Uuid | Self::Timestamp))
            || (*self == Self::Integer && target == Self::Boolean)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.store_name())
    }
}

/// A single runtime value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Blob(Vec<u8>),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Value type, `None` for `Null`
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Self::Null => None,
            Self::Integer(_) => Some(ValueType::Integer),
            Self::Real(_) => Some(ValueType::Real),
            Self::Text(_) => Some(ValueType::Text),
            Self::Boolean(_) => Some(ValueType::Boolean),
            Self::Blob(_) => Some(ValueType::Blob),
            Self::Uuid(_) => Some(ValueType::Uuid),
            Self::Timestamp(_) => Some(ValueType::Timestamp),
        }
    }

    /// Short kind name used in conversion errors
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Boolean(_) => "boolean",
            Self::Blob(_) => "blob",
            Self::Uuid(_) => "uuid",
            Self::Timestamp(_) => "timestamp",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Real(a), Self::Real(b)) => a.to_bits() == b.to_bits(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Blob(a), Self::Blob(b)) => a == b,
            (Self::Uuid(a), Self::Uuid(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Integer(n) => n.hash(state),
            Self::Real(f) => f.to_bits().hash(state),
            Self::Text(s) => s.hash(state),
            Self::Boolean(b) => b.hash(state),
            Self::Blob(b) => b.hash(state),
            Self::Uuid(u) => u.hash(state),
            Self::Timestamp(t) => t.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Integer(n) => write!(f, "{}", n),
            Self::Real(x) => write!(f, "{}", x),
            Self::Text(s) => write!(f, "{:?}", s),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Blob(b) => write!(f, "<{} bytes>", b.len()),
            Self::Uuid(u) => write!(f, "{}", u),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    i64 => Integer,
    i32 => Integer,
    u32 => Integer,
    f64 => Real,
    f32 => Real,
    bool => Boolean,
    String => Text,
    Vec<u8> => Blob,
    Uuid => Uuid,
    DateTime<Utc> => Timestamp,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Conversion from a runtime value into a Rust type
pub trait FromValue: Sized {
    /// Type name used in conversion errors
    const TARGET: &'static str;

    fn from_value(value: Value) -> Result<Self, ConvertError>;
}

fn mismatch(target: &'static str, value: &Value) -> ConvertError {
    ConvertError::new(target, value.kind())
}

impl FromValue for Value {
    const TARGET: &'static str = "value";

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        Ok(value)
    }
}

impl FromValue for i64 {
    const TARGET: &'static str = "i64";

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        match value {
            Value::Integer(n) => Ok(n),
            Value::Boolean(b) => Ok(b as i64),
            Value::Real(x) if x.fract() == 0.0 && x.abs() < i64::MAX as f64 => Ok(x as i64),
            Value::Text(ref s) => s
                .trim()
                .parse()
                .map_err(|e| mismatch(Self::TARGET, &value).with_detail(e)),
            other => Err(mismatch(Self::TARGET, &other)),
        }
    }
}

impl FromValue for i32 {
    const TARGET: &'static str = "i32";

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        let found = value.kind();
        let wide = i64::from_value(value)
            .map_err(|e| ConvertError { target: Self::TARGET, ..e })?;
        i32::try_from(wide).map_err(|e| ConvertError::new(Self::TARGET, found).with_detail(e))
    }
}

impl FromValue for f64 {
    const TARGET: &'static str = "f64";

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        match value {
            Value::Real(x) => Ok(x),
            Value::Integer(n) => Ok(n as f64),
            Value::Text(ref s) => s
                .trim()
                .parse()
                .map_err(|e| mismatch(Self::TARGET, &value).with_detail(e)),
            other => Err(mismatch(Self::TARGET, &other)),
        }
    }
}

impl FromValue for bool {
    const TARGET: &'static str = "bool";

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        match value {
            Value::Boolean(b) => Ok(b),
            Value::Integer(n) => Ok(n != 0),
            Value::Text(ref s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(mismatch(Self::TARGET, &value).with_detail(format!("{:?}", s))),
            },
            other => Err(mismatch(Self::TARGET, &other)),
        }
    }
}

impl FromValue for String {
    const TARGET: &'static str = "String";

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        match value {
            Value::Text(s) => Ok(s),
            Value::Integer(n) => Ok(n.to_string()),
            Value::Real(x) => Ok(x.to_string()),
            Value::Boolean(b) => Ok(b.to_string()),
            Value::Uuid(u) => Ok(u.to_string()),
            Value::Timestamp(t) => Ok(t.to_rfc3339()),
            other => Err(mismatch(Self::TARGET, &other)),
        }
    }
}

impl FromValue for Vec<u8> {
    const TARGET: &'static str = "Vec<u8>";

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        match value {
            Value::Blob(b) => Ok(b),
            Value::Text(s) => Ok(s.into_bytes()),
            other => Err(mismatch(Self::TARGET, &other)),
        }
    }
}

impl FromValue for Uuid {
    const TARGET: &'static str = "Uuid";

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        match value {
            Value::Uuid(u) => Ok(u),
            Value::Text(ref s) => {
                Uuid::parse_str(s.trim()).map_err(|e| mismatch(Self::TARGET, &value).with_detail(e))
            }
            Value::Blob(ref b) => {
                Uuid::from_slice(b).map_err(|e| mismatch(Self::TARGET, &value).with_detail(e))
            }
            other => Err(mismatch(Self::TARGET, &other)),
        }
    }
}

/// Text layouts accepted for timestamps without an offset; all are read as UTC.
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

impl FromValue for DateTime<Utc> {
    const TARGET: &'static str = "DateTime<Utc>";

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        match value {
            Value::Timestamp(t) => Ok(t),
            Value::Text(ref s) => parse_timestamp(s.trim())
                .ok_or_else(|| mismatch(Self::TARGET, &value).with_detail(format!("{:?}", s))),
            Value::Integer(secs) => DateTime::<Utc>::from_timestamp(secs, 0)
                .ok_or_else(|| mismatch(Self::TARGET, &value).with_detail("out of range")),
            other => Err(mismatch(Self::TARGET, &other)),
        }
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

impl<T: FromValue> FromValue for Option<T> {
    const TARGET: &'static str = T::TARGET;

    fn from_value(value: Value) -> Result<Self, ConvertError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use test_case::test_case;

    #[test_case("INTEGER", Some(ValueType::Integer))]
    #[test_case("bigint", Some(ValueType::Integer))]
    #[test_case("varchar(40)", Some(ValueType::Text))]
    #[test_case("TEXT", Some(ValueType::Text))]
    #[test_case("timestamptz", Some(ValueType::Timestamp))]
    #[test_case("DATETIME", Some(ValueType::Timestamp))]
    #[test_case("uuid", Some(ValueType::Uuid))]
    #[test_case("UNIQUEIDENTIFIER", Some(ValueType::Uuid))]
    #[test_case("BOOLEAN", Some(ValueType::Boolean))]
    #[test_case("double precision", Some(ValueType::Real))]
    #[test_case("BLOB", Some(ValueType::Blob))]
    #[test_case("", None)]
    #[test_case("geometry", None)]
    fn test_from_declared(declared: &str, expected: Option<ValueType>) {
        assert_eq!(ValueType::from_declared(declared), expected);
    }

    #[test]
    fn test_null_becomes_none() {
        assert_eq!(Option::<i64>::from_value(Value::Null), Ok(None));
        assert_eq!(Option::<i64>::from_value(Value::Integer(4)), Ok(Some(4)));
    }

    #[test]
    fn test_null_into_required_fails() {
        let err = i64::from_value(Value::Null).unwrap_err();
        assert_eq!(err.found, "null");
        assert_eq!(err.target, "i64");
    }

    #[test]
    fn test_text_to_uuid() {
        let id = Uuid::new_v4();
        let parsed = Uuid::from_value(Value::Text(id.to_string())).unwrap();
        assert_eq!(parsed, id);

        assert!(Uuid::from_value(Value::Text("not-a-uuid".into())).is_err());
    }

    #[test]
    fn test_text_without_offset_is_utc() {
        let t = DateTime::<Utc>::from_value(Value::Text("2024-03-01 12:30:45".into())).unwrap();
        assert_eq!((t.year(), t.month(), t.day()), (2024, 3, 1));
        assert_eq!((t.hour(), t.minute(), t.second()), (12, 30, 45));
    }

    #[test]
    fn test_rfc3339_offset_is_normalized_to_utc() {
        let t =
            DateTime::<Utc>::from_value(Value::Text("2024-03-01T12:00:00+02:00".into())).unwrap();
        assert_eq!(t.hour(), 10);
    }

    #[test]
    fn test_numeric_coercions() {
        assert_eq!(f64::from_value(Value::Integer(3)), Ok(3.0));
        assert_eq!(i64::from_value(Value::Real(7.0)), Ok(7));
        assert!(i64::from_value(Value::Real(7.5)).is_err());
        assert_eq!(i64::from_value(Value::Text(" 42 ".into())), Ok(42));
        assert_eq!(String::from_value(Value::Integer(9)), Ok("9".to_string()));
        assert_eq!(bool::from_value(Value::Integer(1)), Ok(true));
    }

    #[test]
    fn test_i32_overflow_is_reported() {
        let err = i32::from_value(Value::Integer(i64::MAX)).unwrap_err();
        assert_eq!(err.target, "i32");
        assert!(err.detail.is_some());
    }

    #[test]
    fn test_feeds() {
        assert!(ValueType::Integer.feeds(ValueType::Real));
        assert!(ValueType::Text.feeds(ValueType::Uuid));
        assert!(!ValueType::Text.feeds(ValueType::Integer));
        assert!(!ValueType::Blob.feeds(ValueType::Text));
    }
}
