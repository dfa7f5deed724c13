//! CQL data types and values.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

/// CQL column type, as declared by statement and result metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "of", rename_all = "lowercase")]
pub enum CqlType {
    Ascii,
    Bigint,
    Blob,
    Boolean,
    Counter,
    Double,
    Float,
    Int,
    Smallint,
    Tinyint,
    Text,
    Timestamp,
    Uuid,
    Timeuuid,
    Inet,
    List(Box<CqlType>),
    Set(Box<CqlType>),
    Map(Box<(CqlType, CqlType)>),
}

impl CqlType {
    /// Check whether a value may be bound to a placeholder of this type.
    ///
    /// NULL is accepted by every type. Integers widen into larger integer
    /// columns, floats widen into doubles, and textual values are accepted by
    /// both `text` and `ascii` (the latter only for ASCII content).
    pub fn accepts(&self, value: &CqlValue) -> bool {
        use CqlValue as V;

        match (self, value) {
            (_, V::Null) => true,
            (CqlType::Text, V::Text(_) | V::Ascii(_)) => true,
            (CqlType::Ascii, V::Ascii(_)) => true,
            (CqlType::Ascii, V::Text(s)) => s.is_ascii(),
            (CqlType::Bigint, V::BigInt(_) | V::Int(_) | V::SmallInt(_) | V::TinyInt(_)) => true,
            (CqlType::Counter, V::Counter(_) | V::BigInt(_) | V::Int(_)) => true,
            (CqlType::Int, V::Int(_) | V::SmallInt(_) | V::TinyInt(_)) => true,
            (CqlType::Smallint, V::SmallInt(_) | V::TinyInt(_)) => true,
            (CqlType::Tinyint, V::TinyInt(_)) => true,
            (CqlType::Double, V::Double(_) | V::Float(_)) => true,
            (CqlType::Float, V::Float(_)) => true,
            (CqlType::Boolean, V::Boolean(_)) => true,
            (CqlType::Blob, V::Blob(_)) => true,
            (CqlType::Timestamp, V::Timestamp(_) | V::BigInt(_)) => true,
            (CqlType::Uuid, V::Uuid(_) | V::TimeUuid(_)) => true,
            (CqlType::Timeuuid, V::TimeUuid(_)) => true,
            (CqlType::Timeuuid, V::Uuid(u)) => u.get_version_num() == 1,
            (CqlType::Inet, V::Inet(_)) => true,
            (CqlType::List(item), V::List(values)) | (CqlType::Set(item), V::Set(values)) => {
                values.iter().all(|v| item.accepts(v))
            }
            (CqlType::List(item), V::Set(values)) | (CqlType::Set(item), V::List(values)) => {
                values.iter().all(|v| item.accepts(v))
            }
            (CqlType::Map(kv), V::Map(entries)) => entries
                .iter()
                .all(|(k, v)| kv.0.accepts(k) && kv.1.accepts(v)),
            _ => false,
        }
    }
}

impl fmt::Display for CqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CqlType::Ascii => f.write_str("ascii"),
            CqlType::Bigint => f.write_str("bigint"),
            CqlType::Blob => f.write_str("blob"),
            CqlType::Boolean => f.write_str("boolean"),
            CqlType::Counter => f.write_str("counter"),
            CqlType::Double => f.write_str("double"),
            CqlType::Float => f.write_str("float"),
            CqlType::Int => f.write_str("int"),
            CqlType::Smallint => f.write_str("smallint"),
            CqlType::Tinyint => f.write_str("tinyint"),
            CqlType::Text => f.write_str("text"),
            CqlType::Timestamp => f.write_str("timestamp"),
            CqlType::Uuid => f.write_str("uuid"),
            CqlType::Timeuuid => f.write_str("timeuuid"),
            CqlType::Inet => f.write_str("inet"),
            CqlType::List(item) => write!(f, "list<{}>", item),
            CqlType::Set(item) => write!(f, "set<{}>", item),
            CqlType::Map(kv) => write!(f, "map<{}, {}>", kv.0, kv.1),
        }
    }
}

/// A single CQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    /// NULL (unset or tombstoned)
    Null,
    Ascii(String),
    Text(String),
    BigInt(i64),
    Counter(i64),
    Int(i32),
    SmallInt(i16),
    TinyInt(i8),
    Boolean(bool),
    Double(f64),
    Float(f32),
    Blob(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    TimeUuid(Uuid),
    Inet(IpAddr),
    List(Vec<CqlValue>),
    Set(Vec<CqlValue>),
    Map(Vec<(CqlValue, CqlValue)>),
}

impl CqlValue {
    /// Whether this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, CqlValue::Null)
    }

    /// Name of the CQL type this value carries.
    pub fn type_name(&self) -> &'static str {
        match self {
            CqlValue::Null => "null",
            CqlValue::Ascii(_) => "ascii",
            CqlValue::Text(_) => "text",
            CqlValue::BigInt(_) => "bigint",
            CqlValue::Counter(_) => "counter",
            CqlValue::Int(_) => "int",
            CqlValue::SmallInt(_) => "smallint",
            CqlValue::TinyInt(_) => "tinyint",
            CqlValue::Boolean(_) => "boolean",
            CqlValue::Double(_) => "double",
            CqlValue::Float(_) => "float",
            CqlValue::Blob(_) => "blob",
            CqlValue::Timestamp(_) => "timestamp",
            CqlValue::Uuid(_) => "uuid",
            CqlValue::TimeUuid(_) => "timeuuid",
            CqlValue::Inet(_) => "inet",
            CqlValue::List(_) => "list",
            CqlValue::Set(_) => "set",
            CqlValue::Map(_) => "map",
        }
    }

    /// Integral view of any integer-typed value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CqlValue::BigInt(i) | CqlValue::Counter(i) => Some(*i),
            CqlValue::Int(i) => Some(i64::from(*i)),
            CqlValue::SmallInt(i) => Some(i64::from(*i)),
            CqlValue::TinyInt(i) => Some(i64::from(*i)),
            _ => None,
        }
    }

    /// Textual view of `text`/`ascii` values.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CqlValue::Text(s) | CqlValue::Ascii(s) => Some(s),
            _ => None,
        }
    }

    /// Build a list value.
    pub fn list<T: Into<CqlValue>>(items: impl IntoIterator<Item = T>) -> Self {
        CqlValue::List(items.into_iter().map(Into::into).collect())
    }

    /// Build a set value.
    pub fn set<T: Into<CqlValue>>(items: impl IntoIterator<Item = T>) -> Self {
        CqlValue::Set(items.into_iter().map(Into::into).collect())
    }

    /// Compare two values the way a CQL equality predicate does: integers of
    /// different widths and text/ascii compare by content.
    pub fn cql_eq(&self, other: &CqlValue) -> bool {
        if let (Some(a), Some(b)) = (self.as_i64(), other.as_i64()) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (self.as_text(), other.as_text()) {
            return a == b;
        }
        match (self, other) {
            (CqlValue::Double(a), CqlValue::Float(b)) => *a == f64::from(*b),
            (CqlValue::Float(a), CqlValue::Double(b)) => f64::from(*a) == *b,
            (CqlValue::Uuid(a) | CqlValue::TimeUuid(a), CqlValue::Uuid(b) | CqlValue::TimeUuid(b)) => {
                a == b
            }
            _ => self == other,
        }
    }
}

/// Formats values as CQL literals.
impl fmt::Display for CqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CqlValue::Null => f.write_str("null"),
            CqlValue::Ascii(s) | CqlValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            CqlValue::BigInt(i) | CqlValue::Counter(i) => write!(f, "{}", i),
            CqlValue::Int(i) => write!(f, "{}", i),
            CqlValue::SmallInt(i) => write!(f, "{}", i),
            CqlValue::TinyInt(i) => write!(f, "{}", i),
            CqlValue::Boolean(b) => write!(f, "{}", b),
            CqlValue::Double(d) => write!(f, "{}", d),
            CqlValue::Float(d) => write!(f, "{}", d),
            CqlValue::Blob(b) => write!(f, "0x{}", hex::encode(b)),
            CqlValue::Timestamp(ts) => {
                write!(f, "'{}'", ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            CqlValue::Uuid(u) | CqlValue::TimeUuid(u) => write!(f, "{}", u),
            CqlValue::Inet(ip) => write!(f, "'{}'", ip),
            CqlValue::List(items) => write_items(f, "[", items, "]"),
            CqlValue::Set(items) => write_items(f, "{", items, "}"),
            CqlValue::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
        }
    }
}

fn write_items(f: &mut fmt::Formatter<'_>, open: &str, items: &[CqlValue], close: &str) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str(close)
}

impl From<bool> for CqlValue {
    fn from(value: bool) -> Self {
        CqlValue::Boolean(value)
    }
}

impl From<i8> for CqlValue {
    fn from(value: i8) -> Self {
        CqlValue::TinyInt(value)
    }
}

impl From<i16> for CqlValue {
    fn from(value: i16) -> Self {
        CqlValue::SmallInt(value)
    }
}

impl From<i32> for CqlValue {
    fn from(value: i32) -> Self {
        CqlValue::Int(value)
    }
}

impl From<i64> for CqlValue {
    fn from(value: i64) -> Self {
        CqlValue::BigInt(value)
    }
}

impl From<f32> for CqlValue {
    fn from(value: f32) -> Self {
        CqlValue::Float(value)
    }
}

impl From<f64> for CqlValue {
    fn from(value: f64) -> Self {
        CqlValue::Double(value)
    }
}

impl From<String> for CqlValue {
    fn from(value: String) -> Self {
        CqlValue::Text(value)
    }
}

impl From<&str> for CqlValue {
    fn from(value: &str) -> Self {
        CqlValue::Text(value.to_string())
    }
}

impl From<Vec<u8>> for CqlValue {
    fn from(value: Vec<u8>) -> Self {
        CqlValue::Blob(value)
    }
}

impl From<Uuid> for CqlValue {
    fn from(value: Uuid) -> Self {
        CqlValue::Uuid(value)
    }
}

impl From<DateTime<Utc>> for CqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        CqlValue::Timestamp(value)
    }
}

impl From<IpAddr> for CqlValue {
    fn from(value: IpAddr) -> Self {
        CqlValue::Inet(value)
    }
}

impl<T: Into<CqlValue>> From<Option<T>> for CqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(CqlValue::Null, Into::into)
    }
}
