//! Conversion table from CQL values to Rust types.
//!
//! | Target            | Accepted CQL values                                         |
//! |-------------------|-------------------------------------------------------------|
//! | `bool`            | boolean                                                     |
//! | `i8`..`i64`       | tinyint, smallint, int, bigint, counter (range-checked)     |
//! | `f32`             | float                                                       |
//! | `f64`             | double, float, any integer                                  |
//! | `String`          | text, ascii, numbers, boolean, uuid, timeuuid, inet, timestamp (RFC 3339) |
//! | `Vec<u8>`         | blob                                                        |
//! | `Uuid`            | uuid, timeuuid                                              |
//! | `DateTime<Utc>`   | timestamp                                                   |
//! | `IpAddr`          | inet                                                        |
//! | `Option<T>`       | NULL as `None`, otherwise as `T`                            |
//! | `CqlValue`        | anything                                                    |
//!
//! Blobs and collections have no text representation; converting them to
//! `String` fails with [`ConversionError::Incompatible`].

use crate::error::ConversionError;
use crate::types::CqlValue;
use chrono::{DateTime, SecondsFormat, Utc};
use std::net::IpAddr;
use uuid::Uuid;

/// Types that can be read out of a CQL value.
pub trait FromCqlValue: Sized {
    /// Human-readable name of the target type, used in error messages.
    const TARGET: &'static str;

    /// Convert `value`, read from `column`, into `Self`.
    fn from_cql(value: &CqlValue, column: &str) -> Result<Self, ConversionError>;
}

fn incompatible<T: FromCqlValue>(value: &CqlValue, column: &str) -> ConversionError {
    if value.is_null() {
        ConversionError::UnexpectedNull {
            column: column.to_string(),
        }
    } else {
        ConversionError::Incompatible {
            column: column.to_string(),
            cql_type: value.type_name().to_string(),
            target: T::TARGET,
        }
    }
}

macro_rules! integral_from_cql {
    ($($ty:ty),*) => {
        $(
            impl FromCqlValue for $ty {
                const TARGET: &'static str = stringify!($ty);

                fn from_cql(value: &CqlValue, column: &str) -> Result<Self, ConversionError> {
                    let wide = value
                        .as_i64()
                        .ok_or_else(|| incompatible::<Self>(value, column))?;
                    <$ty>::try_from(wide).map_err(|_| ConversionError::NumericOverflow {
                        column: column.to_string(),
                        value: wide.to_string(),
                        target: Self::TARGET,
                    })
                }
            }
        )*
    };
}

integral_from_cql!(i8, i16, i32, i64);

impl FromCqlValue for bool {
    const TARGET: &'static str = "bool";

    fn from_cql(value: &CqlValue, column: &str) -> Result<Self, ConversionError> {
        match value {
            CqlValue::Boolean(b) => Ok(*b),
            other => Err(incompatible::<Self>(other, column)),
        }
    }
}

impl FromCqlValue for f32 {
    const TARGET: &'static str = "f32";

    fn from_cql(value: &CqlValue, column: &str) -> Result<Self, ConversionError> {
        match value {
            CqlValue::Float(f) => Ok(*f),
            other => Err(incompatible::<Self>(other, column)),
        }
    }
}

impl FromCqlValue for f64 {
    const TARGET: &'static str = "f64";

    fn from_cql(value: &CqlValue, column: &str) -> Result<Self, ConversionError> {
        match value {
            CqlValue::Double(d) => Ok(*d),
            CqlValue::Float(f) => Ok(f64::from(*f)),
            other => other
                .as_i64()
                .map(|i| i as f64)
                .ok_or_else(|| incompatible::<Self>(other, column)),
        }
    }
}

impl FromCqlValue for String {
    const TARGET: &'static str = "String";

    fn from_cql(value: &CqlValue, column: &str) -> Result<Self, ConversionError> {
        match value {
            CqlValue::Text(s) | CqlValue::Ascii(s) => Ok(s.clone()),
            CqlValue::BigInt(i) | CqlValue::Counter(i) => Ok(i.to_string()),
            CqlValue::Int(i) => Ok(i.to_string()),
            CqlValue::SmallInt(i) => Ok(i.to_string()),
            CqlValue::TinyInt(i) => Ok(i.to_string()),
            CqlValue::Double(d) => Ok(d.to_string()),
            CqlValue::Float(f) => Ok(f.to_string()),
            CqlValue::Boolean(b) => Ok(b.to_string()),
            CqlValue::Uuid(u) | CqlValue::TimeUuid(u) => Ok(u.to_string()),
            CqlValue::Inet(ip) => Ok(ip.to_string()),
            CqlValue::Timestamp(ts) => Ok(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            CqlValue::Null
            | CqlValue::Blob(_)
            | CqlValue::List(_)
            | CqlValue::Set(_)
            | CqlValue::Map(_) => Err(incompatible::<Self>(value, column)),
        }
    }
}

impl FromCqlValue for Vec<u8> {
    const TARGET: &'static str = "Vec<u8>";

    fn from_cql(value: &CqlValue, column: &str) -> Result<Self, ConversionError> {
        match value {
            CqlValue::Blob(b) => Ok(b.clone()),
            other => Err(incompatible::<Self>(other, column)),
        }
    }
}

impl FromCqlValue for Uuid {
    const TARGET: &'static str = "Uuid";

    fn from_cql(value: &CqlValue, column: &str) -> Result<Self, ConversionError> {
        match value {
            CqlValue::Uuid(u) | CqlValue::TimeUuid(u) => Ok(*u),
            other => Err(incompatible::<Self>(other, column)),
        }
    }
}

impl FromCqlValue for DateTime<Utc> {
    const TARGET: &'static str = "DateTime<Utc>";

    fn from_cql(value: &CqlValue, column: &str) -> Result<Self, ConversionError> {
        match value {
            CqlValue::Timestamp(ts) => Ok(*ts),
            other => Err(incompatible::<Self>(other, column)),
        }
    }
}

impl FromCqlValue for IpAddr {
    const TARGET: &'static str = "IpAddr";

    fn from_cql(value: &CqlValue, column: &str) -> Result<Self, ConversionError> {
        match value {
            CqlValue::Inet(ip) => Ok(*ip),
            other => Err(incompatible::<Self>(other, column)),
        }
    }
}

impl FromCqlValue for CqlValue {
    const TARGET: &'static str = "CqlValue";

    fn from_cql(value: &CqlValue, _column: &str) -> Result<Self, ConversionError> {
        Ok(value.clone())
    }
}

impl<T: FromCqlValue> FromCqlValue for Option<T> {
    const TARGET: &'static str = T::TARGET;

    fn from_cql(value: &CqlValue, column: &str) -> Result<Self, ConversionError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_cql(value, column).map(Some)
        }
    }
}
