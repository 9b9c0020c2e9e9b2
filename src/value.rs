//! Runtime values carried through queries and results
//!
//! This module contains the dialect-neutral [`Value`] type used for query
//! parameters, received rows, and hydrated fields.

use chrono::NaiveDateTime;
use std::borrow::Cow;
use std::fmt;

//------------------------------------------------------------------------------
// Value Definition
//------------------------------------------------------------------------------

/// A database value in its widest runtime representation.
///
/// Signed integers widen to `Int`, unsigned to `UInt`. Byte slices offered to
/// query nodes normalise to `Text`; `Bytes` is reserved for blob columns read
/// back from the driver (see [`Value::bytes`]).
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// NULL value
    #[default]
    Null,
    /// Blob value
    Bytes(Vec<u8>),
    /// Text value
    Text(String),
    /// Signed integer value, widened to i64
    Int(i64),
    /// Unsigned integer value, widened to u64
    UInt(u64),
    /// 32-bit floating point value
    Float(f32),
    /// 64-bit floating point value
    Double(f64),
    /// Boolean value
    Bool(bool),
    /// Date and time without timezone
    DateTime(NaiveDateTime),
    /// Ordered list of values, used by IN expressions
    List(Vec<Value>),
}

impl Value {
    /// Wraps raw bytes as a blob value.
    ///
    /// This is deliberately not a `From` impl: byte slices passed to query
    /// expressions become `Text`, matching how string-typed columns compare.
    #[inline]
    pub fn bytes(value: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(value.into())
    }

    /// Builds a list value out of anything convertible to values.
    pub fn list<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Value::List(values.into_iter().map(Into::into).collect())
    }

    /// Returns true if this value is NULL.
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the signed integer form of this value, parsing text if needed.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            Value::UInt(value) => i64::try_from(*value).ok(),
            Value::Bool(value) => Some(i64::from(*value)),
            Value::Text(value) => value.trim().parse().ok(),
            Value::Bytes(value) => std::str::from_utf8(value).ok()?.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the unsigned integer form of this value, parsing text if needed.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(value) => Some(*value),
            Value::Int(value) => u64::try_from(*value).ok(),
            Value::Bool(value) => Some(u64::from(*value)),
            Value::Text(value) => value.trim().parse().ok(),
            Value::Bytes(value) => std::str::from_utf8(value).ok()?.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the 64-bit float form of this value, parsing text if needed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(value) => Some(*value),
            Value::Float(value) => Some(f64::from(*value)),
            Value::Int(value) => Some(*value as f64),
            Value::UInt(value) => Some(*value as f64),
            Value::Text(value) => value.trim().parse().ok(),
            Value::Bytes(value) => std::str::from_utf8(value).ok()?.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the 32-bit float form of this value.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float(value) => Some(*value),
            _ => self.as_f64().map(|value| value as f32),
        }
    }

    /// Returns the boolean form of this value. Integers are true when
    /// non-zero; text is true for "true", "on", and "1".
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            Value::Int(value) => Some(*value != 0),
            Value::UInt(value) => Some(*value != 0),
            Value::Text(value) => match value.trim() {
                "true" | "on" | "1" => Some(true),
                "false" | "off" | "0" | "" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Returns the text value if this is TEXT.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Returns the raw bytes of a blob or text value.
    #[inline]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(value) => Some(value.as_slice()),
            Value::Text(value) => Some(value.as_bytes()),
            _ => None,
        }
    }

    /// Returns the datetime form of this value, parsing text if needed.
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(value) => Some(*value),
            Value::Text(value) => parse_datetime(value),
            _ => None,
        }
    }

    /// Returns the contained values if this is a list.
    #[inline]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(values) => Some(values.as_slice()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bytes(value) => write!(f, "{}", String::from_utf8_lossy(value)),
            Value::Text(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::UInt(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Double(value) => write!(f, "{value}"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::DateTime(value) => write!(f, "{}", value.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::List(values) => {
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{value}")?;
                }
                Ok(())
            }
        }
    }
}

/// Parses the datetime formats MySQL hands back for DATETIME, TIMESTAMP,
/// and DATE columns.
pub(crate) fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .map(|date| date.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
}

//------------------------------------------------------------------------------
// Conversions
//------------------------------------------------------------------------------

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            #[inline]
            fn from(value: $t) -> Self {
                Value::Int(value as i64)
            }
        })*
    };
}

macro_rules! impl_from_uint {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            #[inline]
            fn from(value: $t) -> Self {
                Value::UInt(value as u64)
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, isize);
impl_from_uint!(u8, u16, u32, u64, usize);

impl From<f32> for Value {
    #[inline]
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<f64> for Value {
    #[inline]
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<bool> for Value {
    #[inline]
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    #[inline]
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    #[inline]
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Cow<'_, str>> for Value {
    #[inline]
    fn from(value: Cow<'_, str>) -> Self {
        Value::Text(value.into_owned())
    }
}

impl From<&[u8]> for Value {
    #[inline]
    fn from(value: &[u8]) -> Self {
        Value::Text(String::from_utf8_lossy(value).into_owned())
    }
}

impl From<NaiveDateTime> for Value {
    #[inline]
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => Value::Null,
        }
    }
}

impl From<Vec<Value>> for Value {
    #[inline]
    fn from(values: Vec<Value>) -> Self {
        Value::List(values)
    }
}
