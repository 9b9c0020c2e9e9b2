//! Row receiver
//!
//! Drivers deliver untyped wire values; the schema says what each result
//! column should be. This module coerces one into the other, row by row,
//! producing maps keyed by result-column alias. Unsigned and signed
//! integers narrow by wrapping, matching what the 32-bit column types can
//! actually store. MySQL reports an unset timestamp default as the literal
//! text `CURRENT_TIMESTAMP`, which comes through as NULL.

use crate::driver::DriverValue;
use crate::error::{Error, Result};
use crate::schema::ColumnType;
use crate::value::{self, Value};
use compact_str::CompactString;
use indexmap::IndexMap;

/// Coerces raw rows into alias-keyed value maps, one per row. Columns are
/// matched positionally against the statement's SELECT list.
pub(crate) fn rows(
    raw: Vec<Vec<DriverValue>>,
    columns: &IndexMap<CompactString, ColumnType>,
) -> Result<Vec<IndexMap<CompactString, Value>>> {
    let mut out = Vec::with_capacity(raw.len());
    for row in raw {
        let mut map = IndexMap::with_capacity(columns.len());
        for ((name, column_type), cell) in columns.iter().zip(row) {
            map.insert(name.clone(), receive(*column_type, cell, name)?);
        }
        out.push(map);
    }
    Ok(out)
}

/// Coerces one wire value to one column type.
pub fn receive(column_type: ColumnType, raw: DriverValue, column: &str) -> Result<Value> {
    use DriverValue as D;

    if matches!(raw, D::Null) {
        return Ok(Value::Null);
    }
    let unsupported = || Error::UnsupportedColumnType {
        column: column.to_string(),
        column_type: column_type.to_string(),
    };

    let value = match column_type {
        ColumnType::Unknown => match raw {
            D::Null => Value::Null,
            D::Int(v) => Value::Int(v),
            D::UInt(v) => Value::UInt(v),
            D::Float(v) => Value::Float(v),
            D::Double(v) => Value::Double(v),
            D::Text(v) => Value::Text(v),
            D::Bytes(v) => Value::Bytes(v),
        },

        ColumnType::Bytes => match raw {
            D::Bytes(v) => Value::Bytes(v),
            D::Text(v) => Value::Bytes(v.into_bytes()),
            _ => return Err(unsupported()),
        },

        ColumnType::String => match raw {
            D::Null => Value::Null,
            D::Text(v) => Value::Text(v),
            D::Bytes(v) => Value::Text(String::from_utf8_lossy(&v).into_owned()),
            D::Int(v) => Value::Text(v.to_string()),
            D::UInt(v) => Value::Text(v.to_string()),
            D::Float(v) => Value::Text(v.to_string()),
            D::Double(v) => Value::Text(v.to_string()),
        },

        ColumnType::Integer => match raw {
            D::Int(v) => Value::Int(v as i32 as i64),
            D::UInt(v) => Value::Int(v as i32 as i64),
            D::Text(v) => Value::Int(parse_i64(&v).ok_or_else(unsupported)? as i32 as i64),
            D::Bytes(v) => Value::Int(parse_bytes_i64(&v).ok_or_else(unsupported)? as i32 as i64),
            _ => return Err(unsupported()),
        },

        ColumnType::UnsignedInteger => match raw {
            D::UInt(v) => Value::UInt(v as u32 as u64),
            D::Int(v) => Value::UInt(v as u32 as u64),
            D::Text(v) => Value::UInt(parse_u64(&v).ok_or_else(unsupported)? as u32 as u64),
            D::Bytes(v) => Value::UInt(parse_bytes_u64(&v).ok_or_else(unsupported)? as u32 as u64),
            _ => return Err(unsupported()),
        },

        ColumnType::Integer64 => match raw {
            D::Int(v) => Value::Int(v),
            D::UInt(v) => Value::Int(v as i64),
            D::Text(v) => Value::Int(parse_i64(&v).ok_or_else(unsupported)?),
            D::Bytes(v) => Value::Int(parse_bytes_i64(&v).ok_or_else(unsupported)?),
            _ => return Err(unsupported()),
        },

        ColumnType::UnsignedInteger64 => match raw {
            D::UInt(v) => Value::UInt(v),
            D::Int(v) => Value::UInt(v as u64),
            D::Text(v) => Value::UInt(parse_u64(&v).ok_or_else(unsupported)?),
            D::Bytes(v) => Value::UInt(parse_bytes_u64(&v).ok_or_else(unsupported)?),
            _ => return Err(unsupported()),
        },

        ColumnType::Float => match raw {
            D::Null => Value::Null,
            D::Float(v) => Value::Float(v),
            D::Double(v) => Value::Float(v as f32),
            D::Int(v) => Value::Float(v as f32),
            D::UInt(v) => Value::Float(v as f32),
            D::Text(v) => Value::Float(v.trim().parse().map_err(|_| unsupported())?),
            D::Bytes(v) => {
                let text = String::from_utf8_lossy(&v);
                Value::Float(text.trim().parse().map_err(|_| unsupported())?)
            }
        },

        ColumnType::Double => match raw {
            D::Null => Value::Null,
            D::Float(v) => Value::Double(f64::from(v)),
            D::Double(v) => Value::Double(v),
            D::Int(v) => Value::Double(v as f64),
            D::UInt(v) => Value::Double(v as f64),
            D::Text(v) => Value::Double(v.trim().parse().map_err(|_| unsupported())?),
            D::Bytes(v) => {
                let text = String::from_utf8_lossy(&v);
                Value::Double(text.trim().parse().map_err(|_| unsupported())?)
            }
        },

        ColumnType::Bool => match raw {
            D::Int(v) => Value::Bool(v != 0),
            D::UInt(v) => Value::Bool(v != 0),
            D::Text(v) => Value::Bool(Value::Text(v).as_bool().ok_or_else(unsupported)?),
            D::Bytes(v) => {
                let text = String::from_utf8_lossy(&v).into_owned();
                Value::Bool(Value::Text(text).as_bool().ok_or_else(unsupported)?)
            }
            _ => return Err(unsupported()),
        },

        ColumnType::DateTime => match raw {
            D::Text(v) => receive_datetime(&v).ok_or_else(unsupported)?,
            D::Bytes(v) => {
                receive_datetime(&String::from_utf8_lossy(&v)).ok_or_else(unsupported)?
            }
            _ => return Err(unsupported()),
        },
    };
    Ok(value)
}

fn receive_datetime(text: &str) -> Option<Value> {
    // An unset timestamp default comes back as its DDL keyword.
    if text.trim().eq_ignore_ascii_case("CURRENT_TIMESTAMP") {
        return Some(Value::Null);
    }
    value::parse_datetime(text).map(Value::DateTime)
}

fn parse_i64(text: &str) -> Option<i64> {
    text.trim().parse().ok()
}

fn parse_u64(text: &str) -> Option<u64> {
    text.trim().parse().ok()
}

fn parse_bytes_i64(bytes: &[u8]) -> Option<i64> {
    parse_i64(&String::from_utf8_lossy(bytes))
}

fn parse_bytes_u64(bytes: &[u8]) -> Option<u64> {
    parse_u64(&String::from_utf8_lossy(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn integer_wraps_to_32_bits() {
        let got = receive(ColumnType::Integer, DriverValue::Int(i64::MAX), "n").unwrap();
        assert_eq!(got, Value::Int(-1));
        let got = receive(ColumnType::Integer, DriverValue::Text("7".into()), "n").unwrap();
        assert_eq!(got, Value::Int(7));
    }

    #[test]
    fn string_formats_numbers() {
        let got = receive(ColumnType::String, DriverValue::Double(3.5), "n").unwrap();
        assert_eq!(got, Value::Text("3.5".into()));
        let got = receive(ColumnType::String, DriverValue::Int(-4), "n").unwrap();
        assert_eq!(got, Value::Text("-4".into()));
    }

    #[test]
    fn driver_floats_keep_their_width() {
        let got = receive(ColumnType::Float, DriverValue::Float(1.5), "f").unwrap();
        assert_eq!(got, Value::Float(1.5));
        let got = receive(ColumnType::Double, DriverValue::Float(0.25), "f").unwrap();
        assert_eq!(got, Value::Double(0.25));
        let got = receive(ColumnType::Float, DriverValue::Text(" 2.75 ".into()), "f").unwrap();
        assert_eq!(got, Value::Float(2.75));
        let got = receive(ColumnType::Float, DriverValue::Bytes(b"1.5".to_vec()), "f").unwrap();
        assert_eq!(got, Value::Float(1.5));
        let got = receive(ColumnType::Double, DriverValue::Bytes(b"-690.5".to_vec()), "f").unwrap();
        assert_eq!(got, Value::Double(-690.5));
    }

    #[test]
    fn unset_timestamp_default_is_null() {
        let raw = DriverValue::Text("CURRENT_TIMESTAMP".into());
        assert_eq!(receive(ColumnType::DateTime, raw, "ts").unwrap(), Value::Null);

        let raw = DriverValue::Text("2023-01-02 03:04:05".into());
        let Value::DateTime(ts) = receive(ColumnType::DateTime, raw, "ts").unwrap() else {
            panic!("expected a datetime");
        };
        assert_eq!(ts.to_string(), "2023-01-02 03:04:05");
    }

    #[test]
    fn bool_accepts_flags_and_words() {
        for raw in [
            DriverValue::Int(2),
            DriverValue::UInt(1),
            DriverValue::Text("on".into()),
            DriverValue::Text("true".into()),
            DriverValue::Bytes(b"1".to_vec()),
        ] {
            assert_eq!(receive(ColumnType::Bool, raw, "b").unwrap(), Value::Bool(true));
        }
        assert_eq!(
            receive(ColumnType::Bool, DriverValue::Int(0), "b").unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            receive(ColumnType::Bool, DriverValue::Bytes(b"off".to_vec()), "b").unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn unknown_passes_through() {
        let got = receive(ColumnType::Unknown, DriverValue::UInt(9), "c").unwrap();
        assert_eq!(got, Value::UInt(9));
    }

    #[test]
    fn mismatches_are_rejected() {
        let err = receive(ColumnType::Bytes, DriverValue::Int(1), "payload").unwrap_err();
        assert!(matches!(err, Error::UnsupportedColumnType { .. }));
    }
}
