//! Tagged values
//!
//! Native adapters decode result sets into [`Value`] and the type converter
//! produces [`Value`] from user-supplied text. Formatting back to display strings
//! happens once, at the result boundary, through [`Value::to_display_string`].

use crate::core::types::TypeFamily;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// A single value crossing the engine boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Untyped SQL NULL
    Null,
    /// Absent value of a nullable column, tagged with the column's family
    NullOf(TypeFamily),
    Bool(bool),
    Int(i64),
    UInt(u64),
    /// Integer wider than 64 bits, kept as validated digits
    BigInt(String),
    /// Exact numeric, kept as validated digits so no precision is lost
    Decimal(String),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(String),
    Json(serde_json::Value),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    TimestampTz(DateTime<FixedOffset>),
    Array(Vec<Value>),
}

impl Value {
    /// Check for either flavour of NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::NullOf(_))
    }

    /// Get the value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int(v) => Some(*v != 0),
            Value::UInt(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Get the value as an i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            Value::Bool(v) => Some(i64::from(*v)),
            Value::Text(s) | Value::Decimal(s) | Value::BigInt(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Get the value as an f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Text(s) | Value::Decimal(s) | Value::BigInt(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Borrow textual payloads
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Uuid(s) | Value::Decimal(s) | Value::BigInt(s) => Some(s),
            _ => None,
        }
    }

    /// Short name of the variant, used in logs
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null | Value::NullOf(_) => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::BigInt(_) => "bigint",
            Value::Decimal(_) => "decimal",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Json(_) => "json",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::Time(_) => "time",
            Value::TimestampTz(_) => "timestamptz",
            Value::Array(_) => "array",
        }
    }

    /// Render the value the way result rows expose it.
    ///
    /// NULL is the empty string and binary is `0x` followed by lowercase hex.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null | Value::NullOf(_) => String::new(),
            Value::Bool(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::UInt(v) => v.to_string(),
            Value::BigInt(s) | Value::Decimal(s) | Value::Text(s) | Value::Uuid(s) => s.clone(),
            Value::Float(v) => format_float(*v),
            Value::Bytes(b) => format_bytes(b),
            Value::Json(j) => j.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => format_datetime(dt),
            Value::Time(t) => {
                if t.nanosecond() == 0 {
                    t.format("%H:%M:%S").to_string()
                } else {
                    t.format("%H:%M:%S%.f").to_string()
                }
            }
            Value::TimestampTz(ts) => ts.to_rfc3339(),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(Value::to_display_string).collect();
                format!("[{}]", parts.join(", "))
            }
        }
    }
}

/// `0x` + lowercase hex, empty input stays empty
pub fn format_bytes(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        String::new()
    } else {
        format!("0x{}", hex::encode(bytes))
    }
}

fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

fn format_datetime(dt: &NaiveDateTime) -> String {
    if dt.nanosecond() == 0 {
        dt.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One decoded result row, in column order
pub type ValueRow = Vec<Value>;
