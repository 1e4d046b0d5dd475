use std::cmp::Ordering;
use std::str::FromStr;

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::db::connection::KeySort;

/// Vendor-neutral cell value. Every driver decodes into this type before rows
/// reach the matcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(BigDecimal),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Bytes(Vec<u8>),
    /// A cell the driver could not decode; carries the reason.
    Unreadable(String),
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_unreadable(&self) -> bool {
        matches!(self, Value::Unreadable(_))
    }

    /// Canonical text form; `None` for null and unreadable cells.
    pub fn render(&self) -> Option<String> {
        match self {
            Value::Null | Value::Unreadable(_) => None,
            Value::Bool(value) => Some(value.to_string()),
            Value::Int(value) => Some(value.to_string()),
            Value::Float(value) => Some(value.to_string()),
            Value::Decimal(value) => Some(value.to_string()),
            Value::Text(value) => Some(value.clone()),
            Value::Date(value) => Some(value.format("%Y-%m-%d").to_string()),
            Value::Timestamp(value) => Some(value.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            Value::Bytes(value) => {
                let mut out = String::with_capacity(2 + value.len() * 2);
                out.push_str("0x");
                for byte in value {
                    out.push_str(&format!("{:02x}", byte));
                }
                Some(out)
            }
        }
    }

    /// Exact-mode equality after normalizing vendor representations.
    ///
    /// Numbers compare by value (`1`, `1.0` and `"1.00"` agree), booleans agree
    /// with `0`/`1`, and date strings agree with typed dates. Null only equals
    /// null; unreadable cells never equal anything.
    pub fn same_as(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Null, _) | (_, Null) => false,
            (Unreadable(_), _) | (_, Unreadable(_)) => false,
            (Text(a), Text(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Bool(a), Bool(b)) => a == b,
            (Bool(a), Int(b)) | (Int(b), Bool(a)) => i64::from(*a) == *b,
            (Date(a), Date(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            (Date(a), Timestamp(b)) | (Timestamp(b), Date(a)) => {
                a.and_time(NaiveTime::default()) == *b
            }
            (Text(text), typed) | (typed, Text(text)) => match parse_like(text, typed) {
                Some(parsed) => parsed.same_as(typed),
                None => false,
            },
            (a, b) => match (a.numeric(), b.numeric()) {
                (Some(a), Some(b)) => a.cmp_numeric(&b) == Ordering::Equal,
                _ => false,
            },
        }
    }

    /// Total order used for merge-join keys. Numbers compare by value across
    /// representations; otherwise values order by kind first.
    pub fn key_cmp(&self, other: &Value) -> Ordering {
        use Value::*;
        let rank = self.rank().cmp(&other.rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Text(a), Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (Unreadable(a), Unreadable(b)) => a.cmp(b),
            (Date(_) | Timestamp(_), Date(_) | Timestamp(_)) => {
                self.as_timestamp().cmp(&other.as_timestamp())
            }
            _ => match (self.numeric(), other.numeric()) {
                (Some(a), Some(b)) => a.cmp_numeric(&b),
                _ => Ordering::Equal,
            },
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) | Value::Decimal(_) => 2,
            Value::Text(_) => 3,
            Value::Date(_) | Value::Timestamp(_) => 4,
            Value::Bytes(_) => 5,
            Value::Unreadable(_) => 6,
        }
    }

    fn numeric(&self) -> Option<Numeric> {
        match self {
            Value::Int(v) => Some(Numeric::Exact(BigDecimal::from(*v))),
            Value::Decimal(v) => Some(Numeric::Exact(v.clone())),
            Value::Float(v) => Some(Numeric::Approx(*v)),
            _ => None,
        }
    }

    fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(d) => Some(d.and_time(NaiveTime::default())),
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

enum Numeric {
    Exact(BigDecimal),
    Approx(f64),
}

impl Numeric {
    fn as_f64(&self) -> f64 {
        match self {
            Numeric::Exact(v) => v.to_f64().unwrap_or(f64::NAN),
            Numeric::Approx(v) => *v,
        }
    }

    fn cmp_numeric(&self, other: &Numeric) -> Ordering {
        match (self, other) {
            (Numeric::Exact(a), Numeric::Exact(b)) => a.cmp(b),
            _ => self.as_f64().total_cmp(&other.as_f64()),
        }
    }
}

/// Reinterprets text in the shape of `typed` so cross-vendor columns stored as
/// strings on one side still compare by value.
fn parse_like(text: &str, typed: &Value) -> Option<Value> {
    let trimmed = text.trim();
    match typed {
        Value::Int(_) | Value::Float(_) | Value::Decimal(_) => {
            BigDecimal::from_str(trimmed).ok().map(Value::Decimal)
        }
        Value::Bool(_) => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Some(Value::Bool(true)),
            "false" | "f" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        Value::Date(_) | Value::Timestamp(_) => parse_temporal(trimmed),
        _ => None,
    }
}

fn parse_temporal(text: &str) -> Option<Value> {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(Value::Date(date));
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(Value::Timestamp)
}

/// Column as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }

    /// True for character types, which need a binary collation to sort the
    /// way the matcher compares keys.
    pub fn is_textual(&self) -> bool {
        let lower = self.data_type.to_ascii_lowercase();
        ["char", "text", "string", "name", "enum"]
            .iter()
            .any(|needle| lower.contains(needle))
    }

    pub fn is_guid(&self) -> bool {
        matches!(
            self.data_type.to_ascii_lowercase().as_str(),
            "uniqueidentifier" | "uuid"
        )
    }

    pub fn key_sort(&self) -> KeySort {
        if self.is_guid() {
            KeySort::Guid
        } else if self.is_textual() {
            KeySort::Text
        } else {
            KeySort::Native
        }
    }
}
