//! Typed values carried by statement parameters and result rows.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};

use super::constants::ColumnType;
use crate::error::{Error, Result};

/// A single SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Null,
    Boolean(bool),
    Timestamp(DateTime<FixedOffset>),
}

impl Value {
    /// Tag written ahead of the parameter's encoding.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Integer(_) => ColumnType::Integer,
            Value::Float(_) => ColumnType::Float,
            Value::Text(_) => ColumnType::Text,
            Value::Blob(_) => ColumnType::Blob,
            Value::Null => ColumnType::Null,
            Value::Boolean(_) => ColumnType::Boolean,
            Value::Timestamp(_) => ColumnType::Iso8601,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for Value {
    fn from(v: DateTime<Tz>) -> Self {
        Value::Timestamp(v.fixed_offset())
    }
}

/// A statement parameter with its 1-based position.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedValue {
    pub ordinal: usize,
    pub value: Value,
}

impl NamedValue {
    /// Numbers positional values starting at 1.
    pub fn from_values(values: &[Value]) -> Vec<NamedValue> {
        values
            .iter()
            .enumerate()
            .map(|(i, value)| NamedValue {
                ordinal: i + 1,
                value: value.clone(),
            })
            .collect()
    }
}

/// Layouts accepted for ISO8601 columns, tried in order.
///
/// `%.f` also matches a missing fractional part.
const TIMESTAMP_FORMATS_WITH_OFFSET: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
];

const TIMESTAMP_FORMATS_NAIVE: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Formats a timestamp parameter as `YYYY-MM-DD HH:MM:SS[.fraction]+HH:MM`.
///
/// The fraction keeps only significant digits and is omitted when zero.
pub fn format_timestamp(t: &DateTime<FixedOffset>) -> String {
    let mut out = t.format("%Y-%m-%d %H:%M:%S").to_string();
    let nanos = t.nanosecond() % 1_000_000_000;
    if nanos != 0 {
        let fraction = format!("{nanos:09}");
        out.push('.');
        out.push_str(fraction.trim_end_matches('0'));
    }
    out.push_str(&t.format("%:z").to_string());
    out
}

/// Parses an ISO8601 column value and re-expresses it in local time.
///
/// A trailing `Z` is dropped and values without an offset are read as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>> {
    let value = value.strip_suffix('Z').unwrap_or(value);

    for format in TIMESTAMP_FORMATS_WITH_OFFSET {
        if let Ok(t) = DateTime::parse_from_str(value, format) {
            return Ok(to_local(t));
        }
    }
    for format in TIMESTAMP_FORMATS_NAIVE {
        if let Ok(t) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(to_local(Utc.from_utc_datetime(&t)));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, DATE_FORMAT) {
        let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        return Ok(to_local(Utc.from_utc_datetime(&midnight)));
    }

    Err(Error::Malformed(format!("unparseable timestamp {value:?}")))
}

/// Converts a unix-seconds column value to local time.
pub fn unix_timestamp(seconds: i64) -> Result<DateTime<FixedOffset>> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .map(to_local)
        .ok_or_else(|| Error::Malformed(format!("unix time {seconds} out of range")))
}

fn to_local<Tz: TimeZone>(t: DateTime<Tz>) -> DateTime<FixedOffset> {
    t.with_timezone(&Local).fixed_offset()
}
