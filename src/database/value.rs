//! Raw result values
//!
//! Rows come back from the server as [`SqlValue`] cells. NULL and temporal values are
//! kept in their raw form here; normalisation (explicit null, ISO-8601 strings) happens
//! only when a result is rendered, through [`SqlValue::to_json`] and [`SqlValue::to_text`].

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

/// A single cell value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// DECIMAL/NUMERIC/MONEY kept as their exact textual form
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Guid(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Render as JSON; NULL becomes `null`, temporal values become ISO-8601 strings
    pub fn to_json(&self) -> JsonValue {
        match self {
            SqlValue::Null => JsonValue::Null,
            SqlValue::Bool(b) => JsonValue::Bool(*b),
            SqlValue::Int(i) => JsonValue::from(*i),
            SqlValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            SqlValue::Decimal(d) => JsonValue::String(d.clone()),
            SqlValue::Text(s) | SqlValue::Guid(s) => JsonValue::String(s.clone()),
            SqlValue::Bytes(bytes) => JsonValue::String(hex(bytes)),
            SqlValue::Date(_)
            | SqlValue::Time(_)
            | SqlValue::DateTime(_)
            | SqlValue::DateTimeOffset(_) => JsonValue::String(self.to_text()),
        }
    }

    /// Render for text tables; NULL is the literal `NULL`
    pub fn to_text(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(b) => b.to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) => f.to_string(),
            SqlValue::Decimal(s) | SqlValue::Text(s) | SqlValue::Guid(s) => s.clone(),
            SqlValue::Bytes(bytes) => hex(bytes),
            SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            SqlValue::Time(t) => t.format("%H:%M:%S%.3f").to_string(),
            // Naive server timestamps are treated as UTC, matching how the driver reports them
            SqlValue::DateTime(dt) => dt.and_utc().to_rfc3339_opts(SecondsFormat::Millis, true),
            SqlValue::DateTimeOffset(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) | SqlValue::Decimal(s) | SqlValue::Guid(s) => Some(s),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            SqlValue::Bool(b) => Some(i64::from(*b)),
            SqlValue::Decimal(s) | SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            SqlValue::Int(i) => Some(*i != 0),
            SqlValue::Text(s) => match s.to_ascii_uppercase().as_str() {
                "YES" | "TRUE" | "1" => Some(true),
                "NO" | "FALSE" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        out.push_str(&format!("{:02X}", b));
    }
    out
}

/// Outcome of one executed statement: the first result set plus affected-row counts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    /// Column names of the first result set, in server order
    pub columns: Vec<String>,
    /// Rows of the first result set
    pub rows: Vec<Vec<SqlValue>>,
    /// One count per statement / result set
    pub rows_affected: Vec<u64>,
}

impl QueryOutput {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        let count = rows.len() as u64;
        Self {
            columns,
            rows,
            rows_affected: vec![count],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Iterate rows with by-name access
    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows.iter().map(move |values| Record {
            columns: &self.columns,
            values,
        })
    }

    /// Rows as JSON objects (rendering layer)
    pub fn row_maps(&self) -> Vec<Map<String, JsonValue>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect()
            })
            .collect()
    }

    /// Serializable `{rows, rowsAffected}` view
    pub fn to_result_set(&self) -> ResultSet {
        ResultSet {
            columns: self.columns.clone(),
            rows: self.row_maps(),
            rows_affected: self.rows_affected.clone(),
        }
    }
}

/// JSON shape of an execution result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, JsonValue>>,
    pub rows_affected: Vec<u64>,
}

/// Borrowed row with lookups by column name
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    columns: &'a [String],
    values: &'a [SqlValue],
}

impl<'a> Record<'a> {
    pub fn get(&self, column: &str) -> Option<&'a SqlValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|idx| self.values.get(idx))
    }

    pub fn get_str(&self, column: &str) -> Option<&'a str> {
        self.get(column).and_then(SqlValue::as_str)
    }

    pub fn get_string(&self, column: &str) -> String {
        self.get_str(column).unwrap_or_default().to_string()
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(SqlValue::as_i64)
    }

    pub fn get_bool(&self, column: &str) -> bool {
        self.get(column).and_then(SqlValue::as_bool).unwrap_or(false)
    }
}
