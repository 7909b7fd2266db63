//! Backend-agnostic representation of a row of payload data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single cell value, independent of any particular backend's wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Encode the value with a leading type tag so that distinct variants
    /// (and in particular `Null` vs. an empty `Text`) never collapse onto
    /// the same byte sequence when fed into a hasher.
    pub(crate) fn encode_for_fingerprint(&self, out: &mut Vec<u8>) {
        match self {
            Self::Null => out.push(0),
            Self::Integer(i) => {
                out.push(1);
                out.extend_from_slice(&i.to_le_bytes());
            }
            Self::Real(r) => {
                out.push(2);
                out.extend_from_slice(&r.to_bits().to_le_bytes());
            }
            Self::Text(s) => {
                out.push(3);
                out.extend_from_slice(&(s.len() as u64).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Self::Blob(b) => {
                out.push(4);
                out.extend_from_slice(&(b.len() as u64).to_le_bytes());
                out.extend_from_slice(b);
            }
            Self::Timestamp(t) => {
                out.push(5);
                out.extend_from_slice(&t.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
            }
        }
    }

    /// Interpret this value as a timestamp, whether it was stored as a
    /// native `Timestamp` or round-tripped through a backend as RFC 3339
    /// text (e.g. `SQLite`, which has no native timestamp storage class).
    #[must_use]
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(t) => Some(*t),
            Self::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Blob(b) => write!(f, "<{} bytes>", b.len()),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

/// An ordered row of `(column, value)` pairs. Order matches the table's
/// declared column order and must be consistent across every row produced
/// for the same snapshot.
pub type Row = Vec<(String, Value)>;

/// Look up a value by column name.
pub fn get<'a>(row: &'a Row, column: &str) -> Option<&'a Value> {
    row.iter().find(|(name, _)| name == column).map(|(_, v)| v)
}

/// A caller-supplied view of a dataset at one observation time: the declared
/// payload column order plus the rows, each of which must carry exactly
/// those columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Snapshot {
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
