//! Common-refinement merge of several historical tables on a shared key (C7).

use crate::backend::Backend;
use crate::error::Result;
use crate::identifier::Identifier;
use crate::value::{get, Row, Value};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// One input to [`interlace`]: a historical table, the payload columns to
/// pull from it, and a label used to disambiguate its output column names
/// (`{label}_{column}`) when two inputs share a payload column name.
#[derive(Debug, Clone)]
pub struct InterlaceSource<'a> {
    pub target: &'a Identifier,
    pub payload_columns: Vec<String>,
    pub label: String,
}

impl<'a> InterlaceSource<'a> {
    #[must_use]
    pub fn new(target: &'a Identifier, payload_columns: Vec<String>, label: impl Into<String>) -> Self {
        Self {
            target,
            payload_columns,
            label: label.into(),
        }
    }
}

/// Merge `sources` on the key columns `by`, producing the common refinement
/// of every input's validity axis (§4.7): one output row per maximal
/// interval during which the set of matching input rows is constant, each
/// carrying every input's payload columns (null where an input has no row
/// covering that interval).
///
/// # Errors
/// Propagates backend failures from querying any source table.
pub fn interlace(
    backend: &dyn Backend,
    sources: &[InterlaceSource<'_>],
    by: &[String],
) -> Result<Vec<Row>> {
    let mut per_source_rows: Vec<Vec<Row>> = Vec::with_capacity(sources.len());
    for source in sources {
        let sql = format!("SELECT * FROM {}", backend.quote_identifier(source.target));
        per_source_rows.push(backend.query(&sql, &[])?);
    }

    let mut key_values: HashMap<String, Row> = HashMap::new();
    let mut grouped: Vec<HashMap<String, Vec<Row>>> = vec![HashMap::new(); sources.len()];

    for (idx, rows) in per_source_rows.into_iter().enumerate() {
        for row in rows {
            let key = key_repr(&row, by);
            key_values.entry(key.clone()).or_insert_with(|| {
                by.iter()
                    .filter_map(|c| get(&row, c).map(|v| (c.clone(), v.clone())))
                    .collect()
            });
            grouped[idx].entry(key).or_default().push(row);
        }
    }

    let mut keys: Vec<String> = key_values.keys().cloned().collect();
    keys.sort();

    let mut output = Vec::new();

    for key in &keys {
        let key_row = &key_values[key];

        let mut instants: Vec<DateTime<Utc>> = Vec::new();
        for group in &grouped {
            if let Some(rows) = group.get(key) {
                for row in rows {
                    if let Some(from) = from_ts_of(row) {
                        instants.push(from);
                    }
                    instants.push(until_ts_of(row).unwrap_or(DateTime::<Utc>::MAX_UTC));
                }
            }
        }
        instants.sort_unstable();
        instants.dedup();

        for window in instants.windows(2) {
            let (a, b) = (window[0], window[1]);
            if a >= b {
                continue;
            }

            let mut out_row: Row = key_row.clone();
            out_row.push((crate::backend::FROM_TS.to_string(), Value::Timestamp(a)));
            let until_value = if b == DateTime::<Utc>::MAX_UTC {
                Value::Null
            } else {
                Value::Timestamp(b)
            };
            out_row.push((crate::backend::UNTIL_TS.to_string(), until_value));

            for (idx, source) in sources.iter().enumerate() {
                let matching = grouped[idx].get(key).and_then(|rows| {
                    rows.iter().find(|row| {
                        let from = from_ts_of(row).unwrap_or(DateTime::<Utc>::MIN_UTC);
                        let until = until_ts_of(row).unwrap_or(DateTime::<Utc>::MAX_UTC);
                        from <= a && until >= b
                    })
                });
                for col in &source.payload_columns {
                    let out_name = format!("{}_{col}", source.label);
                    let value = matching.and_then(|row| get(row, col)).cloned().unwrap_or(Value::Null);
                    out_row.push((out_name, value));
                }
            }

            output.push(out_row);
        }
    }

    Ok(output)
}

const KEY_SEP: char = '\u{1}';

fn key_repr(row: &Row, by: &[String]) -> String {
    by.iter()
        .map(|c| get(row, c).map(ToString::to_string).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(&KEY_SEP.to_string())
}

fn from_ts_of(row: &Row) -> Option<DateTime<Utc>> {
    get(row, crate::backend::FROM_TS).and_then(Value::as_timestamp)
}

fn until_ts_of(row: &Row) -> Option<DateTime<Utc>> {
    get(row, crate::backend::UNTIL_TS).and_then(Value::as_timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{bookkeeping_columns, ColumnDef, ColumnType};
    use crate::sqlite::SqliteBackend;

    fn make_table(backend: &SqliteBackend, name: &str, key_col: &str, payload_col: &str) -> Identifier {
        let id = Identifier::parse(name).unwrap();
        let mut columns = vec![
            ColumnDef::new(key_col, ColumnType::Text, false),
            ColumnDef::new(payload_col, ColumnType::Text, true),
        ];
        columns.extend(bookkeeping_columns());
        backend.create_table(&id, &columns, false).unwrap();
        id
    }

    fn row(key: &str, key_col: &str, payload_col: &str, payload: &str, from: &str, until: Option<&str>) -> Row {
        vec![
            (key_col.to_string(), Value::Text(key.to_string())),
            (payload_col.to_string(), Value::Text(payload.to_string())),
            ("checksum".to_string(), Value::Text(format!("{key}{payload}"))),
            ("from_ts".to_string(), Value::Timestamp(from.parse().unwrap())),
            (
                "until_ts".to_string(),
                until.map_or(Value::Null, |u| Value::Timestamp(u.parse().unwrap())),
            ),
        ]
    }

    #[test]
    fn merges_two_axes_into_common_refinement() {
        let backend = SqliteBackend::open_memory().unwrap();
        let t1 = make_table(&backend, "t1", "key", "obs1");
        let t2 = make_table(&backend, "t2", "key", "obs2");

        let cols = ["key", "obs1", "checksum", "from_ts", "until_ts"].map(String::from);
        backend
            .insert_rows(
                &t1,
                &cols,
                &[
                    row("A", "key", "obs1", "1", "2021-01-01T00:00:00Z", Some("2021-02-01T00:00:00Z")),
                    row("A", "key", "obs1", "2", "2021-02-01T00:00:00Z", Some("2021-03-01T00:00:00Z")),
                    row("B", "key", "obs1", "2", "2021-01-01T00:00:00Z", None),
                ],
            )
            .unwrap();

        let cols2 = ["key", "obs2", "checksum", "from_ts", "until_ts"].map(String::from);
        backend
            .insert_rows(
                &t2,
                &cols2,
                &[
                    row("A", "key", "obs2", "a", "2021-01-01T00:00:00Z", Some("2021-04-01T00:00:00Z")),
                    row("B", "key", "obs2", "b", "2021-01-01T00:00:00Z", None),
                ],
            )
            .unwrap();

        let sources = vec![
            InterlaceSource::new(&t1, vec!["obs1".to_string()], "t1"),
            InterlaceSource::new(&t2, vec!["obs2".to_string()], "t2"),
        ];

        let result = interlace(&backend, &sources, &["key".to_string()]).unwrap();
        // Key A: boundaries at 01,02,03,04 -> 3 intervals; key B: single unbounded interval.
        assert_eq!(result.len(), 4);
    }
}
