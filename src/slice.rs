//! Time-slice query over a historical table (C5).

use crate::backend::Backend;
use crate::error::Result;
use crate::identifier::Identifier;
use crate::table_meta;
use crate::value::{Row, Value};
use chrono::{DateTime, Utc};

/// Return the rows of `id` live at `at` — `from_ts <= at < until_ts` (with
/// unbounded `until_ts` treated as `+inf`) — or the full history when `at`
/// is `None`.
///
/// When `include_slice_info` is false, the three bookkeeping columns are
/// stripped from the returned rows so callers see only their own payload
/// shape back.
///
/// # Errors
/// Propagates backend failures.
pub fn slice_time(
    backend: &dyn Backend,
    id: &Identifier,
    at: Option<DateTime<Utc>>,
    include_slice_info: bool,
) -> Result<Vec<Row>> {
    let table = backend.quote_identifier(id);
    let rows = match at {
        None => backend.query(&format!("SELECT * FROM {table}"), &[])?,
        Some(at) => {
            let literal = backend.render_timestamp(at);
            let sql = format!(
                "SELECT * FROM {table} WHERE from_ts <= {literal} AND (until_ts > {literal} OR until_ts IS NULL)"
            );
            backend.query(&sql, &[])?
        }
    };

    if include_slice_info {
        return Ok(rows);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .filter(|(name, _)| !is_bookkeeping(name))
                .collect()
        })
        .collect())
}

/// Convenience wrapper matching the public facade's `get_table`: returns the
/// payload columns (the declared table columns minus bookkeeping) alongside
/// the sliced rows.
///
/// # Errors
/// Propagates backend failures, or `NotHistorical` if `id` lacks the
/// bookkeeping columns.
pub fn get_table(
    backend: &dyn Backend,
    id: &Identifier,
    at: Option<DateTime<Utc>>,
    include_slice_info: bool,
) -> Result<(Vec<String>, Vec<Row>)> {
    let columns = backend.table_columns(id)?.unwrap_or_default();
    let payload = table_meta::payload_columns(&columns);
    let rows = slice_time(backend, id, at, include_slice_info)?;
    Ok((payload, rows))
}

fn is_bookkeeping(name: &str) -> bool {
    matches!(
        name,
        crate::backend::CHECKSUM | crate::backend::FROM_TS | crate::backend::UNTIL_TS
    )
}

/// Extract `from_ts`/`until_ts` from a bookkeeping row, if present.
pub(crate) fn from_ts_of(row: &Row) -> Option<DateTime<Utc>> {
    crate::value::get(row, crate::backend::FROM_TS).and_then(Value::as_timestamp)
}

pub(crate) fn until_ts_of(row: &Row) -> Option<DateTime<Utc>> {
    crate::value::get(row, crate::backend::UNTIL_TS).and_then(Value::as_timestamp)
}

pub(crate) fn checksum_of(row: &Row) -> Option<String> {
    match crate::value::get(row, crate::backend::CHECKSUM) {
        Some(Value::Text(s)) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ColumnDef, ColumnType};
    use crate::sqlite::SqliteBackend;

    fn setup() -> (SqliteBackend, Identifier) {
        let backend = SqliteBackend::open_memory().unwrap();
        let id = Identifier::parse("mtcars").unwrap();
        let mut columns = vec![ColumnDef::new("car", ColumnType::Text, false)];
        columns.extend(crate::backend::bookkeeping_columns());
        backend.create_table(&id, &columns, false).unwrap();
        (backend, id)
    }

    #[test]
    fn slice_excludes_rows_outside_validity() {
        let (backend, id) = setup();
        let t0: DateTime<Utc> = "2020-01-01T00:00:00Z".parse().unwrap();
        let t1: DateTime<Utc> = "2020-02-01T00:00:00Z".parse().unwrap();
        let row: Row = vec![
            ("car".into(), Value::Text("Mazda RX4".into())),
            ("checksum".into(), Value::Text("abc".into())),
            ("from_ts".into(), Value::Timestamp(t0)),
            ("until_ts".into(), Value::Timestamp(t1)),
        ];
        backend
            .insert_rows(
                &id,
                &["car", "checksum", "from_ts", "until_ts"]
                    .map(String::from),
                &[row],
            )
            .unwrap();

        let before: DateTime<Utc> = "2019-12-31T00:00:00Z".parse().unwrap();
        let live = slice_time(&backend, &id, Some(before), false).unwrap();
        assert!(live.is_empty());

        let during: DateTime<Utc> = "2020-01-15T00:00:00Z".parse().unwrap();
        let live = slice_time(&backend, &id, Some(during), false).unwrap();
        assert_eq!(live.len(), 1);
        assert!(crate::value::get(&live[0], "checksum").is_none());
    }

    #[test]
    fn unbounded_until_ts_is_always_live_after_from_ts() {
        let (backend, id) = setup();
        let t0: DateTime<Utc> = "2020-01-01T00:00:00Z".parse().unwrap();
        let row: Row = vec![
            ("car".into(), Value::Text("Datsun 710".into())),
            ("checksum".into(), Value::Text("def".into())),
            ("from_ts".into(), Value::Timestamp(t0)),
            ("until_ts".into(), Value::Null),
        ];
        backend
            .insert_rows(
                &id,
                &["car", "checksum", "from_ts", "until_ts"]
                    .map(String::from),
                &[row],
            )
            .unwrap();

        let far_future: DateTime<Utc> = "2099-01-01T00:00:00Z".parse().unwrap();
        let live = slice_time(&backend, &id, Some(far_future), true).unwrap();
        assert_eq!(live.len(), 1);
    }
}
