//! Delta export/load for cross-site replication (C8).

use crate::backend::{bookkeeping_columns, Backend, ColumnDef, CHECKSUM, FROM_TS, UNTIL_TS};
use crate::error::{Result, ScdbError};
use crate::identifier::Identifier;
use crate::lock::LockGuard;
use crate::table_meta;
use crate::value::{get, Row, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A portable set of historical row versions, transferable between two
/// sites across a trust boundary (§4.8). `columns` is the declared column
/// order (payload columns followed by the three bookkeeping columns).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Delta {
    #[must_use]
    pub fn payload_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.as_str() != CHECKSUM && c.as_str() != FROM_TS && c.as_str() != UNTIL_TS)
            .cloned()
            .collect()
    }
}

/// Export every row of `target` whose `from_ts` falls in `[from_ts, until_ts)`
/// (or `from_ts ..` if `until_ts` is absent).
///
/// # Errors
/// Propagates backend failures, or `NotHistorical` if `target` lacks the
/// bookkeeping columns.
pub fn delta_export(
    backend: &dyn Backend,
    target: &Identifier,
    from_ts: DateTime<Utc>,
    until_ts: Option<DateTime<Utc>>,
) -> Result<Delta> {
    let columns = backend.table_columns(target)?.ok_or_else(|| ScdbError::NotHistorical {
        table: target.to_string(),
    })?;
    if !table_meta::is_historical(backend, target)? {
        return Err(ScdbError::NotHistorical {
            table: target.to_string(),
        });
    }

    let sql = format!("SELECT * FROM {}", backend.quote_identifier(target));
    let rows = backend.query(&sql, &[])?;

    let filtered: Vec<Row> = rows
        .into_iter()
        .filter(|row| {
            let Some(row_from) = get(row, FROM_TS).and_then(Value::as_timestamp) else {
                return false;
            };
            row_from >= from_ts && until_ts.is_none_or(|until| row_from < until)
        })
        .collect();

    Ok(Delta {
        columns: columns.into_iter().map(|c| c.name).collect(),
        rows: filtered,
    })
}

/// Apply `deltas` to `target`, creating it if missing. Equivalent to
/// replaying the historical row versions the deltas carry, in `from_ts`
/// order, which is how a secondary site catches up on change sets without
/// recomputing the reconciliation that produced them.
///
/// # Errors
/// `SchemaMismatch` if `target` exists with different payload columns than
/// the deltas carry, `NotHistorical` if it exists but isn't a historical
/// table, or `Backend` for any underlying failure.
pub fn delta_load(backend: &dyn Backend, target: &Identifier, deltas: &[Delta]) -> Result<usize> {
    let target = target.clone().resolve(backend)?;
    let schema = target
        .schema_name()
        .map_or_else(|| backend.default_schema(), |s| Ok(s.to_string()))?;

    let payload_columns: Vec<String> = deltas.first().map(Delta::payload_columns).unwrap_or_default();

    let mut all_rows: Vec<Row> = deltas.iter().flat_map(|d| d.rows.clone()).collect();
    all_rows.sort_by_key(|row| get(row, FROM_TS).and_then(Value::as_timestamp));

    let guard = LockGuard::acquire(backend, &target, &schema)?;

    let outcome = (|| -> Result<usize> {
        match backend.table_columns(&target)? {
            None => {
                let mut defs: Vec<ColumnDef> = table_meta::infer_column_defs(&payload_columns, &all_rows);
                defs.retain(|d| !matches!(d.name.as_str(), CHECKSUM | FROM_TS | UNTIL_TS));
                defs.extend(bookkeeping_columns());
                backend.create_table(&target, &defs, false)?;
            }
            Some(columns) => {
                if !table_meta::is_historical(backend, &target)? {
                    return Err(ScdbError::NotHistorical {
                        table: target.to_string(),
                    });
                }
                let existing: HashSet<String> =
                    table_meta::payload_columns(&columns).into_iter().collect();
                let incoming: HashSet<String> = payload_columns.iter().cloned().collect();
                if existing != incoming {
                    return Err(ScdbError::SchemaMismatch {
                        expected: existing.into_iter().collect(),
                        found: incoming.into_iter().collect(),
                    });
                }
            }
        }

        if all_rows.is_empty() {
            return Ok(0);
        }

        let mut all_columns = payload_columns.clone();
        all_columns.push(CHECKSUM.to_string());
        all_columns.push(FROM_TS.to_string());
        all_columns.push(UNTIL_TS.to_string());

        backend.insert_rows(&target, &all_columns, &all_rows)?;
        Ok(all_rows.len())
    })();

    let release_result = guard.release();
    match outcome {
        Ok(n) => {
            release_result?;
            Ok(n)
        }
        Err(e) => {
            let _ = release_result;
            Err(e)
        }
    }
}
