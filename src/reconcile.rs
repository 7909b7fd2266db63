//! The core SCD-2 reconciliation algorithm (C6).

use crate::backend::{Backend, ColumnDef, CHECKSUM, FROM_TS, UNTIL_TS};
use crate::error::{Result, ScdbError};
use crate::fingerprint::fingerprint;
use crate::identifier::Identifier;
use crate::lock::LockGuard;
use crate::logger::{LogRecord, Logger};
use crate::slice::{self, checksum_of, from_ts_of, until_ts_of};
use crate::table_meta::{self, StagingGuard};
use crate::value::{self, Row, Snapshot, Value};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Restricts `update_snapshot` and the adjacency-collapse pass to rows whose
/// projection onto `key_columns` appears in `key_rows` — the `filter_keys`
/// semi-join of §6.
#[derive(Debug, Clone)]
pub struct FilterKeys {
    pub key_columns: Vec<String>,
    pub key_rows: Vec<Row>,
}

impl FilterKeys {
    #[must_use]
    pub fn new(key_columns: Vec<String>, key_rows: Vec<Row>) -> Self {
        Self {
            key_columns,
            key_rows,
        }
    }

    fn matches(&self, row: &Row) -> bool {
        self.key_rows.iter().any(|key_row| {
            self.key_columns
                .iter()
                .all(|col| value::get(key_row, col) == value::get(row, col))
        })
    }
}

fn apply_filters(rows: Vec<Row>, filters: Option<&FilterKeys>) -> Vec<Row> {
    match filters {
        None => rows,
        Some(f) => rows.into_iter().filter(|row| f.matches(row)).collect(),
    }
}

/// Per-call counters reported to the logger (§3's log record, §4.6 step 8).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    pub n_insertions: usize,
    pub n_deactivations: usize,
    pub n_redundant: usize,
}

/// Reconcile `snapshot` against `target` as observed at `t`.
///
/// Acquires the lock for the duration of the call and always releases it,
/// even on error — see §4.6's failure-handling contract.
///
/// # Errors
/// `LockBusy`/`StaleLock` if the lock cannot be acquired, `SchemaMismatch`/
/// `NotHistorical` if `target`'s shape doesn't match `snapshot`, `OutOfOrder`
/// if `enforce_chronological_order` rejects `t`, or `Backend` for any
/// underlying failure.
#[allow(clippy::too_many_arguments)]
pub fn update_snapshot(
    backend: &dyn Backend,
    logger: &dyn Logger,
    target: &Identifier,
    snapshot: &Snapshot,
    t: DateTime<Utc>,
    filters: Option<&FilterKeys>,
    message: Option<&str>,
    enforce_chronological_order: bool,
) -> Result<UpdateStats> {
    let target = target.clone().resolve(backend)?;
    let schema = target
        .schema_name()
        .map_or_else(|| backend.default_schema(), |s| Ok(s.to_string()))?;

    let started_at = Utc::now();
    let span = tracing::debug_span!("scdb::reconcile", target = %target);
    let _enter = span.enter();

    let guard = LockGuard::acquire(backend, &target, &schema)?;

    let outcome = run(
        backend,
        &target,
        snapshot,
        t,
        filters,
        enforce_chronological_order,
    );

    let release_result = guard.release();
    let finished_at = Utc::now();

    match outcome {
        Ok(stats) => {
            release_result?;
            logger.log_info(&format!(
                "{target}: {} insertions, {} deactivations, {} redundant collapsed{}",
                stats.n_insertions,
                stats.n_deactivations,
                stats.n_redundant,
                message.map(|m| format!(" ({m})")).unwrap_or_default()
            ));
            let _ = logger.log_to_db(
                backend,
                &LogRecord {
                    target: target.to_string(),
                    message: message.unwrap_or_default().to_string(),
                    n_insertions: stats.n_insertions,
                    n_deactivations: stats.n_deactivations,
                    n_redundant: stats.n_redundant,
                    success: true,
                    started_at,
                    finished_at,
                },
            );
            logger.finalize_entry();
            Ok(stats)
        }
        Err(err) => {
            let _ = release_result;
            logger.log_error(&err.to_string());
            let _ = logger.log_to_db(
                backend,
                &LogRecord {
                    target: target.to_string(),
                    message: err.to_string(),
                    n_insertions: 0,
                    n_deactivations: 0,
                    n_redundant: 0,
                    success: false,
                    started_at,
                    finished_at,
                },
            );
            logger.finalize_entry();
            Err(err)
        }
    }
}

fn run(
    backend: &dyn Backend,
    target: &Identifier,
    snapshot: &Snapshot,
    t: DateTime<Utc>,
    filters: Option<&FilterKeys>,
    enforce_chronological_order: bool,
) -> Result<UpdateStats> {
    ensure_historical_target(backend, target, snapshot)?;

    if enforce_chronological_order {
        if let Some(max_existing) = max_from_ts(backend, target)? {
            if t < max_existing {
                return Err(ScdbError::OutOfOrder {
                    requested: t.to_rfc3339(),
                    max_existing: max_existing.to_rfc3339(),
                });
            }
        }
    }

    let mut staging_columns: Vec<ColumnDef> =
        table_meta::infer_column_defs(&snapshot.columns, &snapshot.rows);
    staging_columns.push(ColumnDef::new(CHECKSUM, crate::backend::ColumnType::Text, false));
    let staging = StagingGuard::create(backend, &staging_columns)?;

    let digested_rows: Vec<Row> = snapshot
        .rows
        .iter()
        .map(|row| {
            let mut out = row.clone();
            out.push((
                CHECKSUM.to_string(),
                Value::Text(fingerprint(row, &snapshot.columns)),
            ));
            out
        })
        .collect();

    let mut staging_insert_columns = snapshot.columns.clone();
    staging_insert_columns.push(CHECKSUM.to_string());
    backend.insert_rows(staging.id(), &staging_insert_columns, &digested_rows)?;

    let h_t = apply_filters(slice::slice_time(backend, target, Some(t), true)?, filters);
    let staged_sql = format!("SELECT * FROM {}", backend.quote_identifier(staging.id()));
    let staged = apply_filters(backend.query(&staged_sql, &[])?, filters);

    let h_checksums: HashSet<String> = h_t.iter().filter_map(checksum_of).collect();
    let s_checksums: HashSet<String> = staged.iter().filter_map(checksum_of).collect();

    let next_ts = next_timestamp(backend, target, t, filters)?;

    let to_remove: Vec<Row> = h_t
        .into_iter()
        .filter(|row| checksum_of(row).is_some_and(|c| !s_checksums.contains(&c)))
        .collect();
    for row in &to_remove {
        let checksum = checksum_of(row).expect("filtered above");
        let from_ts = from_ts_of(row).ok_or_else(|| ScdbError::Backend(
            crate::error::BackendError::Other("row missing from_ts".to_string()),
        ))?;
        deactivate_row(backend, target, &checksum, from_ts, t)?;
    }

    let to_add: Vec<Row> = staged
        .into_iter()
        .filter(|row| checksum_of(row).is_some_and(|c| !h_checksums.contains(&c)))
        .collect();

    if !to_add.is_empty() {
        let mut insert_columns = snapshot.columns.clone();
        insert_columns.push(CHECKSUM.to_string());
        insert_columns.push(FROM_TS.to_string());
        insert_columns.push(UNTIL_TS.to_string());

        let rows_to_insert: Vec<Row> = to_add
            .iter()
            .map(|row| {
                let mut out: Row = snapshot
                    .columns
                    .iter()
                    .map(|c| (c.clone(), value::get(row, c).cloned().unwrap_or(Value::Null)))
                    .collect();
                out.push((
                    CHECKSUM.to_string(),
                    value::get(row, CHECKSUM).cloned().unwrap_or(Value::Null),
                ));
                out.push((FROM_TS.to_string(), Value::Timestamp(t)));
                out.push((
                    UNTIL_TS.to_string(),
                    next_ts.map_or(Value::Null, Value::Timestamp),
                ));
                out
            })
            .collect();
        backend.insert_rows(target, &insert_columns, &rows_to_insert)?;
    }

    staging.finish()?;

    let n_redundant = cleanup_zero_length(backend, target)?;

    if !enforce_chronological_order || filters.is_none() {
        collapse_adjacent(backend, target, filters)?;
    }

    Ok(UpdateStats {
        n_insertions: to_add.len(),
        n_deactivations: to_remove.len(),
        n_redundant,
    })
}

fn ensure_historical_target(
    backend: &dyn Backend,
    target: &Identifier,
    snapshot: &Snapshot,
) -> Result<()> {
    match backend.table_columns(target)? {
        None => {
            let defs = table_meta::infer_column_defs(&snapshot.columns, &snapshot.rows);
            table_meta::create_table(backend, &defs, target, false)
        }
        Some(columns) => {
            if !table_meta::is_historical(backend, target)? {
                return Err(ScdbError::NotHistorical {
                    table: target.to_string(),
                });
            }
            let expected: HashSet<String> =
                table_meta::payload_columns(&columns).into_iter().collect();
            let found: HashSet<String> = snapshot.columns.iter().cloned().collect();
            if expected != found {
                return Err(ScdbError::SchemaMismatch {
                    expected: table_meta::payload_columns(&columns),
                    found: snapshot.columns.clone(),
                });
            }
            Ok(())
        }
    }
}

fn max_from_ts(backend: &dyn Backend, target: &Identifier) -> Result<Option<DateTime<Utc>>> {
    let sql = format!(
        "SELECT from_ts FROM {}",
        backend.quote_identifier(target)
    );
    let rows = backend.query(&sql, &[])?;
    Ok(rows.iter().filter_map(from_ts_of).max())
}

/// `next_ts = min({from_ts ∈ H | from_ts > t} ∪ {until_ts ∈ H | until_ts > t})`.
fn next_timestamp(
    backend: &dyn Backend,
    target: &Identifier,
    t: DateTime<Utc>,
    filters: Option<&FilterKeys>,
) -> Result<Option<DateTime<Utc>>> {
    let sql = format!("SELECT * FROM {}", backend.quote_identifier(target));
    let rows = apply_filters(backend.query(&sql, &[])?, filters);
    let mut candidates: Vec<DateTime<Utc>> = Vec::new();
    for row in &rows {
        if let Some(from) = from_ts_of(row) {
            if from > t {
                candidates.push(from);
            }
        }
        if let Some(until) = until_ts_of(row) {
            if until > t {
                candidates.push(until);
            }
        }
    }
    Ok(candidates.into_iter().min())
}

fn deactivate_row(
    backend: &dyn Backend,
    target: &Identifier,
    checksum: &str,
    from_ts: DateTime<Utc>,
    until_ts: DateTime<Utc>,
) -> Result<()> {
    let sql = format!(
        "UPDATE {} SET until_ts = ? WHERE checksum = ? AND from_ts = ?",
        backend.quote_identifier(target)
    );
    backend
        .execute(
            &sql,
            &[
                Value::Timestamp(until_ts),
                Value::Text(checksum.to_string()),
                Value::Timestamp(from_ts),
            ],
        )
        .map(|_| ())
}

fn cleanup_zero_length(backend: &dyn Backend, target: &Identifier) -> Result<usize> {
    let sql = format!(
        "DELETE FROM {} WHERE from_ts = until_ts",
        backend.quote_identifier(target)
    );
    backend.execute(&sql, &[])
}

/// Merge chronologically adjacent rows sharing a checksum (step 7 / I4).
fn collapse_adjacent(
    backend: &dyn Backend,
    target: &Identifier,
    filters: Option<&FilterKeys>,
) -> Result<()> {
    let sql = format!("SELECT * FROM {}", backend.quote_identifier(target));
    let rows = apply_filters(backend.query(&sql, &[])?, filters);

    let mut by_checksum: HashMap<String, Vec<Row>> = HashMap::new();
    for row in rows {
        if let Some(checksum) = checksum_of(&row) {
            by_checksum.entry(checksum).or_default().push(row);
        }
    }

    for (checksum, mut group) in by_checksum {
        if group.len() < 2 {
            continue;
        }
        group.sort_by_key(|row| from_ts_of(row).unwrap_or(DateTime::<Utc>::MIN_UTC));

        let mut i = 0;
        while i + 1 < group.len() {
            let until_i = until_ts_of(&group[i]);
            let from_next = from_ts_of(&group[i + 1]);
            if until_i.is_some() && until_i == from_next {
                let earlier_from = from_ts_of(&group[i]).expect("sorted by from_ts");
                let later_from = from_ts_of(&group[i + 1]).expect("sorted by from_ts");
                let new_until = until_ts_of(&group[i + 1]);

                update_until(backend, target, &checksum, earlier_from, new_until)?;
                delete_row(backend, target, &checksum, later_from)?;

                if let Some((_, until_value)) = group[i]
                    .iter_mut()
                    .find(|(name, _)| name == UNTIL_TS)
                {
                    *until_value = new_until.map_or(Value::Null, Value::Timestamp);
                }
                group.remove(i + 1);
            } else {
                i += 1;
            }
        }
    }

    Ok(())
}

fn update_until(
    backend: &dyn Backend,
    target: &Identifier,
    checksum: &str,
    from_ts: DateTime<Utc>,
    until_ts: Option<DateTime<Utc>>,
) -> Result<()> {
    let sql = format!(
        "UPDATE {} SET until_ts = ? WHERE checksum = ? AND from_ts = ?",
        backend.quote_identifier(target)
    );
    backend
        .execute(
            &sql,
            &[
                until_ts.map_or(Value::Null, Value::Timestamp),
                Value::Text(checksum.to_string()),
                Value::Timestamp(from_ts),
            ],
        )
        .map(|_| ())
}

fn delete_row(
    backend: &dyn Backend,
    target: &Identifier,
    checksum: &str,
    from_ts: DateTime<Utc>,
) -> Result<()> {
    let sql = format!(
        "DELETE FROM {} WHERE checksum = ? AND from_ts = ?",
        backend.quote_identifier(target)
    );
    backend
        .execute(&sql, &[Value::Text(checksum.to_string()), Value::Timestamp(from_ts)])
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NullLogger;
    use crate::sqlite::SqliteBackend;

    fn mtcars_snapshot(rows: &[(&str, i64)]) -> Snapshot {
        Snapshot::new(
            vec!["car".to_string(), "hp".to_string()],
            rows.iter()
                .map(|(car, hp)| {
                    vec![
                        ("car".to_string(), Value::Text((*car).to_string())),
                        ("hp".to_string(), Value::Integer(*hp)),
                    ]
                })
                .collect(),
        )
    }

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn initial_load_creates_rows_with_unbounded_until() {
        let backend = SqliteBackend::open_memory().unwrap();
        let target = Identifier::parse("mtcars").unwrap();
        let logger = NullLogger;
        let snapshot = mtcars_snapshot(&[("Mazda RX4", 110), ("Mazda RX4 Wag", 110), ("Datsun 710", 93)]);

        let stats = update_snapshot(
            &backend,
            &logger,
            &target,
            &snapshot,
            ts("2020-01-01T11:00:00Z"),
            None,
            None,
            true,
        )
        .unwrap();

        assert_eq!(stats.n_insertions, 3);
        assert_eq!(stats.n_deactivations, 0);

        let (_, rows) = slice::get_table(&backend, &target, None, true).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| until_ts_of(r).is_none()));
    }

    #[test]
    fn idempotent_reapplication_writes_nothing() {
        let backend = SqliteBackend::open_memory().unwrap();
        let target = Identifier::parse("mtcars").unwrap();
        let logger = NullLogger;
        let snapshot = mtcars_snapshot(&[("Mazda RX4", 110)]);

        update_snapshot(
            &backend,
            &logger,
            &target,
            &snapshot,
            ts("2020-01-01T11:00:00Z"),
            None,
            None,
            true,
        )
        .unwrap();

        let stats = update_snapshot(
            &backend,
            &logger,
            &target,
            &snapshot,
            ts("2020-01-01T11:00:00Z"),
            None,
            None,
            true,
        )
        .unwrap();

        assert_eq!(stats.n_insertions, 0);
        assert_eq!(stats.n_deactivations, 0);
    }

    #[test]
    fn value_change_deactivates_old_row_and_inserts_new() {
        let backend = SqliteBackend::open_memory().unwrap();
        let target = Identifier::parse("mtcars").unwrap();
        let logger = NullLogger;

        update_snapshot(
            &backend,
            &logger,
            &target,
            &mtcars_snapshot(&[("Mazda RX4", 110)]),
            ts("2020-01-01T11:00:00Z"),
            None,
            None,
            true,
        )
        .unwrap();

        let stats = update_snapshot(
            &backend,
            &logger,
            &target,
            &mtcars_snapshot(&[("Mazda RX4", 55)]),
            ts("2020-01-03T10:00:00Z"),
            None,
            None,
            true,
        )
        .unwrap();

        assert_eq!(stats.n_insertions, 1);
        assert_eq!(stats.n_deactivations, 1);

        let (_, all_rows) = slice::get_table(&backend, &target, None, true).unwrap();
        assert_eq!(all_rows.len(), 2);
    }

    #[test]
    fn out_of_order_update_is_rejected_when_chronology_enforced() {
        let backend = SqliteBackend::open_memory().unwrap();
        let target = Identifier::parse("mtcars").unwrap();
        let logger = NullLogger;

        update_snapshot(
            &backend,
            &logger,
            &target,
            &mtcars_snapshot(&[("Mazda RX4", 110)]),
            ts("2020-01-02T00:00:00Z"),
            None,
            None,
            true,
        )
        .unwrap();

        let err = update_snapshot(
            &backend,
            &logger,
            &target,
            &mtcars_snapshot(&[("Mazda RX4", 110)]),
            ts("2020-01-01T00:00:00Z"),
            None,
            None,
            true,
        )
        .unwrap_err();

        assert!(matches!(err, ScdbError::OutOfOrder { .. }));

        // Lock was released despite the error.
        assert!(crate::lock::lock_table(&backend, &target, "main").unwrap());
    }

    #[test]
    fn empty_snapshot_deactivates_all_live_rows() {
        let backend = SqliteBackend::open_memory().unwrap();
        let target = Identifier::parse("mtcars").unwrap();
        let logger = NullLogger;

        update_snapshot(
            &backend,
            &logger,
            &target,
            &mtcars_snapshot(&[("Mazda RX4", 110), ("Datsun 710", 93)]),
            ts("2020-01-01T00:00:00Z"),
            None,
            None,
            true,
        )
        .unwrap();

        let empty = Snapshot::new(vec!["car".to_string(), "hp".to_string()], vec![]);
        let stats = update_snapshot(
            &backend,
            &logger,
            &target,
            &empty,
            ts("2020-02-01T00:00:00Z"),
            None,
            None,
            true,
        )
        .unwrap();

        assert_eq!(stats.n_deactivations, 2);
        assert_eq!(stats.n_insertions, 0);

        let live = slice::slice_time(&backend, &target, Some(ts("2020-02-02T00:00:00Z")), false).unwrap();
        assert!(live.is_empty());
    }
}
