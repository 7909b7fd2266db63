//! Historical-table detection, creation, and scoped staging tables (C3).

use crate::backend::{bookkeeping_columns, Backend, ColumnDef, ColumnType, CHECKSUM, FROM_TS, UNTIL_TS};
use crate::error::Result;
use crate::identifier::Identifier;
use crate::value::{self, Row, Value};
use std::sync::atomic::{AtomicU64, Ordering};

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// True iff `id` exists and carries the three bookkeeping columns.
///
/// # Errors
/// Propagates backend failures.
pub fn is_historical(backend: &dyn Backend, id: &Identifier) -> Result<bool> {
    let Some(columns) = backend.table_columns(id)? else {
        return Ok(false);
    };
    Ok(has_bookkeeping_columns(&columns))
}

fn has_bookkeeping_columns(columns: &[ColumnDef]) -> bool {
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    names.contains(&CHECKSUM) && names.contains(&FROM_TS) && names.contains(&UNTIL_TS)
}

/// The payload columns of a historical table: every declared column minus
/// the three bookkeeping ones, in declared order.
#[must_use]
pub fn payload_columns(columns: &[ColumnDef]) -> Vec<String> {
    columns
        .iter()
        .map(|c| c.name.clone())
        .filter(|n| n != CHECKSUM && n != FROM_TS && n != UNTIL_TS)
        .collect()
}

/// Create a historical table named `id` whose payload columns match
/// `sample_columns`, extended with the bookkeeping columns.
///
/// # Errors
/// Propagates backend failures.
pub fn create_table(
    backend: &dyn Backend,
    sample_columns: &[ColumnDef],
    id: &Identifier,
    temporary: bool,
) -> Result<()> {
    let mut columns = sample_columns.to_vec();
    columns.extend(bookkeeping_columns());
    backend.create_table(id, &columns, temporary)
}

/// Infer a plausible column declaration for each of `columns` by scanning
/// `rows` for the first non-null value: `Integer`/`Real`/`Blob`/`Timestamp`
/// values fix that column's type, `Text` or an all-null column default to
/// `Text`. A column is nullable iff at least one row has it absent or null.
#[must_use]
pub fn infer_column_defs(columns: &[String], rows: &[Row]) -> Vec<ColumnDef> {
    columns
        .iter()
        .map(|name| {
            let ty = rows
                .iter()
                .find_map(|row| value::get(row, name))
                .filter(|v| !matches!(v, Value::Null))
                .map(value_column_type)
                .unwrap_or(ColumnType::Text);
            let nullable = rows
                .iter()
                .any(|row| matches!(value::get(row, name), None | Some(Value::Null)));
            ColumnDef::new(name.clone(), ty, nullable)
        })
        .collect()
}

fn value_column_type(value: &Value) -> ColumnType {
    match value {
        Value::Null | Value::Text(_) => ColumnType::Text,
        Value::Integer(_) => ColumnType::Integer,
        Value::Real(_) => ColumnType::Real,
        Value::Blob(_) => ColumnType::Blob,
        Value::Timestamp(_) => ColumnType::Timestamp,
    }
}

/// Generate a staging table name unique to this process and call.
///
/// Names look like `__scdb_staging_{pid}_{counter}`, mirroring the
/// teacher's per-process temp-name convention.
#[must_use]
pub fn unique_staging_name(backend: &dyn Backend) -> Identifier {
    let counter = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    Identifier {
        catalog: None,
        schema: None,
        table: format!("__scdb_staging_{}_{counter}", backend.pid()),
    }
}

/// Scoped ownership of a staging table: drops the table on every exit path
/// (success, error, or panic unwind) via `Drop`. This realizes the
/// scoped-cleanup capability of §6 as a concrete RAII type rather than a
/// trait, since there is exactly one thing to clean up.
pub struct StagingGuard<'b> {
    backend: &'b dyn Backend,
    id: Identifier,
    active: bool,
}

impl<'b> StagingGuard<'b> {
    /// Create the staging table with `columns` and return a guard that
    /// drops it when this value goes out of scope.
    ///
    /// # Errors
    /// Propagates backend failures from table creation.
    pub fn create(backend: &'b dyn Backend, columns: &[ColumnDef]) -> Result<Self> {
        let id = unique_staging_name(backend);
        backend.create_table(&id, columns, true)?;
        Ok(Self {
            backend,
            id,
            active: true,
        })
    }

    #[must_use]
    pub fn id(&self) -> &Identifier {
        &self.id
    }

    /// Drop the staging table now instead of waiting for scope exit,
    /// surfacing any error instead of swallowing it in `Drop`.
    ///
    /// # Errors
    /// Propagates backend failures.
    pub fn finish(mut self) -> Result<()> {
        self.active = false;
        self.backend.drop_table_if_exists(&self.id)
    }
}

impl Drop for StagingGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            let _ = self.backend.drop_table_if_exists(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ColumnType;

    #[test]
    fn payload_columns_strips_bookkeeping() {
        let cols = vec![
            ColumnDef::new("car", ColumnType::Text, false),
            ColumnDef::new("hp", ColumnType::Integer, false),
            ColumnDef::new(CHECKSUM, ColumnType::Text, false),
            ColumnDef::new(FROM_TS, ColumnType::Timestamp, false),
            ColumnDef::new(UNTIL_TS, ColumnType::Timestamp, true),
        ];
        assert_eq!(payload_columns(&cols), vec!["car", "hp"]);
    }

    #[test]
    fn staging_names_are_unique_per_call() {
        struct Fake;
        impl Backend for Fake {
            fn default_schema(&self) -> Result<String> {
                unimplemented!()
            }
            fn quote_ident(&self, ident: &str) -> String {
                ident.to_string()
            }
            fn render_timestamp(&self, _ts: chrono::DateTime<chrono::Utc>) -> String {
                unimplemented!()
            }
            fn execute(&self, _sql: &str, _params: &[crate::value::Value]) -> Result<usize> {
                unimplemented!()
            }
            fn query(
                &self,
                _sql: &str,
                _params: &[crate::value::Value],
            ) -> Result<Vec<crate::value::Row>> {
                unimplemented!()
            }
            fn table_exists(&self, _id: &Identifier) -> Result<bool> {
                unimplemented!()
            }
            fn table_columns(&self, _id: &Identifier) -> Result<Option<Vec<ColumnDef>>> {
                unimplemented!()
            }
            fn create_table(
                &self,
                _id: &Identifier,
                _columns: &[ColumnDef],
                _temporary: bool,
            ) -> Result<()> {
                unimplemented!()
            }
            fn drop_table_if_exists(&self, _id: &Identifier) -> Result<()> {
                unimplemented!()
            }
            fn insert_rows(
                &self,
                _id: &Identifier,
                _columns: &[String],
                _rows: &[crate::value::Row],
            ) -> Result<()> {
                unimplemented!()
            }
            fn pid(&self) -> u32 {
                4242
            }
            fn process_alive(&self, _pid: u32) -> bool {
                true
            }
            fn owner_name(&self) -> String {
                "fake".to_string()
            }
            fn ensure_locks_table(&self, _schema: &str) -> Result<()> {
                unimplemented!()
            }
            fn locks_table_exists(&self, _schema: &str) -> Result<bool> {
                unimplemented!()
            }
            fn insert_lock_if_absent(
                &self,
                _schema: &str,
                _table: &str,
                _user: &str,
                _pid: u32,
            ) -> Result<bool> {
                unimplemented!()
            }
            fn read_lock_owner(
                &self,
                _schema: &str,
                _table: &str,
            ) -> Result<Option<crate::backend::LockOwner>> {
                unimplemented!()
            }
            fn delete_lock(&self, _schema: &str, _table: &str, _pid: u32) -> Result<()> {
                unimplemented!()
            }
        }

        let backend = Fake;
        let a = unique_staging_name(&backend);
        let b = unique_staging_name(&backend);
        assert_ne!(a.table, b.table);
    }
}
