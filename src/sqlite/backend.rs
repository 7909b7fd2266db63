//! `SQLite`-backed implementation of `Backend` (C12).

use super::schema::{sqlite_type_name, LOCKS_TABLE_SQL};
use crate::backend::{Backend, ColumnDef, ColumnType, LockOwner};
use crate::error::{BackendError, Result, ScdbError};
use crate::identifier::Identifier;
use crate::value::{Row, Value};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// A `Backend` over a single `rusqlite::Connection`. Interior mutability via
/// `Mutex` lets `Backend`'s methods take `&self`, matching the trait's
/// shared-reference contract; this backend is meant for single-process,
/// single-connection use (the crate's lock protocol is what serializes
/// *cross-process* access, per §5).
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) a database file at `path`.
    ///
    /// # Errors
    /// Returns `Backend` if the connection cannot be established.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(BackendError::from)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database, primarily for tests.
    ///
    /// # Errors
    /// Returns `Backend` if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(BackendError::from)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(BackendError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn to_sql_value(value: &Value) -> rusqlite::types::Value {
        match value {
            Value::Null => rusqlite::types::Value::Null,
            Value::Integer(i) => rusqlite::types::Value::Integer(*i),
            Value::Real(r) => rusqlite::types::Value::Real(*r),
            Value::Text(s) => rusqlite::types::Value::Text(s.clone()),
            Value::Blob(b) => rusqlite::types::Value::Blob(b.clone()),
            Value::Timestamp(t) => rusqlite::types::Value::Text(t.to_rfc3339()),
        }
    }

    fn from_value_ref(v: ValueRef<'_>) -> Value {
        match v {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }

    /// Reinterpret a `Text` value as a timestamp when the caller knows the
    /// column is bookkeeping `from_ts`/`until_ts` (SQLite has no native
    /// timestamp type, so these round-trip as RFC 3339 strings).
    #[must_use]
    pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
        match value {
            Value::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    fn table_name_qualified(id: &Identifier) -> String {
        // SQLite has no catalog/multi-schema concept for our purposes; the
        // schema component is tracked as bookkeeping metadata (e.g. in the
        // `locks` table) rather than a real ATTACHed database.
        id.table.clone()
    }
}

impl Backend for SqliteBackend {
    fn default_schema(&self) -> Result<String> {
        Ok("main".to_string())
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn render_timestamp(&self, ts: DateTime<Utc>) -> String {
        format!("'{}'", ts.to_rfc3339())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let values: Vec<rusqlite::types::Value> = params.iter().map(Self::to_sql_value).collect();
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
        conn.execute(sql, params_refs.as_slice())
            .map_err(|e| ScdbError::Backend(BackendError::from(e)))
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut stmt = conn.prepare(sql).map_err(BackendError::from)?;
        let column_names: Vec<String> =
            stmt.column_names().iter().map(ToString::to_string).collect();

        let values: Vec<rusqlite::types::Value> = params.iter().map(Self::to_sql_value).collect();
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();

        let rows = stmt
            .query_map(params_refs.as_slice(), |row| {
                let mut out: Row = Vec::with_capacity(column_names.len());
                for (i, name) in column_names.iter().enumerate() {
                    let value_ref = row.get_ref(i)?;
                    out.push((name.clone(), Self::from_value_ref(value_ref)));
                }
                Ok(out)
            })
            .map_err(BackendError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(BackendError::from)?;

        Ok(rows)
    }

    fn table_exists(&self, id: &Identifier) -> Result<bool> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let exists = conn
            .prepare("SELECT 1 FROM sqlite_master WHERE type IN ('table') AND name = ?")
            .and_then(|mut stmt| stmt.exists([Self::table_name_qualified(id)]))
            .map_err(BackendError::from)?;
        Ok(exists)
    }

    fn table_columns(&self, id: &Identifier) -> Result<Option<Vec<ColumnDef>>> {
        if !self.table_exists(id)? {
            return Ok(None);
        }
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let table = Self::table_name_qualified(id);
        let sql = format!("SELECT name, type, \"notnull\" FROM pragma_table_info('{table}')");
        let mut stmt = conn.prepare(&sql).map_err(BackendError::from)?;
        let columns = stmt
            .query_map([], |row| {
                let name: String = row.get(0)?;
                let decl_type: String = row.get(1)?;
                let notnull: i64 = row.get(2)?;
                Ok((name, decl_type, notnull))
            })
            .map_err(BackendError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(BackendError::from)?
            .into_iter()
            .map(|(name, decl_type, notnull)| ColumnDef {
                name,
                ty: decl_type_to_column_type(&decl_type),
                nullable: notnull == 0,
            })
            .collect();
        Ok(Some(columns))
    }

    fn create_table(
        &self,
        id: &Identifier,
        columns: &[ColumnDef],
        temporary: bool,
    ) -> Result<()> {
        let table = Self::table_name_qualified(id);
        let column_defs: Vec<String> = columns
            .iter()
            .map(|c| {
                let ty = sqlite_type_name(c.ty);
                let nullability = if c.nullable { "" } else { " NOT NULL" };
                format!("{} {ty}{nullability}", self.quote_ident(&c.name))
            })
            .collect();
        let temp_kw = if temporary { "TEMP " } else { "" };
        let sql = format!(
            "CREATE {temp_kw}TABLE IF NOT EXISTS {} ({})",
            self.quote_ident(&table),
            column_defs.join(", ")
        );
        self.execute(&sql, &[]).map(|_| ())
    }

    fn drop_table_if_exists(&self, id: &Identifier) -> Result<()> {
        let table = Self::table_name_qualified(id);
        let sql = format!("DROP TABLE IF EXISTS {}", self.quote_ident(&table));
        self.execute(&sql, &[]).map(|_| ())
    }

    fn insert_rows(&self, id: &Identifier, columns: &[String], rows: &[Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let table = Self::table_name_qualified(id);
        let column_list = columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({column_list}) VALUES ({placeholders})",
            self.quote_ident(&table)
        );

        let mut conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let tx = conn.transaction().map_err(BackendError::from)?;
        {
            let mut stmt = tx.prepare(&sql).map_err(BackendError::from)?;
            for row in rows {
                let values: Vec<rusqlite::types::Value> = columns
                    .iter()
                    .map(|col| {
                        crate::value::get(row, col)
                            .map_or(rusqlite::types::Value::Null, Self::to_sql_value)
                    })
                    .collect();
                let params_refs: Vec<&dyn rusqlite::ToSql> =
                    values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
                stmt.execute(params_refs.as_slice())
                    .map_err(BackendError::from)?;
            }
        }
        tx.commit().map_err(BackendError::from)?;
        Ok(())
    }

    fn pid(&self) -> u32 {
        std::process::id()
    }

    fn process_alive(&self, pid: u32) -> bool {
        crate::process::is_alive(pid)
    }

    fn owner_name(&self) -> String {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string())
    }

    fn ensure_locks_table(&self, _schema: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        conn.execute_batch(LOCKS_TABLE_SQL)
            .map_err(|e| ScdbError::Backend(BackendError::from(e)))
    }

    fn locks_table_exists(&self, _schema: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'locks'")
            .and_then(|mut stmt| stmt.exists([]))
            .map_err(|e| ScdbError::Backend(BackendError::from(e)))
    }

    fn insert_lock_if_absent(
        &self,
        schema: &str,
        table: &str,
        user: &str,
        pid: u32,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let lock_start = Utc::now().timestamp() as f64;
        let result = conn.execute(
            "INSERT INTO locks (schema, \"table\", user, pid, lock_start) VALUES (?, ?, ?, ?, ?)",
            rusqlite::params![schema, table, user, pid, lock_start],
        );

        match result {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                // Row already present: the expected race outcome, not a
                // failure (Open Question (a)).
                Ok(false)
            }
            Err(other) => Err(ScdbError::Backend(BackendError::from(other))),
        }
    }

    fn read_lock_owner(&self, schema: &str, table: &str) -> Result<Option<LockOwner>> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        conn.query_row(
            "SELECT user, pid, lock_start FROM locks WHERE schema = ? AND \"table\" = ?",
            rusqlite::params![schema, table],
            |row| {
                let user: String = row.get(0)?;
                let pid: i64 = row.get(1)?;
                let lock_start: f64 = row.get(2)?;
                Ok(LockOwner {
                    user,
                    pid: pid as u32,
                    lock_start: Utc.timestamp_opt(lock_start as i64, 0).single().unwrap_or_else(Utc::now),
                })
            },
        )
        .optional()
        .map_err(|e| ScdbError::Backend(BackendError::from(e)))
    }

    fn delete_lock(&self, schema: &str, table: &str, pid: u32) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        conn.execute(
            "DELETE FROM locks WHERE schema = ? AND \"table\" = ? AND pid = ?",
            rusqlite::params![schema, table, pid],
        )
        .map_err(|e| ScdbError::Backend(BackendError::from(e)))?;
        Ok(())
    }
}

fn decl_type_to_column_type(decl_type: &str) -> ColumnType {
    match decl_type.to_ascii_uppercase().as_str() {
        "INTEGER" => ColumnType::Integer,
        "REAL" => ColumnType::Real,
        "BLOB" => ColumnType::Blob,
        _ => ColumnType::Text,
    }
}
