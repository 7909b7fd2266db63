//! Append-only logging sink for reconciliation outcomes (C9).

use crate::backend::{Backend, ColumnDef, ColumnType};
use crate::error::Result;
use crate::identifier::Identifier;
use crate::value::{Row, Value};
use chrono::{DateTime, Utc};

/// One entry describing a completed (or failed) `update_snapshot` call.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub target: String,
    pub message: String,
    pub n_insertions: usize,
    pub n_deactivations: usize,
    pub n_redundant: usize,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// The logging capability the reconciler consumes (§6). `log_error` is a
/// terminating channel: callers that implement it for real still see the
/// error returned to them, but the sink gets first refusal at recording it.
pub trait Logger {
    fn log_info(&self, message: &str);
    fn log_error(&self, message: &str);

    /// Append `record` to a caller-configured log table. Implementations
    /// with no such table configured are a no-op.
    ///
    /// # Errors
    /// Returns `Backend` if the log table exists but the write fails.
    fn log_to_db(&self, backend: &dyn Backend, record: &LogRecord) -> Result<()>;

    /// Flush / close out the current entry. Most implementations have
    /// nothing to do here; it exists for sinks that batch writes.
    fn finalize_entry(&self);
}

/// The required null implementation (§6).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log_info(&self, _message: &str) {}
    fn log_error(&self, _message: &str) {}
    fn log_to_db(&self, _backend: &dyn Backend, _record: &LogRecord) -> Result<()> {
        Ok(())
    }
    fn finalize_entry(&self) {}
}

/// Emits `tracing` events for every call, and optionally appends to a
/// caller-named log table.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger {
    log_table: Option<Identifier>,
}

impl TracingLogger {
    #[must_use]
    pub fn new() -> Self {
        Self { log_table: None }
    }

    #[must_use]
    pub fn with_log_table(log_table: Identifier) -> Self {
        Self {
            log_table: Some(log_table),
        }
    }
}

impl Logger for TracingLogger {
    fn log_info(&self, message: &str) {
        tracing::info!(target: "scdb", "{message}");
    }

    fn log_error(&self, message: &str) {
        tracing::error!(target: "scdb", "{message}");
    }

    fn log_to_db(&self, backend: &dyn Backend, record: &LogRecord) -> Result<()> {
        let Some(log_table) = &self.log_table else {
            return Ok(());
        };

        if backend.table_columns(log_table)?.is_none() {
            let columns = vec![
                ColumnDef::new("target", ColumnType::Text, false),
                ColumnDef::new("message", ColumnType::Text, true),
                ColumnDef::new("n_insertions", ColumnType::Integer, false),
                ColumnDef::new("n_deactivations", ColumnType::Integer, false),
                ColumnDef::new("n_redundant", ColumnType::Integer, false),
                ColumnDef::new("success", ColumnType::Integer, false),
                ColumnDef::new("started_at", ColumnType::Timestamp, false),
                ColumnDef::new("finished_at", ColumnType::Timestamp, false),
            ];
            backend.create_table(log_table, &columns, false)?;
        }

        let row: Row = vec![
            ("target".to_string(), Value::Text(record.target.clone())),
            ("message".to_string(), Value::Text(record.message.clone())),
            (
                "n_insertions".to_string(),
                Value::Integer(record.n_insertions as i64),
            ),
            (
                "n_deactivations".to_string(),
                Value::Integer(record.n_deactivations as i64),
            ),
            (
                "n_redundant".to_string(),
                Value::Integer(record.n_redundant as i64),
            ),
            (
                "success".to_string(),
                Value::Integer(i64::from(record.success)),
            ),
            ("started_at".to_string(), Value::Timestamp(record.started_at)),
            (
                "finished_at".to_string(),
                Value::Timestamp(record.finished_at),
            ),
        ];
        let columns: Vec<String> = row.iter().map(|(name, _)| name.clone()).collect();
        backend.insert_rows(log_table, &columns, &[row])
    }

    fn finalize_entry(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteBackend;

    #[test]
    fn tracing_logger_appends_to_configured_table() {
        let backend = SqliteBackend::open_memory().unwrap();
        let log_table = Identifier::parse("scdb_log").unwrap();
        let logger = TracingLogger::with_log_table(log_table.clone());

        let record = LogRecord {
            target: "mtcars".to_string(),
            message: "ok".to_string(),
            n_insertions: 3,
            n_deactivations: 0,
            n_redundant: 0,
            success: true,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        logger.log_to_db(&backend, &record).unwrap();

        let rows = backend
            .query(&format!("SELECT * FROM {}", backend.quote_identifier(&log_table)), &[])
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn null_logger_never_writes() {
        let backend = SqliteBackend::open_memory().unwrap();
        let logger = NullLogger;
        let record = LogRecord {
            target: "mtcars".to_string(),
            message: String::new(),
            n_insertions: 0,
            n_deactivations: 0,
            n_redundant: 0,
            success: true,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        logger.log_to_db(&backend, &record).unwrap();
    }
}
