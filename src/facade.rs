//! Public entry point orchestrating C3–C9 around a single backend (C10).

use crate::backend::{Backend, ColumnDef};
use crate::config::ScdbConfig;
use crate::delta::{self, Delta};
use crate::error::Result;
use crate::identifier::Identifier;
use crate::interlace::{self, InterlaceSource};
use crate::lock;
use crate::logger::{Logger, NullLogger};
use crate::reconcile::{self, FilterKeys, UpdateStats};
use crate::slice;
use crate::table_meta;
use crate::value::{Row, Snapshot};
use chrono::{DateTime, Utc};

/// The library's facade: a backend plus the logger and configuration used
/// across calls. Consumers construct one per connection and call its
/// methods instead of reaching for the individual component modules
/// directly.
pub struct Scdb<B: Backend> {
    backend: B,
    logger: Box<dyn Logger>,
    config: ScdbConfig,
}

impl<B: Backend> Scdb<B> {
    /// Wrap `backend` with default configuration and a [`NullLogger`].
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            logger: Box::new(NullLogger),
            config: ScdbConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ScdbConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Box<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Parse and resolve `input` against this instance's backend (and
    /// configured default schema, when one is set).
    ///
    /// # Errors
    /// `InvalidIdentifier` if `input` is malformed, `SchemaUnresolved` if no
    /// schema can be resolved.
    pub fn id(&self, input: &str) -> Result<Identifier> {
        let parsed = Identifier::parse(input)?;
        if parsed.schema_name().is_some() {
            return Ok(parsed);
        }
        if let Some(schema) = &self.config.default_schema {
            return Ok(Identifier {
                schema: Some(schema.clone()),
                ..parsed
            });
        }
        parsed.resolve(&self.backend)
    }

    /// See [`reconcile::update_snapshot`].
    ///
    /// # Errors
    /// See [`reconcile::update_snapshot`].
    #[allow(clippy::too_many_arguments)]
    pub fn update_snapshot(
        &self,
        target: &Identifier,
        snapshot: &Snapshot,
        t: DateTime<Utc>,
        filters: Option<&FilterKeys>,
        message: Option<&str>,
        enforce_chronological_order: Option<bool>,
    ) -> Result<UpdateStats> {
        reconcile::update_snapshot(
            &self.backend,
            self.logger.as_ref(),
            target,
            snapshot,
            t,
            filters,
            message,
            enforce_chronological_order.unwrap_or(self.config.enforce_chronological_order),
        )
    }

    /// Returns the live rows of `target` at `slice_ts` (full history if
    /// `None`), plus its declared payload columns.
    ///
    /// # Errors
    /// See [`slice::get_table`].
    pub fn get_table(
        &self,
        target: &Identifier,
        slice_ts: Option<DateTime<Utc>>,
        include_slice_info: bool,
    ) -> Result<(Vec<String>, Vec<Row>)> {
        slice::get_table(&self.backend, target, slice_ts, include_slice_info)
    }

    /// See [`interlace::interlace`].
    ///
    /// # Errors
    /// See [`interlace::interlace`].
    pub fn interlace(
        &self,
        sources: &[InterlaceSource<'_>],
        by: &[String],
    ) -> Result<Vec<Row>> {
        interlace::interlace(&self.backend, sources, by)
    }

    /// See [`delta::delta_export`].
    ///
    /// # Errors
    /// See [`delta::delta_export`].
    pub fn delta_export(
        &self,
        target: &Identifier,
        from_ts: DateTime<Utc>,
        until_ts: Option<DateTime<Utc>>,
    ) -> Result<Delta> {
        delta::delta_export(&self.backend, target, from_ts, until_ts)
    }

    /// See [`delta::delta_load`].
    ///
    /// # Errors
    /// See [`delta::delta_load`].
    pub fn delta_load(&self, target: &Identifier, deltas: &[Delta]) -> Result<usize> {
        delta::delta_load(&self.backend, target, deltas)
    }

    /// Acquire the exclusive write lock on `target`.
    ///
    /// # Errors
    /// See [`lock::lock_table`].
    pub fn lock_table(&self, target: &Identifier, schema: Option<&str>) -> Result<bool> {
        let schema = self.resolve_schema(target, schema)?;
        lock::lock_table(&self.backend, target, &schema)
    }

    /// Release the lock on `target` held by `pid` (defaults to this
    /// process).
    ///
    /// # Errors
    /// See [`lock::unlock_table`].
    pub fn unlock_table(
        &self,
        target: &Identifier,
        schema: Option<&str>,
        pid: Option<u32>,
    ) -> Result<()> {
        let schema = self.resolve_schema(target, schema)?;
        lock::unlock_table(&self.backend, target, &schema, pid)
    }

    /// Create a historical table named `id` with `sample_columns` extended
    /// by the bookkeeping columns.
    ///
    /// # Errors
    /// See [`table_meta::create_table`].
    pub fn create_table(
        &self,
        sample_columns: &[ColumnDef],
        id: &Identifier,
        temporary: bool,
    ) -> Result<()> {
        table_meta::create_table(&self.backend, sample_columns, id, temporary)
    }

    fn resolve_schema(&self, target: &Identifier, schema: Option<&str>) -> Result<String> {
        if let Some(schema) = schema.map(ToString::to_string).or_else(|| target.schema_name().map(ToString::to_string)) {
            return Ok(schema);
        }
        if let Some(schema) = &self.config.default_schema {
            return Ok(schema.clone());
        }
        self.backend.default_schema()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteBackend;
    use crate::value::Value;

    #[test]
    fn facade_round_trips_update_and_slice() {
        let scdb = Scdb::new(SqliteBackend::open_memory().unwrap());
        let target = scdb.id("mtcars").unwrap();
        let snapshot = Snapshot::new(
            vec!["car".to_string(), "hp".to_string()],
            vec![vec![
                ("car".to_string(), Value::Text("Mazda RX4".to_string())),
                ("hp".to_string(), Value::Integer(110)),
            ]],
        );

        scdb.update_snapshot(
            &target,
            &snapshot,
            "2020-01-01T00:00:00Z".parse().unwrap(),
            None,
            None,
            None,
        )
        .unwrap();

        let (columns, rows) = scdb.get_table(&target, None, false).unwrap();
        assert_eq!(columns, vec!["car", "hp"]);
        assert_eq!(rows.len(), 1);
    }
}
