//! The connection capability the core consumes (§6).
//!
//! The reconciler never talks to a concrete database directly; it composes
//! against this trait, the way the teacher's storage layer composes against
//! a single `rusqlite::Connection` but behind an interface boundary so a
//! non-SQLite implementation is a drop-in replacement.

use crate::error::Result;
use crate::identifier::Identifier;
use crate::value::{Row, Value};
use chrono::{DateTime, Utc};

/// A column's declared SQL type, backend-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
    Timestamp,
}

/// A column name plus its declared type and nullability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable,
        }
    }
}

/// The three mandatory bookkeeping columns appended to every historical
/// table (§3).
#[must_use]
pub fn bookkeeping_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("checksum", ColumnType::Text, false),
        ColumnDef::new("from_ts", ColumnType::Timestamp, false),
        ColumnDef::new("until_ts", ColumnType::Timestamp, true),
    ]
}

pub const CHECKSUM: &str = "checksum";
pub const FROM_TS: &str = "from_ts";
pub const UNTIL_TS: &str = "until_ts";

/// The capability set the reconciliation core requires of a connection
/// (§6): statement execution, parameterized queries, schema introspection,
/// table creation, and the two OS-level facts (process id, liveness) the
/// lock manager needs.
pub trait Backend {
    /// The schema used when an `Identifier` doesn't name one, per C1.
    ///
    /// # Errors
    /// Returns `SchemaUnresolved` if this backend has no resolvable default.
    fn default_schema(&self) -> Result<String>;

    /// Render `ident` using this backend's quoting rules.
    fn quote_ident(&self, ident: &str) -> String;

    /// Render a qualified `Identifier` as `schema.table` (or
    /// `catalog.schema.table`), quoted.
    fn quote_identifier(&self, id: &Identifier) -> String {
        let mut parts = Vec::new();
        if let Some(c) = &id.catalog {
            parts.push(self.quote_ident(c));
        }
        if let Some(s) = &id.schema {
            parts.push(self.quote_ident(s));
        }
        parts.push(self.quote_ident(&id.table));
        parts.join(".")
    }

    /// Render a timestamp as a backend-appropriate literal value, for
    /// embedding in hand-built SQL (index predicates, etc).
    fn render_timestamp(&self, ts: DateTime<Utc>) -> String;

    /// Execute a statement with no result rows, returning the affected
    /// row count.
    ///
    /// # Errors
    /// Returns `Backend` on any underlying failure.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize>;

    /// Run a parameterized query and materialize every row.
    ///
    /// # Errors
    /// Returns `Backend` on any underlying failure.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Whether `id` exists as a table at all (historical or not).
    ///
    /// # Errors
    /// Returns `Backend` on any underlying failure.
    fn table_exists(&self, id: &Identifier) -> Result<bool>;

    /// Declared columns of `id`, or `None` if the table does not exist.
    ///
    /// # Errors
    /// Returns `Backend` on any underlying failure.
    fn table_columns(&self, id: &Identifier) -> Result<Option<Vec<ColumnDef>>>;

    /// Create a table with exactly `columns`, optionally as a temporary
    /// (session-scoped) table.
    ///
    /// # Errors
    /// Returns `Backend` on any underlying failure.
    fn create_table(&self, id: &Identifier, columns: &[ColumnDef], temporary: bool)
        -> Result<()>;

    /// Drop `id` if it exists; a no-op otherwise.
    ///
    /// # Errors
    /// Returns `Backend` on any underlying failure.
    fn drop_table_if_exists(&self, id: &Identifier) -> Result<()>;

    /// Append `rows` (each carrying exactly `columns`, in order) to `id`.
    ///
    /// # Errors
    /// Returns `Backend` on any underlying failure.
    fn insert_rows(&self, id: &Identifier, columns: &[String], rows: &[Row]) -> Result<()>;

    /// The current process's OS pid.
    fn pid(&self) -> u32;

    /// Whether a process with the given pid is currently alive on this
    /// host (the process-liveness capability of §6).
    fn process_alive(&self, pid: u32) -> bool;

    /// A stable identifier for "this process + host" to record as the lock
    /// owner's `user` field (hostname is a reasonable default).
    fn owner_name(&self) -> String;

    /// Ensure the `locks` table exists in `schema`, with primary key
    /// `(schema, table)` (§3). Generic `create_table` doesn't model primary
    /// keys, so the fixed-shape lock table gets its own bootstrap method.
    ///
    /// # Errors
    /// Returns `Backend` on any underlying failure.
    fn ensure_locks_table(&self, schema: &str) -> Result<()>;

    /// Whether the `locks` table exists in `schema` at all.
    ///
    /// # Errors
    /// Returns `Backend` on any underlying failure.
    fn locks_table_exists(&self, schema: &str) -> Result<bool>;

    /// Attempt to insert a lock row for `(schema, table)`. Returns `true` if
    /// this call inserted the row, `false` if a row already existed (the
    /// expected race outcome, not an error — see Open Question (a)).
    ///
    /// # Errors
    /// Returns `Backend` for any failure other than the primary-key
    /// collision that indicates the row already exists.
    fn insert_lock_if_absent(&self, schema: &str, table: &str, user: &str, pid: u32)
        -> Result<bool>;

    /// Read the current owner of `(schema, table)`, if a lock row exists.
    ///
    /// # Errors
    /// Returns `Backend` on any underlying failure.
    fn read_lock_owner(&self, schema: &str, table: &str) -> Result<Option<LockOwner>>;

    /// Delete the lock row for `(schema, table)` owned by `pid`. A no-op if
    /// no such row exists.
    ///
    /// # Errors
    /// Returns `Backend` on any underlying failure.
    fn delete_lock(&self, schema: &str, table: &str, pid: u32) -> Result<()>;
}

/// The current holder of a lock row.
#[derive(Debug, Clone, PartialEq)]
pub struct LockOwner {
    pub user: String,
    pub pid: u32,
    pub lock_start: DateTime<Utc>,
}
