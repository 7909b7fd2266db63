//! Error types for the reconciliation core.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ScdbError>;

/// Errors surfaced by the public facade and the individual components.
///
/// Every kind is distinct so callers can match on variants rather than
/// parsing messages.
#[derive(Debug, Error)]
pub enum ScdbError {
    /// A `catalog.schema.table` string could not be parsed.
    #[error("invalid identifier `{input}`: {reason}")]
    InvalidIdentifier { input: String, reason: String },

    /// No default schema could be resolved for the current backend/connection.
    #[error("no default schema could be resolved for this connection")]
    SchemaUnresolved,

    /// Another live process currently holds the lock.
    #[error("lock on {schema}.{table} is held by another live process")]
    LockBusy { schema: String, table: String },

    /// The lock owner's process is dead; requires manual cleanup.
    #[error(
        "stale lock on {schema}.{table} held by {user} (pid {pid}); the owning process is dead and the lock row must be removed manually"
    )]
    StaleLock {
        schema: String,
        table: String,
        user: String,
        pid: u32,
    },

    /// The snapshot's columns don't match the target's payload columns.
    #[error("schema mismatch: target has columns {expected:?}, snapshot has {found:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// The target table exists but lacks the bookkeeping columns.
    #[error("{table} exists but is not a historical table (missing checksum/from_ts/until_ts)")]
    NotHistorical { table: String },

    /// `enforce_chronological_order` rejected an out-of-order update.
    #[error(
        "update at {requested} is older than the most recent recorded from_ts {max_existing}"
    )]
    OutOfOrder {
        requested: String,
        max_existing: String,
    },

    /// The underlying backend reported a failure.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors originating from a `Backend` implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    /// A `rusqlite` failure, for the bundled reference backend.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A failure from a non-SQLite backend implementation.
    #[error("backend error: {0}")]
    Other(String),
}
