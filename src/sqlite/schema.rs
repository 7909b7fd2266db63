//! DDL for the fixed-shape bookkeeping tables (`locks`), and the column
//! type mapping between `ColumnType` and `SQLite`'s storage classes.

use crate::backend::ColumnType;

/// The `locks` table schema (§3, §6 persisted state layout).
pub const LOCKS_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS locks (
        schema TEXT NOT NULL,
        "table" TEXT NOT NULL,
        user TEXT NOT NULL,
        pid INTEGER NOT NULL,
        lock_start REAL NOT NULL,
        PRIMARY KEY (schema, "table")
    )
"#;

#[must_use]
pub fn sqlite_type_name(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Integer => "INTEGER",
        ColumnType::Real => "REAL",
        ColumnType::Text => "TEXT",
        ColumnType::Blob => "BLOB",
        // Stored as RFC 3339 text, consistent with how `rusqlite` round-trips
        // `chrono::DateTime<Utc>`.
        ColumnType::Timestamp => "TEXT",
    }
}
