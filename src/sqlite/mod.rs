//! `SQLite` reference backend (C12).
//!
//! This is a concrete `Backend` implementation over `rusqlite`, used by the
//! crate's own test suite and available to consumers who want a zero-setup
//! embedded target. It is not itself part of the core's public contract —
//! the core only ever depends on the `Backend` trait.

mod backend;
mod schema;

pub use backend::SqliteBackend;
