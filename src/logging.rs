//! Tracing subscriber setup for binaries/tests that embed this crate.
//!
//! Library code never calls this implicitly — a consumer with its own
//! subscriber just gets the spans and events this crate emits for free.

use std::io::IsTerminal;
use std::sync::Once;

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize a global `tracing` subscriber honoring `RUST_LOG` if set,
/// otherwise falling back to a verbosity-derived filter scoped to `scdb`.
///
/// # Errors
/// Returns an error if a global subscriber is already installed or the
/// filter directive is malformed.
pub fn init_tracing(verbosity: u8) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter(verbosity)))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

fn default_filter(verbosity: u8) -> String {
    match verbosity {
        0 => "scdb=info".to_string(),
        1 => "scdb=debug".to_string(),
        2 => "scdb=debug,rusqlite=debug".to_string(),
        _ => "scdb=trace".to_string(),
    }
}

/// Initialize a subscriber bound to the test harness's writer, once per
/// process.
pub fn init_test_logging() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("scdb=debug,test=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}
