//! Explicit configuration object threaded into the facade (§9 design notes:
//! "global configuration → explicit config object").

use crate::identifier::Identifier;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Options recognized by [`crate::Scdb`] (§6's Configuration table). Plain
/// data — this crate never reads it from disk or the environment itself;
/// an embedding application owns loading it, the way it owns its own
/// configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScdbConfig {
    /// Identifier of the log sink table, if structured DB logging is wanted.
    pub log_table_id: Option<Identifier>,
    /// Filesystem directory for file-based logs.
    pub log_path: Option<PathBuf>,
    /// Override default schema resolution (otherwise the backend decides).
    pub default_schema: Option<String>,
    /// Per-call default for chronological-order enforcement.
    #[serde(default = "default_enforce_chronological_order")]
    pub enforce_chronological_order: bool,
}

fn default_enforce_chronological_order() -> bool {
    true
}

impl Default for ScdbConfig {
    fn default() -> Self {
        Self {
            log_table_id: None,
            log_path: None,
            default_schema: None,
            enforce_chronological_order: true,
        }
    }
}

impl ScdbConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_log_table(mut self, log_table_id: Identifier) -> Self {
        self.log_table_id = Some(log_table_id);
        self
    }

    #[must_use]
    pub fn with_log_path(mut self, log_path: PathBuf) -> Self {
        self.log_path = Some(log_path);
        self
    }

    #[must_use]
    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = Some(schema.into());
        self
    }

    #[must_use]
    pub fn with_enforce_chronological_order(mut self, enforce: bool) -> Self {
        self.enforce_chronological_order = enforce;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_enforces_chronological_order() {
        assert!(ScdbConfig::default().enforce_chronological_order);
    }

    #[test]
    fn builder_methods_chain() {
        let config = ScdbConfig::new()
            .with_default_schema("public")
            .with_enforce_chronological_order(false);
        assert_eq!(config.default_schema.as_deref(), Some("public"));
        assert!(!config.enforce_chronological_order);
    }
}
