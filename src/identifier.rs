//! Identifier parsing and dialect-correct rendering (C1).

use crate::backend::Backend;
use crate::error::{Result, ScdbError};
use serde::{Deserialize, Serialize};

/// A fully or partially qualified `catalog.schema.table` reference.
///
/// Two identifiers are equal iff their normalized `(catalog, schema, table)`
/// triples are equal; normalization (case-folding, etc.) is a property of
/// the backend, so equality here compares whatever `resolve` already
/// normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub table: String,
}

impl Identifier {
    /// Parse a bare `table`, `schema.table`, or `catalog.schema.table` string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier` if `input` is empty, has more than three
    /// dot-separated parts, or any part is empty.
    pub fn parse(input: &str) -> Result<Self> {
        let parts: Vec<&str> = input.split('.').collect();
        if parts.is_empty() || parts.iter().any(|p| p.trim().is_empty()) {
            return Err(ScdbError::InvalidIdentifier {
                input: input.to_string(),
                reason: "parts must be non-empty".to_string(),
            });
        }

        match parts.as_slice() {
            [table] => Ok(Self {
                catalog: None,
                schema: None,
                table: (*table).to_string(),
            }),
            [schema, table] => Ok(Self {
                catalog: None,
                schema: Some((*schema).to_string()),
                table: (*table).to_string(),
            }),
            [catalog, schema, table] => Ok(Self {
                catalog: Some((*catalog).to_string()),
                schema: Some((*schema).to_string()),
                table: (*table).to_string(),
            }),
            _ => Err(ScdbError::InvalidIdentifier {
                input: input.to_string(),
                reason: "expected `table`, `schema.table`, or `catalog.schema.table`".to_string(),
            }),
        }
    }

    /// Resolve a missing schema against the backend's default, leaving the
    /// table and catalog untouched.
    ///
    /// # Errors
    ///
    /// Propagates `SchemaUnresolved` from the backend when no schema was
    /// given and none can be resolved.
    pub fn resolve(self, backend: &dyn Backend) -> Result<Self> {
        if self.schema.is_some() {
            return Ok(self);
        }
        let schema = backend.default_schema()?;
        Ok(Self {
            schema: Some(schema),
            ..self
        })
    }

    #[must_use]
    pub fn schema_name(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(c) = &self.catalog {
            parts.push(c.as_str());
        }
        if let Some(s) = &self.schema {
            parts.push(s.as_str());
        }
        parts.push(&self.table);
        write!(f, "{}", parts.join("."))
    }
}
