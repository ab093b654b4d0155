//! Catalog backed by the entity descriptions embedded in the config file.

use async_trait::async_trait;

use crate::core::{Catalog, ConstraintDef, ConstraintKind, EntityDescription, IndexDef, TableRef};
use crate::error::{LoadError, Result};

/// Read-only catalog over `entities:`, for rendering and validating offline.
///
/// Reports no indexes or constraints and refuses DDL.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedCatalog<'a> {
    entities: &'a [EntityDescription],
}

impl<'a> EmbeddedCatalog<'a> {
    pub fn new(entities: &'a [EntityDescription]) -> Self {
        Self { entities }
    }

    /// True when every table is described.
    pub fn covers(&self, tables: &[TableRef]) -> bool {
        tables
            .iter()
            .all(|t| self.entities.iter().any(|e| &e.table == t))
    }
}

#[async_trait]
impl Catalog for EmbeddedCatalog<'_> {
    async fn describe_entity(&self, table: &TableRef) -> Result<EntityDescription> {
        self.entities
            .iter()
            .find(|e| &e.table == table)
            .cloned()
            .ok_or_else(|| {
                LoadError::Config(format!(
                    "table {} is not described in the config file's entities section",
                    table
                ))
            })
    }

    async fn list_indexes(&self, _table: &TableRef) -> Result<Vec<IndexDef>> {
        Ok(Vec::new())
    }

    async fn list_constraints(
        &self,
        _table: &TableRef,
        _kind: ConstraintKind,
    ) -> Result<Vec<ConstraintDef>> {
        Ok(Vec::new())
    }

    async fn execute_ddl(&self, sql: &str) -> Result<()> {
        Err(LoadError::Config(format!(
            "cannot execute DDL without a database connection: {}",
            sql
        )))
    }
}
