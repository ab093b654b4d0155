//! Two-table "is-a" composition.
//!
//! The child table's primary key is also a foreign key to the parent's id
//! (shared identity). The parent is loaded first and its ids feed the child.

use crate::core::{EntityDescription, TableRef};
use crate::error::{LoadError, Result};

use super::LoadConfig;

/// Parent/child layout derived from a complete parent config and the child entity.
#[derive(Debug, Clone, PartialEq)]
pub struct InheritanceConfig {
    /// Complete load of the parent table.
    pub parent_config: LoadConfig,

    /// Source column matched against `parent_unique_key`.
    pub source_parent_key: String,

    pub parent_table: TableRef,
    pub parent_unique_key: String,

    /// Parent column referenced by the child key's foreign key.
    pub parent_id_column: String,

    pub parent_columns: Vec<String>,

    pub child_table: TableRef,
    pub child_unique_key: String,
    pub child_columns: Vec<String>,
}

impl InheritanceConfig {
    /// Derive the layout, validating that the child key references the parent.
    pub fn new(
        parent_config: LoadConfig,
        source_parent_key: impl Into<String>,
        child: &EntityDescription,
        child_columns: Vec<String>,
    ) -> Result<Self> {
        let source_parent_key = source_parent_key.into();

        let parent_unique_key = match parent_config.unique_key.as_slice() {
            [key] => key.clone(),
            keys => {
                return Err(LoadError::Config(format!(
                    "Inheritance parent {} must have a single-column unique key, found: [{}]",
                    parent_config.target_table,
                    keys.join(", ")
                )))
            }
        };

        let child_unique_key = match child.primary_key.as_slice() {
            [pk] => pk.clone(),
            pks => {
                return Err(LoadError::Config(format!(
                    "Child table {} must have a single-column primary key, found: [{}]",
                    child.table,
                    pks.join(", ")
                )))
            }
        };

        let parent_table = parent_config.target_table.clone();
        let fks = child.foreign_keys_on(&child_unique_key);
        if fks.is_empty() {
            return Err(LoadError::Config(format!(
                "Child primary key '{}' on {} must be a foreign key to {}",
                child_unique_key, child.table, parent_table
            )));
        }
        let fk = fks.iter().find(|fk| fk.references(&parent_table)).ok_or_else(|| {
            let targets: Vec<String> = fks
                .iter()
                .map(|fk| format!("{}.{}", fk.ref_schema, fk.ref_table))
                .collect();
            LoadError::Config(format!(
                "Child primary key '{}' on {} references [{}], expected {}",
                child_unique_key,
                child.table,
                targets.join(", "),
                parent_table
            ))
        })?;

        let parent_id_column = fk
            .ref_columns
            .first()
            .cloned()
            .ok_or_else(|| LoadError::Config(format!("Foreign key {} has no columns", fk.name)))?;

        Ok(Self {
            parent_columns: parent_config.columns.clone(),
            parent_config,
            source_parent_key,
            parent_table,
            parent_unique_key,
            parent_id_column,
            child_table: child.table.clone(),
            child_unique_key,
            child_columns,
        })
    }

    /// Child columns other than the shared key.
    pub fn child_data_columns(&self) -> Vec<String> {
        self.child_columns
            .iter()
            .filter(|c| **c != self.child_unique_key)
            .cloned()
            .collect()
    }

    /// Whether the parent id is produced by the database.
    pub fn parent_key_is_generated(&self) -> bool {
        self.parent_config
            .generated_key_columns
            .contains(&self.parent_unique_key)
    }
}
