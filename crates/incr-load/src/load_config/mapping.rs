//! External-identity registry configuration.
//!
//! A mapping table holds `(data_source, [type], external_id) → internal_id`,
//! unique on the left-hand tuple. Loads only ever append to it.

use serde::{Deserialize, Serialize};

use crate::core::identifier::validate_identifier;
use crate::core::{EntityDescription, TableRef};
use crate::error::{LoadError, Result};

/// Column used when no foreign key identifies the data source.
pub const DEFAULT_DATA_SOURCE_COLUMN: &str = "data_source_id";

/// Name of the data-source lookup table.
const DATA_SOURCE_TABLE: &str = "data_source";

/// Columns recognised as the mapping's type discriminator.
const TYPE_COLUMNS: &[&str] = &["entity_type_id", "instrument_type_id", "venue_type_id"];

/// Resolved mapping table layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingConfig {
    pub mapping_table: TableRef,

    /// External id column in the source.
    pub source_external_id_column: String,

    /// Data source column, same name in source and mapping table.
    pub data_source_column: String,

    pub mapping_external_column: String,
    pub mapping_internal_column: String,

    #[serde(default)]
    pub mapping_type_column: Option<String>,

    #[serde(default)]
    pub source_type_column: Option<String>,
}

/// Caller overrides applied on top of auto-detection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingOverrides {
    pub source_external_id_column: Option<String>,
    pub data_source_column: Option<String>,
    pub source_type_column: Option<String>,
}

impl MappingConfig {
    /// Detect the mapping layout from the mapping table's description.
    ///
    /// `owner` is the table whose internal ids the mapping resolves; a column
    /// with a foreign key to it is the internal column.
    pub fn from_entity(
        mapping: &EntityDescription,
        owner: &TableRef,
        overrides: &MappingOverrides,
    ) -> Result<Self> {
        let table = &mapping.table;

        let detected_ds = mapping
            .foreign_keys
            .iter()
            .find(|fk| fk.ref_table == DATA_SOURCE_TABLE && fk.columns.len() == 1)
            .map(|fk| fk.columns[0].clone());
        let data_source_column = overrides
            .data_source_column
            .clone()
            .or(detected_ds)
            .unwrap_or_else(|| DEFAULT_DATA_SOURCE_COLUMN.to_string());

        let mapping_internal_column = detect_internal_column(mapping, owner)?;

        let external: Vec<&str> = mapping
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .filter(|name| name.to_lowercase().contains("external"))
            .collect();
        let mapping_external_column =
            single(&external, "column containing 'external'", table)?.to_string();

        let mapping_type_column = mapping
            .columns
            .iter()
            .find(|c| TYPE_COLUMNS.contains(&c.name.as_str()))
            .map(|c| c.name.clone());

        let source_external_id_column = overrides
            .source_external_id_column
            .clone()
            .unwrap_or_else(|| mapping_external_column.clone());

        let source_type_column = overrides
            .source_type_column
            .clone()
            .or_else(|| mapping_type_column.clone());

        let config = Self {
            mapping_table: table.clone(),
            source_external_id_column,
            data_source_column,
            mapping_external_column,
            mapping_internal_column,
            mapping_type_column,
            source_type_column,
        };
        config.validate_against(mapping)?;
        Ok(config)
    }

    /// Mapping columns forming the conflict tuple, in `(data_source, [type], external)` order.
    pub fn conflict_columns(&self) -> Vec<&str> {
        let mut cols = vec![self.data_source_column.as_str()];
        if let Some(t) = &self.mapping_type_column {
            cols.push(t.as_str());
        }
        cols.push(self.mapping_external_column.as_str());
        cols
    }

    /// Source-side type column, when the mapping is typed.
    pub fn source_type(&self) -> Option<&str> {
        self.mapping_type_column.as_ref()?;
        self.source_type_column
            .as_deref()
            .or(self.mapping_type_column.as_deref())
    }

    /// Check that every mapping column exists on the mapping table.
    pub fn validate_against(&self, mapping: &EntityDescription) -> Result<()> {
        let mut required = vec![
            self.data_source_column.as_str(),
            self.mapping_external_column.as_str(),
            self.mapping_internal_column.as_str(),
        ];
        if let Some(t) = &self.mapping_type_column {
            required.push(t.as_str());
        }
        for col in required {
            if !mapping.has_column(col) {
                return Err(LoadError::Config(format!(
                    "Mapping table {} has no column '{}'",
                    mapping.table, col
                )));
            }
        }
        validate_identifier(&self.source_external_id_column)?;
        if let Some(t) = &self.source_type_column {
            validate_identifier(t)?;
        }
        Ok(())
    }
}

fn detect_internal_column(mapping: &EntityDescription, owner: &TableRef) -> Result<String> {
    let by_fk: Vec<&str> = mapping
        .foreign_keys
        .iter()
        .filter(|fk| fk.columns.len() == 1 && fk.references(owner))
        .map(|fk| fk.columns[0].as_str())
        .collect();

    match by_fk.as_slice() {
        [one] => return Ok(one.to_string()),
        [] => {}
        many => {
            return Err(LoadError::Config(format!(
                "Ambiguous internal id column on {}: {} foreign keys reference {} ({})",
                mapping.table,
                many.len(),
                owner,
                many.join(", ")
            )))
        }
    }

    let by_name: Vec<&str> = mapping
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .filter(|name| name.starts_with("internal_"))
        .collect();
    Ok(single(&by_name, "'internal_*' column", &mapping.table)?.to_string())
}

fn single<'a>(found: &[&'a str], description: &str, table: &TableRef) -> Result<&'a str> {
    match found {
        [one] => Ok(*one),
        _ => Err(LoadError::Config(format!(
            "Expected exactly 1 {} on {}, found: [{}]",
            description,
            table,
            found.join(", ")
        ))),
    }
}
