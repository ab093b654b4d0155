//! Optional sub-configurations of a load.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::TableRef;

/// Default change-operation column of a CDC source.
pub const DEFAULT_OPERATION_COLUMN: &str = "sys_change_operation";

/// Default change-version column of a CDC source.
pub const DEFAULT_VERSION_COLUMN: &str = "sys_change_version";

/// Default decompression limit for CDC loads into hypertables.
pub const DEFAULT_CDC_DECOMPRESSION_LIMIT: u64 = 2_000_000;

/// Which audit columns the load maintains.
///
/// - `with_created_at`: set on insert
/// - `with_updated_at`: set on insert, refreshed on update
/// - `with_deleted_at`: enables soft delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub with_created_at: bool,
    pub with_updated_at: bool,
    pub with_deleted_at: bool,
}

impl AuditConfig {
    /// Created/updated/deleted tracking.
    pub fn full() -> Self {
        Self {
            with_created_at: true,
            with_updated_at: true,
            with_deleted_at: true,
        }
    }

    /// Audit columns written by an INSERT.
    pub fn insert_columns(&self) -> Vec<&'static str> {
        let mut cols = Vec::new();
        if self.with_created_at {
            cols.push("created_at");
        }
        if self.with_updated_at {
            cols.push("updated_at");
        }
        cols
    }
}

/// DDL choreography around a batched load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Date column used to cut the source (and the target, for deletes) into windows.
    pub batch_date_column: String,

    #[serde(default)]
    pub truncate_before_load: bool,

    /// Drop non-constraint indexes and recreate them afterwards.
    #[serde(default)]
    pub drop_indexes: bool,

    #[serde(default)]
    pub drop_fk: bool,

    #[serde(default)]
    pub drop_pk: bool,

    #[serde(default)]
    pub drop_unique: bool,

    /// Stop on the first failing batch.
    #[serde(default = "default_true")]
    pub fail_fast: bool,

    /// Return a partial-failure result instead of an error.
    #[serde(default)]
    pub allow_partial_success: bool,

    /// SET UNLOGGED for the duration of the load.
    #[serde(default)]
    pub disable_wal: bool,

    #[serde(default)]
    pub disable_autovacuum: bool,

    /// Hypertables cannot build indexes CONCURRENTLY.
    #[serde(default)]
    pub is_hypertable: bool,
}

impl BatchConfig {
    pub fn new(batch_date_column: impl Into<String>) -> Self {
        Self {
            batch_date_column: batch_date_column.into(),
            truncate_before_load: false,
            drop_indexes: false,
            drop_fk: false,
            drop_pk: false,
            drop_unique: false,
            fail_fast: true,
            allow_partial_success: false,
            disable_wal: false,
            disable_autovacuum: false,
            is_hypertable: false,
        }
    }

    pub fn drops_constraints(&self) -> bool {
        self.drop_fk || self.drop_pk || self.drop_unique
    }

    pub fn uses_bulk_mode(&self) -> bool {
        self.disable_wal || self.disable_autovacuum
    }

    /// Short list of enabled options for logs.
    pub fn describe(&self) -> String {
        let flags = [
            (self.truncate_before_load, "truncate"),
            (self.drop_indexes, "drop_indexes"),
            (self.drop_fk, "drop_FK"),
            (self.drop_pk, "drop_PK"),
            (self.drop_unique, "drop_UNIQUE"),
            (self.disable_wal, "WAL_OFF"),
            (self.disable_autovacuum, "vacuum_off"),
        ];
        let opts: Vec<&str> = flags
            .iter()
            .filter(|(on, _)| *on)
            .map(|(_, name)| *name)
            .collect();
        if opts.is_empty() {
            "default".to_string()
        } else {
            opts.join(", ")
        }
    }
}

/// Foreign key columns of a table that point back at the same table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfReferenceConfig {
    /// Target column → source column.
    pub columns: BTreeMap<String, String>,

    /// Resolve through the mapping table instead of a natural-key self-join.
    #[serde(default)]
    pub requires_mapping: bool,
}

/// Change-capture settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdcConfig {
    /// Per-target table recording the last processed version.
    pub tracking_table: TableRef,

    #[serde(default = "default_operation_column")]
    pub operation_column: String,

    #[serde(default = "default_version_column")]
    pub version_column: String,
}

impl CdcConfig {
    pub fn new(tracking_table: TableRef) -> Self {
        Self {
            tracking_table,
            operation_column: default_operation_column(),
            version_column: default_version_column(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_operation_column() -> String {
    DEFAULT_OPERATION_COLUMN.to_string()
}

fn default_version_column() -> String {
    DEFAULT_VERSION_COLUMN.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_defaults() {
        let batch: BatchConfig = serde_yaml::from_str("batch_date_column: trade_date").unwrap();
        assert!(batch.fail_fast);
        assert!(!batch.allow_partial_success);
        assert!(!batch.truncate_before_load);
        assert!(!batch.drops_constraints());
        assert!(!batch.uses_bulk_mode());
        assert_eq!(batch, BatchConfig::new("trade_date"));
        assert_eq!(batch.describe(), "default");
    }

    #[test]
    fn test_batch_describe() {
        let mut batch = BatchConfig::new("date");
        batch.truncate_before_load = true;
        batch.drop_fk = true;
        batch.disable_wal = true;
        assert_eq!(batch.describe(), "truncate, drop_FK, WAL_OFF");
        assert!(batch.drops_constraints());
        assert!(batch.uses_bulk_mode());
    }

    #[test]
    fn test_cdc_defaults() {
        let cdc: CdcConfig =
            serde_yaml::from_str("tracking_table: master.price_cdc_load").unwrap();
        assert_eq!(cdc.operation_column, "sys_change_operation");
        assert_eq!(cdc.version_column, "sys_change_version");
    }

    #[test]
    fn test_audit_insert_columns() {
        assert!(AuditConfig::default().insert_columns().is_empty());
        assert_eq!(AuditConfig::full().insert_columns(), vec!["created_at", "updated_at"]);
    }
}
