//! Declarative description of one load operation.
//!
//! A [`LoadConfig`] is built once per load definition from the target entity's
//! description plus a handful of caller choices ([`LoadOptions`]). Construction
//! derives the unique key and column list, composes the optional
//! sub-configurations and validates every cross-field rule, so a config that
//! exists is a config the renderer can turn into SQL.

pub mod inheritance;
pub mod mapping;
pub mod options;
pub mod validation;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{EntityDescription, TableRef};
use crate::error::{LoadError, Result};

pub use inheritance::InheritanceConfig;
pub use mapping::{MappingConfig, MappingOverrides};
pub use options::{AuditConfig, BatchConfig, CdcConfig, SelfReferenceConfig};

/// Audit-mixin columns left out of `columns` unless asked for.
pub const AUDIT_MIXIN_COLUMNS: &[&str] = &[
    "created_at",
    "updated_at",
    "deleted_at",
    "loaded_at",
    "rows_inserted",
    "rows_updated",
    "rows_deleted",
];

/// SQL scheme used to apply the source to the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadScheme {
    /// `MERGE INTO ... WHEN MATCHED / NOT MATCHED [BY SOURCE]`.
    #[default]
    Merge,
    /// `INSERT ... ON CONFLICT DO UPDATE / DO NOTHING`.
    Upsert,
    /// Unconditional append.
    Insert,
    /// Apply tagged change rows and record the processed version.
    Cdc,
}

impl fmt::Display for LoadScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadScheme::Merge => "merge",
            LoadScheme::Upsert => "upsert",
            LoadScheme::Insert => "insert",
            LoadScheme::Cdc => "cdc",
        };
        f.write_str(s)
    }
}

/// A parent load plus the source column that identifies the parent row.
#[derive(Debug, Clone, PartialEq)]
pub struct InheritanceSpec {
    pub parent: LoadConfig,
    pub source_parent_key: String,
}

/// Caller choices for [`LoadConfig::from_entity`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    pub scheme: LoadScheme,
    pub source_table: TableRef,
    pub unique_key: Option<Vec<String>>,
    pub exclude_columns: Vec<String>,
    pub include_audit_columns: bool,
    pub include_server_default_columns: bool,
    pub column_mapping: BTreeMap<String, String>,
    pub order_by: Option<String>,
    pub with_soft_delete: bool,
    pub hard_delete: bool,
    pub exclude_from_delete: Option<String>,
    pub audit: AuditConfig,
    pub mapping: Option<MappingConfig>,
    pub inheritance: Option<InheritanceSpec>,
    pub self_reference: Option<SelfReferenceConfig>,
    pub batch: Option<BatchConfig>,
    pub cdc: Option<CdcConfig>,
    pub is_hypertable: bool,
    pub hypertable_decompression_limit: Option<u64>,
}

impl LoadOptions {
    pub fn new(scheme: LoadScheme, source_table: TableRef) -> Self {
        Self {
            scheme,
            source_table,
            unique_key: None,
            exclude_columns: Vec::new(),
            include_audit_columns: false,
            include_server_default_columns: false,
            column_mapping: BTreeMap::new(),
            order_by: None,
            with_soft_delete: false,
            hard_delete: false,
            exclude_from_delete: None,
            audit: AuditConfig::default(),
            mapping: None,
            inheritance: None,
            self_reference: None,
            batch: None,
            cdc: None,
            is_hypertable: false,
            hypertable_decompression_limit: None,
        }
    }

    pub fn with_unique_key(mut self, key: &[&str]) -> Self {
        self.unique_key = Some(key.iter().map(|k| k.to_string()).collect());
        self
    }

    pub fn with_exclude_columns(mut self, columns: &[&str]) -> Self {
        self.exclude_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_column_mapping(mut self, target: &str, source: &str) -> Self {
        self.column_mapping
            .insert(target.to_string(), source.to_string());
        self
    }

    pub fn with_order_by(mut self, order_by: &str) -> Self {
        self.order_by = Some(order_by.to_string());
        self
    }

    pub fn with_soft_delete(mut self) -> Self {
        self.with_soft_delete = true;
        self
    }

    pub fn with_hard_delete(mut self) -> Self {
        self.hard_delete = true;
        self
    }

    pub fn with_exclude_from_delete(mut self, condition: &str) -> Self {
        self.exclude_from_delete = Some(condition.to_string());
        self
    }

    pub fn with_audit(mut self, audit: AuditConfig) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_mapping(mut self, mapping: MappingConfig) -> Self {
        self.mapping = Some(mapping);
        self
    }

    pub fn with_inheritance(mut self, parent: LoadConfig, source_parent_key: &str) -> Self {
        self.inheritance = Some(InheritanceSpec {
            parent,
            source_parent_key: source_parent_key.to_string(),
        });
        self
    }

    pub fn with_self_reference(mut self, self_reference: SelfReferenceConfig) -> Self {
        self.self_reference = Some(self_reference);
        self
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn with_cdc(mut self, cdc: CdcConfig) -> Self {
        self.cdc = Some(cdc);
        self
    }

    pub fn with_hypertable(mut self, decompression_limit: Option<u64>) -> Self {
        self.is_hypertable = true;
        self.hypertable_decompression_limit = decompression_limit;
        self
    }
}

/// A validated load operation.
///
/// Built through [`LoadConfig::from_entity`]; fields are public for reading.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct LoadConfig {
    pub scheme: LoadScheme,
    pub target_table: TableRef,
    pub source_table: TableRef,
    pub unique_key: Vec<String>,
    pub columns: Vec<String>,

    /// Target column → source column, for names that differ.
    pub column_mapping: BTreeMap<String, String>,

    /// Identity columns inside `unique_key`, left out of INSERT lists.
    pub generated_key_columns: Vec<String>,

    /// Single-column id written to the mapping table and self-references.
    pub internal_id_column: Option<String>,

    pub order_by: Option<String>,
    pub with_soft_delete: bool,
    pub hard_delete: bool,
    pub exclude_from_delete: Option<String>,
    pub audit: AuditConfig,
    pub mapping: Option<MappingConfig>,
    pub inheritance: Option<Box<InheritanceConfig>>,
    pub self_reference: Option<SelfReferenceConfig>,
    pub batch: Option<BatchConfig>,
    pub cdc: Option<CdcConfig>,
    pub is_hypertable: bool,
    pub hypertable_decompression_limit: Option<u64>,
}

impl LoadConfig {
    /// Derive and validate a config for `entity`.
    pub fn from_entity(entity: &EntityDescription, options: LoadOptions) -> Result<Self> {
        let unique_key = match &options.unique_key {
            Some(key) => key.clone(),
            None => default_unique_key(entity)?,
        };

        let columns = derive_columns(entity, &unique_key, &options);

        let generated_key_columns: Vec<String> = unique_key
            .iter()
            .filter(|k| entity.column(k).map_or(false, |c| c.is_identity))
            .cloned()
            .collect();

        let hypertable_decompression_limit = match (
            options.scheme,
            options.is_hypertable,
            options.hypertable_decompression_limit,
        ) {
            (LoadScheme::Cdc, true, None) => Some(options::DEFAULT_CDC_DECOMPRESSION_LIMIT),
            (_, _, limit) => limit.filter(|l| *l > 0),
        };

        let mut config = Self {
            scheme: options.scheme,
            target_table: entity.table.clone(),
            source_table: options.source_table,
            internal_id_column: internal_id_column(entity, &unique_key),
            unique_key,
            columns,
            column_mapping: options.column_mapping,
            generated_key_columns,
            order_by: options.order_by,
            with_soft_delete: options.with_soft_delete,
            hard_delete: options.hard_delete,
            exclude_from_delete: options.exclude_from_delete,
            audit: options.audit,
            mapping: options.mapping,
            inheritance: None,
            self_reference: options.self_reference,
            batch: options.batch,
            cdc: options.cdc,
            is_hypertable: options.is_hypertable,
            hypertable_decompression_limit,
        };

        if let Some(spec) = options.inheritance {
            let inheritance = InheritanceConfig::new(
                spec.parent,
                spec.source_parent_key,
                entity,
                config.columns.clone(),
            )?;
            config.internal_id_column = Some(inheritance.child_unique_key.clone());
            config.inheritance = Some(Box::new(inheritance));
        }

        validation::validate(&config, entity)?;
        Ok(config)
    }

    /// `columns` minus `unique_key`.
    pub fn data_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !self.unique_key.contains(c))
            .cloned()
            .collect()
    }

    /// Columns written by an INSERT (generated keys left out).
    pub fn insert_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !self.generated_key_columns.contains(c))
            .cloned()
            .collect()
    }

    /// Source column feeding a target column.
    pub fn source_column<'a>(&'a self, target: &'a str) -> &'a str {
        self.column_mapping
            .get(target)
            .map(String::as_str)
            .unwrap_or(target)
    }

    /// Target column holding the batch date, for window-scoped deletes.
    pub fn target_batch_column(&self) -> Option<&str> {
        let batch = self.batch.as_ref()?;
        let source = batch.batch_date_column.as_str();
        self.columns
            .iter()
            .chain(self.unique_key.iter())
            .find(|c| self.source_column(c) == source)
            .map(String::as_str)
            .or(Some(source))
    }

    /// Whether the load removes rows missing from the source.
    pub fn deletes(&self) -> bool {
        self.with_soft_delete || self.hard_delete
    }

    /// Human-readable key for logs.
    pub fn key_description(&self) -> String {
        match &self.inheritance {
            Some(inh) => format!(
                "parent={}, child={}",
                inh.parent_unique_key, inh.child_unique_key
            ),
            None => format!("[{}]", self.unique_key.join(", ")),
        }
    }

    /// Human-readable target for logs.
    pub fn target_description(&self) -> String {
        match &self.inheritance {
            Some(inh) => format!("{} + {}", inh.parent_table, inh.child_table),
            None => self.target_table.to_string(),
        }
    }
}

fn default_unique_key(entity: &EntityDescription) -> Result<Vec<String>> {
    if entity.primary_key.is_empty() {
        return Err(LoadError::Config(format!(
            "Table {} has no primary key; unique_key must be provided",
            entity.table
        )));
    }
    if entity.has_surrogate_pk() {
        return Err(LoadError::Config(format!(
            "Table {} has auto-generated primary key '{}', which cannot be a merge key; \
             unique_key must be provided",
            entity.table, entity.primary_key[0]
        )));
    }
    Ok(entity.primary_key.clone())
}

fn derive_columns(
    entity: &EntityDescription,
    unique_key: &[String],
    options: &LoadOptions,
) -> Vec<String> {
    let self_ref_columns: Vec<&String> = options
        .self_reference
        .as_ref()
        .map(|s| s.columns.keys().collect())
        .unwrap_or_default();

    entity
        .columns
        .iter()
        .filter(|c| !options.exclude_columns.contains(&c.name))
        .filter(|c| {
            options.include_audit_columns || !AUDIT_MIXIN_COLUMNS.contains(&c.name.as_str())
        })
        .filter(|c| options.include_server_default_columns || !c.has_server_default)
        .filter(|c| !c.is_identity || unique_key.contains(&c.name))
        .filter(|c| !self_ref_columns.contains(&&c.name))
        .map(|c| c.name.clone())
        .collect()
}

fn internal_id_column(entity: &EntityDescription, unique_key: &[String]) -> Option<String> {
    match (entity.primary_key.as_slice(), unique_key) {
        ([pk], _) => Some(pk.clone()),
        (_, [key]) => Some(key.clone()),
        _ => None,
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn merge(source: &str) -> LoadOptions {
        LoadOptions::new(LoadScheme::Merge, t(source))
    }

    // =========================================================================
    // Derivation tests
    // =========================================================================

    #[test]
    fn test_unique_key_defaults_to_pk() {
        let cfg = LoadConfig::from_entity(&currency(), merge("intermediate.int_currency")).unwrap();
        assert_eq!(cfg.unique_key, vec!["code"]);
        assert_eq!(cfg.columns, vec!["code", "name"]);
        assert_eq!(cfg.data_columns(), vec!["name"]);
        assert_eq!(cfg.internal_id_column.as_deref(), Some("code"));
    }

    #[test]
    fn test_composite_pk() {
        let cfg =
            LoadConfig::from_entity(&market_data(), merge("intermediate.int_market_data")).unwrap();
        assert_eq!(cfg.unique_key, vec!["instrument_id", "date"]);
        assert_eq!(cfg.data_columns(), vec!["close", "volume"]);
        assert_eq!(cfg.internal_id_column, None);
    }

    #[test]
    fn test_surrogate_pk_requires_explicit_key() {
        let err = LoadConfig::from_entity(&entity(), merge("intermediate.int_entity")).unwrap_err();
        assert!(err.to_string().contains("auto-generated primary key 'entity_id'"));
    }

    #[test]
    fn test_explicit_surrogate_key_is_generated() {
        let cfg = LoadConfig::from_entity(
            &entity(),
            merge("intermediate.int_entity").with_unique_key(&["entity_id"]),
        )
        .unwrap();
        assert_eq!(cfg.generated_key_columns, vec!["entity_id"]);
        assert_eq!(cfg.insert_columns(), vec!["entity_type_id", "name"]);
    }

    #[test]
    fn test_unique_key_must_match_constraint() {
        let err = LoadConfig::from_entity(
            &currency(),
            merge("intermediate.int_currency").with_unique_key(&["name"]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not match any constraint"));
    }

    #[test]
    fn test_exclusions_and_overrides() {
        let mut opts = merge("intermediate.int_currency").with_exclude_columns(&["name"]);
        opts.include_audit_columns = true;
        opts.include_server_default_columns = true;
        let cfg = LoadConfig::from_entity(&currency(), opts).unwrap();
        assert_eq!(cfg.columns, vec!["code", "created_at", "updated_at", "deleted_at"]);
    }

    #[test]
    fn test_column_mapping_and_batch_column() {
        let cfg = LoadConfig::from_entity(
            &market_data(),
            merge("intermediate.int_market_data")
                .with_column_mapping("date", "trade_date")
                .with_batch(BatchConfig::new("trade_date")),
        )
        .unwrap();
        assert_eq!(cfg.source_column("date"), "trade_date");
        assert_eq!(cfg.source_column("close"), "close");
        assert_eq!(cfg.target_batch_column(), Some("date"));
    }

    #[test]
    fn test_cdc_hypertable_default_limit() {
        let opts = LoadOptions::new(LoadScheme::Cdc, t("staging.market_data_changes"))
            .with_cdc(CdcConfig::new(t("master.market_data_cdc_load")))
            .with_hypertable(None);
        let cfg = LoadConfig::from_entity(&market_data(), opts).unwrap();
        assert_eq!(cfg.hypertable_decompression_limit, Some(2_000_000));
    }

    // =========================================================================
    // Validation tests
    // =========================================================================

    #[test]
    fn test_soft_and_hard_delete_exclusive() {
        let opts = merge("intermediate.int_currency")
            .with_audit(AuditConfig::full())
            .with_soft_delete()
            .with_hard_delete();
        let err = LoadConfig::from_entity(&currency(), opts).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_soft_delete_requires_deleted_at() {
        let opts = merge("intermediate.int_currency").with_soft_delete();
        let err = LoadConfig::from_entity(&currency(), opts).unwrap_err();
        assert!(err.to_string().contains("with_deleted_at"));

        let ok = merge("intermediate.int_currency")
            .with_audit(AuditConfig::full())
            .with_soft_delete();
        assert!(LoadConfig::from_entity(&currency(), ok).is_ok());
    }

    #[test]
    fn test_upsert_rejects_deletes() {
        let opts = LoadOptions::new(LoadScheme::Upsert, t("intermediate.int_currency"))
            .with_hard_delete();
        assert!(LoadConfig::from_entity(&currency(), opts).is_err());
    }

    #[test]
    fn test_insert_rejects_mapping() {
        let mapping = MappingConfig::from_entity(
            &entity_mapping(),
            &t("master.entity"),
            &Default::default(),
        )
        .unwrap();
        let opts =
            LoadOptions::new(LoadScheme::Insert, t("intermediate.int_currency")).with_mapping(mapping);
        let err = LoadConfig::from_entity(&currency(), opts).unwrap_err();
        assert!(err.to_string().contains("insert"));
    }

    #[test]
    fn test_cdc_requires_tracking_table() {
        let opts = LoadOptions::new(LoadScheme::Cdc, t("staging.currency_changes"));
        let err = LoadConfig::from_entity(&currency(), opts).unwrap_err();
        assert!(err.to_string().contains("tracking table"));
    }

    #[test]
    fn test_fragments_screened() {
        let opts = merge("intermediate.int_currency").with_order_by("name; DROP TABLE x");
        assert!(LoadConfig::from_entity(&currency(), opts).is_err());

        let opts = merge("intermediate.int_currency")
            .with_hard_delete()
            .with_exclude_from_delete("tgt.code = 'XXX' --");
        assert!(LoadConfig::from_entity(&currency(), opts).is_err());
    }

    #[test]
    fn test_unknown_mapped_column_rejected() {
        let opts = merge("intermediate.int_currency").with_column_mapping("missing", "x");
        let err = LoadConfig::from_entity(&currency(), opts).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_self_reference_without_mapping_requires_single_key() {
        let self_ref = SelfReferenceConfig {
            columns: [("volume".to_string(), "parent_code".to_string())].into(),
            requires_mapping: false,
        };
        let opts = merge("intermediate.int_market_data").with_self_reference(self_ref);
        let err = LoadConfig::from_entity(&market_data(), opts).unwrap_err();
        assert!(err.to_string().contains("single-column unique_key"));
    }

    #[test]
    fn test_self_reference_with_mapping_requires_mapping() {
        let self_ref = SelfReferenceConfig {
            columns: [("primary_company_id".to_string(), "primary_company_id".to_string())].into(),
            requires_mapping: true,
        };
        let opts = merge("intermediate.int_company").with_self_reference(self_ref);
        let err = LoadConfig::from_entity(&company(), opts).unwrap_err();
        assert!(err.to_string().contains("requires mapping"));
    }

    #[test]
    fn test_self_reference_columns_leave_main_load() {
        let self_ref = SelfReferenceConfig {
            columns: [("primary_company_id".to_string(), "primary_natural_key".to_string())].into(),
            requires_mapping: false,
        };
        let opts = merge("intermediate.int_company").with_self_reference(self_ref);
        let cfg = LoadConfig::from_entity(&company(), opts).unwrap();
        assert!(!cfg.columns.contains(&"primary_company_id".to_string()));
    }

    // =========================================================================
    // Inheritance tests
    // =========================================================================

    fn parent() -> LoadConfig {
        LoadConfig::from_entity(
            &entity(),
            merge("intermediate.int_company").with_unique_key(&["entity_id"]),
        )
        .unwrap()
    }

    #[test]
    fn test_inheritance_derivation() {
        let opts = merge("intermediate.int_company").with_inheritance(parent(), "internal_company_id");
        let cfg = LoadConfig::from_entity(&company(), opts).unwrap();
        let inh = cfg.inheritance.as_ref().unwrap();

        assert_eq!(inh.parent_table.to_string(), "master.entity");
        assert_eq!(inh.parent_unique_key, "entity_id");
        assert_eq!(inh.parent_id_column, "entity_id");
        assert_eq!(inh.child_table.to_string(), "master.company");
        assert_eq!(inh.child_unique_key, "company_id");
        assert_eq!(inh.child_data_columns(), vec!["ticker", "sector", "primary_company_id"]);
        assert!(inh.parent_key_is_generated());
        assert_eq!(cfg.target_description(), "master.entity + master.company");
        assert_eq!(cfg.key_description(), "parent=entity_id, child=company_id");
    }

    #[test]
    fn test_generated_parent_key_without_mapping_is_accepted() {
        let opts = merge("intermediate.int_company").with_inheritance(parent(), "internal_company_id");
        let cfg = LoadConfig::from_entity(&company(), opts).unwrap();
        assert!(validation::keys_parents_on_source(&cfg));
        assert!(!validation::keys_parents_on_source(&parent()));
    }

    #[test]
    fn test_inheritance_requires_fk_to_parent() {
        let mut child = company();
        child.foreign_keys.retain(|fk| fk.name != "fk_company_entity");
        let opts = merge("intermediate.int_company").with_inheritance(parent(), "internal_company_id");
        let err = LoadConfig::from_entity(&child, opts).unwrap_err();
        assert!(err.to_string().contains("must be a foreign key to master.entity"));
    }

    #[test]
    fn test_inheritance_rejects_fk_to_other_table() {
        let mut child = company();
        child.foreign_keys[0].ref_table = "organization".to_string();
        let opts = merge("intermediate.int_company").with_inheritance(parent(), "internal_company_id");
        let err = LoadConfig::from_entity(&child, opts).unwrap_err();
        assert!(err.to_string().contains("expected master.entity"));
    }

    #[test]
    fn test_upsert_inheritance_needs_natural_parent_key() {
        let opts = LoadOptions::new(LoadScheme::Upsert, t("intermediate.int_company"))
            .with_inheritance(parent(), "internal_company_id");
        let err = LoadConfig::from_entity(&company(), opts).unwrap_err();
        assert!(err.to_string().contains("generated"));
    }
}
