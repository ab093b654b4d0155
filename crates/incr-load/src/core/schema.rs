//! Typed description of a target entity: columns, keys and constraints.
//!
//! An [`EntityDescription`] is what the catalog's "describe" call returns. All
//! auto-detection (default unique key, mapping columns, inheritance keys) is a
//! pure function over this type, so it can be exercised without a database.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::identifier::TableRef;

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Data type as reported by the catalog (`format_type`).
    #[serde(default)]
    pub data_type: String,

    /// Whether the column is nullable.
    #[serde(default = "default_true")]
    pub is_nullable: bool,

    /// Identity or serial column (value generated by the database).
    #[serde(default)]
    pub is_identity: bool,

    /// Non-identity server default (`DEFAULT now()`, generated columns, ...).
    #[serde(default)]
    pub has_server_default: bool,
}

impl Column {
    /// Create a plain nullable column with no defaults.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            is_identity: false,
            has_server_default: false,
        }
    }

    /// Mark the column as NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    /// Mark the column as an identity column.
    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self.is_nullable = false;
        self
    }

    /// Mark the column as having a server-computed default.
    pub fn server_default(mut self) -> Self {
        self.has_server_default = true;
        self
    }
}

/// A UNIQUE constraint or unique index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueConstraint {
    pub name: String,
    pub columns: Vec<String>,
}

/// Foreign key metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,

    /// Referencing columns on this entity.
    pub columns: Vec<String>,

    /// Referenced schema.
    pub ref_schema: String,

    /// Referenced table.
    pub ref_table: String,

    /// Referenced columns.
    pub ref_columns: Vec<String>,
}

impl ForeignKey {
    /// True when this key references the given table.
    pub fn references(&self, table: &TableRef) -> bool {
        self.ref_schema == table.schema && self.ref_table == table.name
    }
}

/// Entity metadata as read from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescription {
    /// Qualified table name.
    pub table: TableRef,

    /// Columns in ordinal order.
    pub columns: Vec<Column>,

    /// Primary key column names in key order.
    #[serde(default)]
    pub primary_key: Vec<String>,

    /// UNIQUE constraints and unique indexes.
    #[serde(default)]
    pub unique_constraints: Vec<UniqueConstraint>,

    /// Foreign keys declared on this entity.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl EntityDescription {
    /// Create a description with columns only.
    pub fn new(table: TableRef, columns: Vec<Column>) -> Self {
        Self {
            table,
            columns,
            primary_key: Vec::new(),
            unique_constraints: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Set the primary key.
    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Add a UNIQUE constraint.
    pub fn with_unique(mut self, name: &str, columns: &[&str]) -> Self {
        self.unique_constraints.push(UniqueConstraint {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    /// Add a foreign key.
    pub fn with_foreign_key(
        mut self,
        name: &str,
        columns: &[&str],
        references: &TableRef,
        ref_columns: &[&str],
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ref_schema: references.schema.clone(),
            ref_table: references.name.clone(),
            ref_columns: ref_columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check if a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// All column names in ordinal order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// True if the primary key is a single database-generated column.
    pub fn has_surrogate_pk(&self) -> bool {
        match self.primary_key.as_slice() {
            [pk] => self.column(pk).map_or(false, |c| c.is_identity),
            _ => false,
        }
    }

    /// Foreign keys whose referencing columns are exactly `[column]`.
    pub fn foreign_keys_on(&self, column: &str) -> Vec<&ForeignKey> {
        self.foreign_keys
            .iter()
            .filter(|fk| fk.columns.len() == 1 && fk.columns[0] == column)
            .collect()
    }

    /// True when `key` equals (as a set) the primary key or a unique constraint.
    pub fn is_unique_key(&self, key: &[String]) -> bool {
        let wanted: BTreeSet<&str> = key.iter().map(String::as_str).collect();
        if wanted.is_empty() || wanted.len() != key.len() {
            return false;
        }

        let same = |cols: &[String]| -> bool {
            cols.len() == wanted.len() && cols.iter().all(|c| wanted.contains(c.as_str()))
        };

        same(&self.primary_key) || self.unique_constraints.iter().any(|u| same(&u.columns))
    }

    /// Human-readable list of the keys that would be accepted.
    pub fn describe_keys(&self) -> String {
        let mut keys = Vec::new();
        if !self.primary_key.is_empty() {
            keys.push(format!("PRIMARY KEY ({})", self.primary_key.join(", ")));
        }
        for u in &self.unique_constraints {
            keys.push(format!("UNIQUE {} ({})", u.name, u.columns.join(", ")));
        }
        if keys.is_empty() {
            "none".to_string()
        } else {
            keys.join("; ")
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn company() -> EntityDescription {
        let entity = TableRef::new("master", "entity").unwrap();
        EntityDescription::new(
            TableRef::new("master", "company").unwrap(),
            vec![
                Column::new("company_id", "integer").not_null(),
                Column::new("ticker", "varchar(20)"),
                Column::new("isin", "char(12)"),
                Column::new("updated_at", "timestamptz").server_default(),
            ],
        )
        .with_primary_key(&["company_id"])
        .with_unique("uq_company_ticker_isin", &["ticker", "isin"])
        .with_foreign_key("fk_company_entity", &["company_id"], &entity, &["entity_id"])
    }

    #[test]
    fn test_is_unique_key_matches_pk() {
        assert!(company().is_unique_key(&["company_id".to_string()]));
    }

    #[test]
    fn test_is_unique_key_order_insensitive() {
        let key = vec!["isin".to_string(), "ticker".to_string()];
        assert!(company().is_unique_key(&key));
    }

    #[test]
    fn test_is_unique_key_rejects_subset_and_duplicates() {
        assert!(!company().is_unique_key(&["ticker".to_string()]));
        assert!(!company().is_unique_key(&[]));
        let dup = vec!["company_id".to_string(), "company_id".to_string()];
        assert!(!company().is_unique_key(&dup));
    }

    #[test]
    fn test_surrogate_pk_detection() {
        assert!(!company().has_surrogate_pk());

        let entity = EntityDescription::new(
            TableRef::new("master", "entity").unwrap(),
            vec![Column::new("entity_id", "integer").identity()],
        )
        .with_primary_key(&["entity_id"]);
        assert!(entity.has_surrogate_pk());
    }

    #[test]
    fn test_foreign_keys_on_column() {
        let c = company();
        let fks = c.foreign_keys_on("company_id");
        assert_eq!(fks.len(), 1);
        assert!(fks[0].references(&TableRef::new("master", "entity").unwrap()));
        assert!(c.foreign_keys_on("ticker").is_empty());
    }

    #[test]
    fn test_describe_keys() {
        let text = company().describe_keys();
        assert!(text.contains("PRIMARY KEY (company_id)"));
        assert!(text.contains("UNIQUE uq_company_ticker_isin (ticker, isin)"));
    }

    #[test]
    fn test_yaml_roundtrip_uses_defaults() {
        let yaml = r#"
table: master.currency
columns:
  - name: code
    is_nullable: false
  - name: name
primary_key: [code]
"#;
        let desc: EntityDescription = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(desc.columns.len(), 2);
        assert!(desc.columns[1].is_nullable);
        assert!(desc.unique_constraints.is_empty());
    }
}
