//! Configuration type definitions.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::batching::StrategyConfig;
use crate::core::{EntityDescription, TableRef};
use crate::load_config::{
    AuditConfig, BatchConfig, CdcConfig, LoadScheme, MappingOverrides, SelfReferenceConfig,
};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target database (PostgreSQL) connection.
    pub database: DatabaseConfig,

    /// Defaults shared by every load.
    #[serde(default)]
    pub defaults: Defaults,

    /// Entity descriptions used instead of the live catalog (offline render/validate).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<EntityDescription>,

    /// Named load definitions.
    #[serde(default)]
    pub loads: Vec<LoadDefinition>,
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,

    /// Pool size (default: 4). Loads use one connection at a time.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Connect timeout in seconds (default: 30).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Defaults shared by every load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Defaults {
    /// Floor for the first batch window when no `min_date` is known.
    /// Overridden by the `TIMESERIES_START_DATE` environment variable.
    #[serde(default)]
    pub timeseries_start_date: Option<NaiveDate>,
}

/// A named load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadDefinition {
    pub name: String,

    #[serde(flatten)]
    pub spec: LoadSpec,
}

/// Everything about a load except its name. Inheritance parents use this
/// shape directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSpec {
    #[serde(default)]
    pub scheme: LoadScheme,

    pub target_table: TableRef,

    pub source_table: TableRef,

    /// Defaults to the target's primary key.
    #[serde(default)]
    pub unique_key: Option<Vec<String>>,

    #[serde(default)]
    pub exclude_columns: Vec<String>,

    #[serde(default)]
    pub include_audit_columns: bool,

    #[serde(default)]
    pub include_server_default_columns: bool,

    /// Target column → source column.
    #[serde(default)]
    pub column_mapping: BTreeMap<String, String>,

    #[serde(default)]
    pub order_by: Option<String>,

    #[serde(default)]
    pub with_soft_delete: bool,

    #[serde(default)]
    pub hard_delete: bool,

    /// Predicate on `tgt` protecting rows from deletion.
    #[serde(default)]
    pub exclude_from_delete: Option<String>,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub mapping: Option<MappingDefinition>,

    #[serde(default)]
    pub inheritance: Option<InheritanceDefinition>,

    #[serde(default)]
    pub self_reference: Option<SelfReferenceConfig>,

    #[serde(default)]
    pub batch: Option<BatchConfig>,

    /// Window generation; defaults to one-day fixed windows.
    #[serde(default)]
    pub strategy: Option<StrategyConfig>,

    #[serde(default)]
    pub cdc: Option<CdcConfig>,

    #[serde(default)]
    pub is_hypertable: bool,

    #[serde(default)]
    pub hypertable_decompression_limit: Option<u64>,

    /// Truncating batch loads must opt in.
    #[serde(default)]
    pub confirm_full_load: bool,
}

impl LoadSpec {
    /// Whether a run would empty the target first.
    pub fn truncates(&self) -> bool {
        self.batch
            .as_ref()
            .map_or(false, |b| b.truncate_before_load)
    }
}

/// Mapping table plus optional column overrides; the rest is detected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingDefinition {
    pub mapping_table: TableRef,

    #[serde(flatten)]
    pub overrides: MappingOverrides,
}

/// Parent load and the source column feeding the parent key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InheritanceDefinition {
    pub parent: Box<LoadSpec>,
    pub source_parent_key: String,
}

fn default_pg_port() -> u16 {
    5432
}

fn default_require() -> String {
    "require".to_string()
}

fn default_max_connections() -> usize {
    4
}

fn default_connect_timeout() -> u64 {
    30
}
