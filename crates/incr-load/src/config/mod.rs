//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use std::path::Path;

use chrono::NaiveDate;

use crate::core::{EntityDescription, TableRef};
use crate::error::{LoadError, Result};

/// Environment variable overriding `defaults.timeseries_start_date`.
pub const START_DATE_ENV: &str = "TIMESERIES_START_DATE";

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Look up a load by name.
    pub fn load_definition(&self, name: &str) -> Result<&LoadDefinition> {
        self.loads.iter().find(|l| l.name == name).ok_or_else(|| {
            let known: Vec<&str> = self.loads.iter().map(|l| l.name.as_str()).collect();
            LoadError::Config(format!(
                "no load named '{}' (configured: {})",
                name,
                known.join(", ")
            ))
        })
    }

    /// Embedded description of a table, if the file carries one.
    pub fn embedded_entity(&self, table: &TableRef) -> Option<&EntityDescription> {
        self.entities.iter().find(|e| &e.table == table)
    }

    /// Start-date floor: `TIMESERIES_START_DATE` wins over the file default.
    pub fn start_date_floor(&self) -> Result<Option<NaiveDate>> {
        let env = std::env::var(START_DATE_ENV).ok();
        resolve_start_date_floor(env.as_deref(), self.defaults.timeseries_start_date)
    }
}

fn resolve_start_date_floor(
    env: Option<&str>,
    file_default: Option<NaiveDate>,
) -> Result<Option<NaiveDate>> {
    match env.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| {
                LoadError::Config(format!(
                    "{} must be YYYY-MM-DD, got '{}': {}",
                    START_DATE_ENV, value, e
                ))
            }),
        None => Ok(file_default),
    }
}

impl DatabaseConfig {
    /// Build a connection string for tokio-postgres.
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} sslmode={}",
            self.host, self.port, self.database, self.user, self.ssl_mode
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batching::StrategyConfig;
    use crate::load_config::LoadScheme;

    const YAML: &str = r#"
database:
  host: db.internal
  database: warehouse
  user: loader
  password: secret
defaults:
  timeseries_start_date: 2010-01-01
entities:
  - table: master.currency
    columns:
      - { name: code, data_type: "character(3)", is_nullable: false }
      - { name: name, data_type: text }
    primary_key: [code]
loads:
  - name: currencies
    target_table: master.currency
    source_table: intermediate.int_currency
    order_by: code
  - name: companies
    scheme: merge
    target_table: master.company
    source_table: intermediate.int_company
    mapping:
      mapping_table: master.entity_mapping
      source_external_id_column: external_id
    inheritance:
      source_parent_key: internal_company_id
      parent:
        target_table: master.entity
        source_table: intermediate.int_company
        unique_key: [entity_id]
  - name: prices
    scheme: upsert
    target_table: master.price
    source_table: intermediate.int_price
    batch:
      batch_date_column: price_date
      drop_indexes: true
      fail_fast: false
    strategy:
      type: volume_based
      target_rows: 50000
"#;

    #[test]
    fn test_from_yaml_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.ssl_mode, "require");
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.loads.len(), 3);
        assert_eq!(config.loads[0].spec.scheme, LoadScheme::Merge);
        assert_eq!(config.loads[0].spec.order_by.as_deref(), Some("code"));
    }

    #[test]
    fn test_nested_sections() {
        let config = Config::from_yaml(YAML).unwrap();
        let companies = &config.load_definition("companies").unwrap().spec;
        let mapping = companies.mapping.as_ref().unwrap();
        assert_eq!(mapping.mapping_table.to_string(), "master.entity_mapping");
        assert_eq!(
            mapping.overrides.source_external_id_column.as_deref(),
            Some("external_id")
        );
        let inh = companies.inheritance.as_ref().unwrap();
        assert_eq!(inh.source_parent_key, "internal_company_id");
        assert_eq!(inh.parent.unique_key, Some(vec!["entity_id".to_string()]));

        let prices = &config.load_definition("prices").unwrap().spec;
        let batch = prices.batch.as_ref().unwrap();
        assert!(batch.drop_indexes);
        assert!(!batch.fail_fast);
        assert_eq!(
            prices.strategy,
            Some(StrategyConfig::VolumeBased { target_rows: 50000 })
        );
    }

    #[test]
    fn test_embedded_entities() {
        let config = Config::from_yaml(YAML).unwrap();
        let table = TableRef::parse("master.currency").unwrap();
        let entity = config.embedded_entity(&table).unwrap();
        assert_eq!(entity.primary_key, vec!["code".to_string()]);
        assert!(!entity.columns[0].is_nullable);
        assert!(entity.columns[1].is_nullable);
    }

    #[test]
    fn test_unknown_load() {
        let config = Config::from_yaml(YAML).unwrap();
        let err = config.load_definition("nope").unwrap_err();
        assert!(err.to_string().contains("no load named 'nope'"));
        assert!(err.to_string().contains("currencies, companies, prices"));
    }

    #[test]
    fn test_start_date_floor_env_overrides_file() {
        let file = NaiveDate::from_ymd_opt(2010, 1, 1);
        assert_eq!(resolve_start_date_floor(None, file).unwrap(), file);
        assert_eq!(
            resolve_start_date_floor(Some("2015-06-30"), file).unwrap(),
            NaiveDate::from_ymd_opt(2015, 6, 30)
        );
        assert_eq!(resolve_start_date_floor(Some("  "), file).unwrap(), file);
        assert!(resolve_start_date_floor(Some("30/06/2015"), file).is_err());
    }

    #[test]
    fn test_connection_string_omits_password() {
        let config = Config::from_yaml(YAML).unwrap();
        let conn = config.database.connection_string();
        assert!(conn.contains("host=db.internal"));
        assert!(!conn.contains("secret"));
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(Config::from_yaml("database: [").is_err());
    }
}
