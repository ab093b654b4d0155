//! Post-load resolution of columns that reference the same table.
//!
//! Rows in one load may point at each other, so the referencing columns are
//! left out of the main statement and filled afterwards with a separate
//! `UPDATE ... FROM` once every referenced row exists.

use crate::core::quote_ident;
use crate::error::{LoadError, Result};
use crate::load_config::{LoadConfig, MappingConfig};

use super::source::source_window;
use super::{col, distinct_condition, key_join, list, SOURCE_ALIAS, TARGET_ALIAS};

const SELF_MAP_ALIAS: &str = "self_map";

/// Returns `None` when the load has no self-referencing columns.
pub fn render(config: &LoadConfig, windowed: bool) -> Result<Option<String>> {
    let Some(self_ref) = &config.self_reference else {
        return Ok(None);
    };
    if self_ref.columns.is_empty() {
        return Ok(None);
    }

    let sql = if self_ref.requires_mapping {
        let mapping = config.mapping.as_ref().ok_or_else(|| {
            LoadError::Render(format!(
                "{}: self_reference requires mapping but no mapping is configured",
                config.target_table
            ))
        })?;
        through_mapping(config, mapping, windowed)?
    } else {
        through_natural_key(config, windowed)?
    };
    Ok(Some(sql))
}

fn ref_alias(i: usize) -> String {
    format!("ref_{}", i + 1)
}

/// Identity pairs `(mapping column, source column)` locating a source row's
/// own mapping entry.
fn identity_pairs(mapping: &MappingConfig) -> Vec<(String, String)> {
    let mut pairs = vec![(
        mapping.mapping_external_column.clone(),
        mapping.source_external_id_column.clone(),
    )];
    pairs.push((
        mapping.data_source_column.clone(),
        mapping.data_source_column.clone(),
    ));
    if let (Some(mapping_type), Some(source_type)) =
        (&mapping.mapping_type_column, mapping.source_type())
    {
        pairs.push((mapping_type.clone(), source_type.to_string()));
    }
    pairs
}

/// The source already carries internal ids for the referencing columns; one
/// join to the mapping table finds the target row each source row became.
fn through_mapping(config: &LoadConfig, mapping: &MappingConfig, windowed: bool) -> Result<String> {
    let internal = config.internal_id_column.as_deref().ok_or_else(|| {
        LoadError::Render(format!(
            "{}: self_reference through mapping needs a single-column internal id",
            config.target_table
        ))
    })?;
    let columns = config
        .self_reference
        .as_ref()
        .map(|s| &s.columns)
        .ok_or_else(|| LoadError::Render("self_reference not configured".into()))?;

    let joins = vec![format!(
        "JOIN {} {}\n  ON {}",
        mapping.mapping_table.quoted(),
        SELF_MAP_ALIAS,
        key_join(SELF_MAP_ALIAS, SOURCE_ALIAS, &identity_pairs(mapping))
    )];
    let assignments: Vec<(String, String)> = columns
        .iter()
        .map(|(target, source)| (target.clone(), col(SOURCE_ALIAS, source)))
        .collect();

    let mut conditions = vec![format!(
        "{} = {}",
        col(TARGET_ALIAS, internal),
        col(SELF_MAP_ALIAS, &mapping.mapping_internal_column)
    )];
    Ok(update_sql(config, &assignments, &joins, &mut conditions, windowed))
}

fn through_natural_key(config: &LoadConfig, windowed: bool) -> Result<String> {
    let key = match config.unique_key.as_slice() {
        [key] => key.as_str(),
        _ => {
            return Err(LoadError::Render(format!(
                "{}: self_reference without mapping needs a single-column unique_key",
                config.target_table
            )))
        }
    };
    let columns = config
        .self_reference
        .as_ref()
        .map(|s| &s.columns)
        .ok_or_else(|| LoadError::Render("self_reference not configured".into()))?;

    let target_table = config.target_table.quoted();
    let mut joins = Vec::new();
    let mut assignments: Vec<(String, String)> = Vec::new();
    for (i, (target, source)) in columns.iter().enumerate() {
        let alias = ref_alias(i);
        joins.push(format!(
            "LEFT JOIN {} {}\n  ON {} = {}",
            target_table,
            alias,
            col(&alias, key),
            col(SOURCE_ALIAS, source)
        ));
        assignments.push((target.clone(), col(&alias, key)));
    }

    let mut conditions = vec![format!(
        "{} = {}",
        col(TARGET_ALIAS, key),
        col(SOURCE_ALIAS, config.source_column(key))
    )];
    Ok(update_sql(config, &assignments, &joins, &mut conditions, windowed))
}

fn update_sql(
    config: &LoadConfig,
    assignments: &[(String, String)],
    joins: &[String],
    conditions: &mut Vec<String>,
    windowed: bool,
) -> String {
    let set: Vec<String> = assignments
        .iter()
        .map(|(t, expr)| format!("{} = {}", quote_ident(t), expr))
        .collect();
    conditions.extend(source_window(config, Some(SOURCE_ALIAS), windowed));
    conditions.push(distinct_condition(TARGET_ALIAS, assignments));

    format!(
        "UPDATE {} AS {}\nSET {}\nFROM {} {}\n{}\nWHERE {}",
        config.target_table.quoted(),
        TARGET_ALIAS,
        list(&set),
        config.source_table.quoted(),
        SOURCE_ALIAS,
        joins.join("\n"),
        conditions.join("\n  AND ")
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::load_config::fixtures::*;
    use crate::core::{Column, EntityDescription};
    use crate::load_config::{BatchConfig, LoadOptions, LoadScheme, MappingOverrides, SelfReferenceConfig};

    fn self_ref(requires_mapping: bool) -> SelfReferenceConfig {
        let mut columns = BTreeMap::new();
        columns.insert("primary_company_id".to_string(), "primary_ticker".to_string());
        SelfReferenceConfig {
            columns,
            requires_mapping,
        }
    }

    #[test]
    fn test_absent_renders_nothing() {
        let cfg = LoadConfig::from_entity(
            &currency(),
            LoadOptions::new(LoadScheme::Merge, t("intermediate.int_currency")),
        )
        .unwrap();
        assert!(render(&cfg, false).unwrap().is_none());
    }

    #[test]
    fn test_natural_key_self_join() {
        let cfg = LoadConfig::from_entity(
            &company(),
            LoadOptions::new(LoadScheme::Merge, t("intermediate.int_company"))
                .with_batch(BatchConfig::new("as_of_date"))
                .with_self_reference(self_ref(false)),
        )
        .unwrap();
        let sql = render(&cfg, true).unwrap().unwrap();

        assert!(sql.starts_with("UPDATE master.company AS tgt\nSET primary_company_id = ref_1.company_id"));
        assert!(sql.contains("FROM intermediate.int_company src"));
        assert!(sql.contains("LEFT JOIN master.company ref_1\n  ON ref_1.company_id = src.primary_ticker"));
        assert!(sql.contains("WHERE tgt.company_id = src.company_id"));
        assert!(sql.contains("AND src.as_of_date >= CAST(:start_date AS date)"));
        assert!(sql.contains("AND (tgt.primary_company_id IS DISTINCT FROM ref_1.company_id)"));
    }

    fn entity_mapping_config() -> MappingConfig {
        let overrides = MappingOverrides {
            source_external_id_column: Some("external_id".into()),
            ..Default::default()
        };
        MappingConfig::from_entity(&entity_mapping(), &t("master.entity"), &overrides).unwrap()
    }

    #[test]
    fn test_resolves_through_mapping() {
        let mut columns = BTreeMap::new();
        columns.insert("primary_company_id".to_string(), "primary_company_id".to_string());
        let cfg = LoadConfig::from_entity(
            &company(),
            LoadOptions::new(LoadScheme::Merge, t("intermediate.int_company"))
                .with_mapping(entity_mapping_config())
                .with_self_reference(SelfReferenceConfig {
                    columns,
                    requires_mapping: true,
                }),
        )
        .unwrap();
        let sql = render(&cfg, false).unwrap().unwrap();

        assert!(sql.starts_with("UPDATE master.company AS tgt\nSET primary_company_id = src.primary_company_id"));
        assert!(sql.contains("FROM intermediate.int_company src"));
        assert!(sql.contains("JOIN master.entity_mapping self_map\n  ON self_map.external_entity_id = src.external_id"));
        assert!(sql.contains("AND self_map.data_source_id = src.data_source_id"));
        assert!(sql.contains("WHERE tgt.company_id = self_map.internal_entity_id"));
        assert!(sql.contains("(tgt.primary_company_id IS DISTINCT FROM src.primary_company_id)"));
        assert!(!sql.contains("LEFT JOIN"));
        assert!(!sql.contains(":start_date"));
    }

    #[test]
    fn test_one_mapping_join_for_many_columns() {
        let organisation = EntityDescription::new(
            t("master.company"),
            vec![
                Column::new("company_id", "integer").not_null(),
                Column::new("ticker", "text"),
                Column::new("primary_company_id", "integer"),
                Column::new("ultimate_organization_id", "integer"),
                Column::new("parent_company_id", "integer"),
            ],
        )
        .with_primary_key(&["company_id"]);

        let columns: BTreeMap<String, String> = [
            "primary_company_id",
            "ultimate_organization_id",
            "parent_company_id",
        ]
        .iter()
        .map(|c| (c.to_string(), c.to_string()))
        .collect();
        let cfg = LoadConfig::from_entity(
            &organisation,
            LoadOptions::new(LoadScheme::Merge, t("intermediate.int_company"))
                .with_mapping(entity_mapping_config())
                .with_self_reference(SelfReferenceConfig {
                    columns,
                    requires_mapping: true,
                }),
        )
        .unwrap();
        let sql = render(&cfg, false).unwrap().unwrap();

        assert_eq!(sql.matches("JOIN master.entity_mapping").count(), 1);
        assert!(sql.contains("parent_company_id = src.parent_company_id"));
        assert!(sql.contains("primary_company_id = src.primary_company_id"));
        assert!(sql.contains("ultimate_organization_id = src.ultimate_organization_id"));
        assert!(sql.contains("WHERE tgt.company_id = self_map.internal_entity_id"));
    }
}
