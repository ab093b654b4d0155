//! Parent/child ("is-a") composition.
//!
//! One statement chains the parent load, the resolution of each source row's
//! parent id, and the child load:
//!
//! ```text
//! source_query → merge_parent → enriched_parent → merge_child
//!                            ↘ mapping_insert
//! ```
//!
//! Without a mapping table the child sees only rows the parent load returned.
//! With one, `COALESCE(parent result, mapping)` also resolves parents whose own
//! data did not change, so their child rows can still be updated.

use crate::core::quote_ident;
use crate::error::{LoadError, Result};
use crate::load_config::{InheritanceConfig, LoadConfig, LoadScheme, MappingConfig};

use super::mapping::{mapping_insert, returning_identity, source_identity_columns};
use super::merge::{delete_conditions, DeleteAction, MergeStatement};
use super::source::{source_cte, SOURCE_CTE};
use super::upsert::UpsertStatement;
use super::{col, cte, key_join, SOURCE_ALIAS, TARGET_ALIAS};

/// Output name of the parent id in the parent CTE.
const PARENT_ID: &str = "parent_id";

/// Output name of the parent key in the upsert parent CTE.
const PARENT_KEY: &str = "parent_key";

const ENRICHED_CTE: &str = "enriched_parent";

pub fn render(config: &LoadConfig, windowed: bool) -> Result<String> {
    let inh = config.inheritance.as_deref().ok_or_else(|| {
        LoadError::Render(format!(
            "{}: no inheritance configured",
            config.target_table
        ))
    })?;
    match config.scheme {
        LoadScheme::Merge => Ok(render_merge(config, inh, windowed)),
        LoadScheme::Upsert => Ok(render_upsert(config, inh, windowed)),
        other => Err(LoadError::Render(format!(
            "{}: inheritance is not supported for {} scheme",
            config.target_table, other
        ))),
    }
}

fn render_merge(config: &LoadConfig, inh: &InheritanceConfig, windowed: bool) -> String {
    let mapping = config.mapping.as_ref();

    let mut parent = MergeStatement::new(inh.parent_table.clone(), SOURCE_CTE);
    parent.on = vec![(inh.source_parent_key.clone(), inh.parent_unique_key.clone())];
    parent.insert = parent_insert(inh);
    parent.update = parent_update(inh);
    parent.audit = inh.parent_config.audit;
    let mut returning = vec![format!(
        "{} AS {}",
        col(TARGET_ALIAS, &inh.parent_id_column),
        PARENT_ID
    )];
    match mapping {
        Some(m) => returning.extend(returning_identity(m, SOURCE_ALIAS)),
        None => returning.push(col(SOURCE_ALIAS, &inh.source_parent_key)),
    }
    let parent = parent.with_returning(returning);

    let join = match mapping {
        Some(m) => {
            let identity: Vec<(String, String)> = source_identity_columns(m)
                .into_iter()
                .map(|c| (c.clone(), c))
                .collect();
            format!("LEFT JOIN merge_parent mp\n  ON {}", key_join("mp", SOURCE_ALIAS, &identity))
        }
        None => format!(
            "JOIN merge_parent mp\n  ON {} = {}",
            col("mp", &inh.source_parent_key),
            col(SOURCE_ALIAS, &inh.source_parent_key)
        ),
    };
    let enriched = enriched_parent(config, inh, &join);

    let mut child = MergeStatement::new(inh.child_table.clone(), ENRICHED_CTE);
    child.on = vec![(inh.child_unique_key.clone(), inh.child_unique_key.clone())];
    child.insert = child_insert(config, inh);
    child.update = child_update(config, inh);
    child.audit = config.audit;
    child.soft_delete_guard = config.with_soft_delete;
    child.delete = DeleteAction::for_config(config);
    child.delete_conditions = delete_conditions(config, windowed);
    let child = child.with_returning(vec![col(TARGET_ALIAS, &inh.child_unique_key)]);

    let mut ctes = vec![
        source_cte(config, windowed),
        cte("merge_parent", &parent.to_sql()),
        cte(ENRICHED_CTE, &enriched),
        cte("merge_child", &child.to_sql()),
    ];
    if let Some(m) = mapping {
        ctes.push(mapping_insert(
            m,
            "merge_parent mp",
            "mp",
            &format!("mp.{}", PARENT_ID),
        ));
    }

    format!(
        "WITH {}\nSELECT (SELECT COUNT(*) FROM merge_child)",
        ctes.join(",\n")
    )
}

fn render_upsert(config: &LoadConfig, inh: &InheritanceConfig, windowed: bool) -> String {
    let mapping = config.mapping.as_ref();

    let mut parent = UpsertStatement::new(
        inh.parent_table.clone(),
        format!("{} {}", SOURCE_CTE, SOURCE_ALIAS),
    );
    parent.insert = parent_insert(inh);
    parent.conflict = vec![inh.parent_unique_key.clone()];
    parent.update = parent_update(inh).into_iter().map(|(c, _)| c).collect();
    parent.audit = inh.parent_config.audit;
    let parent = parent.with_returning(vec![
        format!("{} AS {}", col(TARGET_ALIAS, &inh.parent_id_column), PARENT_ID),
        format!("{} AS {}", col(TARGET_ALIAS, &inh.parent_unique_key), PARENT_KEY),
    ]);

    let key_match = format!(
        "{} = {}",
        col("up", PARENT_KEY),
        col(SOURCE_ALIAS, &inh.source_parent_key)
    );
    let join = match mapping {
        Some(_) => format!("LEFT JOIN upsert_parent up\n  ON {}", key_match),
        None => format!("JOIN upsert_parent up\n  ON {}", key_match),
    };
    let enriched = enriched_parent(config, inh, &join);

    let mut child = UpsertStatement::new(
        inh.child_table.clone(),
        format!("{} {}", ENRICHED_CTE, SOURCE_ALIAS),
    );
    child.insert = child_insert(config, inh);
    child.conflict = vec![inh.child_unique_key.clone()];
    child.update = child_update(config, inh).into_iter().map(|(c, _)| c).collect();
    child.audit = config.audit;
    let child = child.with_returning(vec![col(TARGET_ALIAS, &inh.child_unique_key)]);

    let mut ctes = vec![
        source_cte(config, windowed),
        cte("upsert_parent", &parent.to_sql()),
        cte(ENRICHED_CTE, &enriched),
        cte("upsert_child", &child.to_sql()),
    ];
    if let Some(m) = mapping {
        let rows = format!("upsert_parent up\nJOIN {} {}\n  ON {}", SOURCE_CTE, SOURCE_ALIAS, key_match);
        ctes.push(mapping_insert(
            m,
            &rows,
            SOURCE_ALIAS,
            &format!("up.{}", PARENT_ID),
        ));
    }

    format!(
        "WITH {}\nSELECT (SELECT COUNT(*) FROM upsert_child)",
        ctes.join(",\n")
    )
}

/// Parent insert list; the parent key is fed from `source_parent_key`.
fn parent_insert(inh: &InheritanceConfig) -> Vec<(String, String)> {
    let parent = &inh.parent_config;
    parent
        .insert_columns()
        .into_iter()
        .map(|c| {
            let expr = if c == inh.parent_unique_key {
                col(SOURCE_ALIAS, &inh.source_parent_key)
            } else {
                col(SOURCE_ALIAS, parent.source_column(&c))
            };
            (c, expr)
        })
        .collect()
}

fn parent_update(inh: &InheritanceConfig) -> Vec<(String, String)> {
    let parent = &inh.parent_config;
    parent
        .data_columns()
        .into_iter()
        .map(|c| {
            let expr = col(SOURCE_ALIAS, parent.source_column(&c));
            (c, expr)
        })
        .collect()
}

/// Child insert list: the resolved parent id becomes the child key.
fn child_insert(config: &LoadConfig, inh: &InheritanceConfig) -> Vec<(String, String)> {
    let mut insert = vec![(
        inh.child_unique_key.clone(),
        col(SOURCE_ALIAS, &inh.child_unique_key),
    )];
    insert.extend(child_update(config, inh));
    insert
}

/// Child update list. The shared key is never reassigned.
fn child_update(config: &LoadConfig, inh: &InheritanceConfig) -> Vec<(String, String)> {
    inh.child_data_columns()
        .into_iter()
        .map(|c| {
            let expr = col(SOURCE_ALIAS, config.source_column(&c));
            (c, expr)
        })
        .collect()
}

/// Source rows with their resolved parent id, aliased as the child key.
fn enriched_parent(config: &LoadConfig, inh: &InheritanceConfig, parent_join: &str) -> String {
    let mapping = config.mapping.as_ref();
    let parent_alias = if config.scheme == LoadScheme::Upsert { "up" } else { "mp" };
    let parent_id = col(parent_alias, PARENT_ID);

    let key_expr = match mapping {
        Some(m) => format!(
            "COALESCE({}, {})",
            parent_id,
            col("em", &m.mapping_internal_column)
        ),
        None => parent_id,
    };

    let mut selected: Vec<String> = Vec::new();
    for c in inh.child_data_columns() {
        push_unique(&mut selected, config.source_column(&c).to_string());
    }

    let mut select = vec![format!("{} AS {}", key_expr, quote_ident(&inh.child_unique_key))];
    select.extend(selected.iter().map(|c| col(SOURCE_ALIAS, c)));

    let mut sql = format!(
        "SELECT {}\nFROM {} {}\n{}",
        select.join(", "),
        SOURCE_CTE,
        SOURCE_ALIAS,
        parent_join
    );
    if let Some(m) = mapping {
        sql.push_str(&format!("\n{}", mapping_lookup(m)));
        sql.push_str(&format!("\nWHERE {} IS NOT NULL", key_expr));
    }
    sql
}

/// `LEFT JOIN mapping em ON em.ds = src.ds ...`.
fn mapping_lookup(mapping: &MappingConfig) -> String {
    let pairs: Vec<(String, String)> = mapping
        .conflict_columns()
        .into_iter()
        .map(String::from)
        .zip(source_identity_columns(mapping))
        .collect();
    format!(
        "LEFT JOIN {} em\n  ON {}",
        mapping.mapping_table.quoted(),
        key_join("em", SOURCE_ALIAS, &pairs)
    )
}

fn push_unique(items: &mut Vec<String>, item: String) {
    if !items.contains(&item) {
        items.push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, EntityDescription};
    use crate::load_config::fixtures::*;
    use crate::load_config::{LoadOptions, MappingOverrides};

    fn merge_parent_config() -> LoadConfig {
        LoadConfig::from_entity(
            &entity(),
            LoadOptions::new(LoadScheme::Merge, t("intermediate.int_company"))
                .with_unique_key(&["entity_id"]),
        )
        .unwrap()
    }

    fn natural_entity() -> EntityDescription {
        EntityDescription::new(
            t("master.entity"),
            vec![
                Column::new("entity_id", "integer").not_null(),
                Column::new("entity_type_id", "integer").not_null(),
                Column::new("name", "text"),
            ],
        )
        .with_primary_key(&["entity_id"])
    }

    fn entity_mapping_config() -> MappingConfig {
        let overrides = MappingOverrides {
            source_external_id_column: Some("external_id".into()),
            ..Default::default()
        };
        MappingConfig::from_entity(&entity_mapping(), &t("master.entity"), &overrides).unwrap()
    }

    fn company_config(opts: LoadOptions) -> LoadConfig {
        LoadConfig::from_entity(&company(), opts).unwrap()
    }

    #[test]
    fn test_merge_without_mapping() {
        let cfg = company_config(
            LoadOptions::new(LoadScheme::Merge, t("intermediate.int_company"))
                .with_inheritance(merge_parent_config(), "internal_company_id"),
        );
        let sql = render(&cfg, false).unwrap();

        assert!(sql.contains("merge_parent AS ("));
        assert!(sql.contains("MERGE INTO master.entity AS tgt"));
        assert!(sql.contains("ON src.internal_company_id = tgt.entity_id"));
        assert!(sql.contains("INSERT (entity_type_id, name)"));
        assert!(sql.contains("RETURNING tgt.entity_id AS parent_id, src.internal_company_id"));

        assert!(sql.contains("enriched_parent AS ("));
        assert!(sql.contains("SELECT mp.parent_id AS company_id, src.ticker, src.sector, src.primary_company_id"));
        assert!(sql.contains("JOIN merge_parent mp\n      ON mp.internal_company_id = src.internal_company_id"));
        assert!(!sql.contains("COALESCE"));

        assert!(sql.contains("merge_child AS ("));
        assert!(sql.contains("MERGE INTO master.company AS tgt"));
        assert!(sql.contains("USING enriched_parent AS src"));
        assert!(sql.contains("INSERT (company_id, ticker, sector, primary_company_id)"));
        assert!(sql.ends_with("SELECT (SELECT COUNT(*) FROM merge_child)"));
    }

    #[test]
    fn test_child_update_never_reassigns_key() {
        let cfg = company_config(
            LoadOptions::new(LoadScheme::Merge, t("intermediate.int_company"))
                .with_inheritance(merge_parent_config(), "internal_company_id"),
        );
        let sql = render(&cfg, false).unwrap();
        let child = &sql[sql.find("merge_child AS").unwrap()..];
        let update_line = child.lines().find(|l| l.contains("UPDATE SET")).unwrap();
        assert!(!update_line.contains("company_id ="));
        assert!(update_line.contains("ticker = src.ticker"));
    }

    #[test]
    fn test_merge_with_mapping_coalesces_parent_id() {
        let cfg = company_config(
            LoadOptions::new(LoadScheme::Merge, t("intermediate.int_company"))
                .with_inheritance(merge_parent_config(), "internal_company_id")
                .with_mapping(entity_mapping_config()),
        );
        let sql = render(&cfg, false).unwrap();

        assert!(sql.contains(
            "RETURNING tgt.entity_id AS parent_id, src.data_source_id, src.entity_type_id, src.external_id"
        ));
        assert!(sql.contains("COALESCE(mp.parent_id, em.internal_entity_id) AS company_id"));
        assert!(sql.contains("FROM source_query src"));
        assert!(sql.contains("LEFT JOIN merge_parent mp"));
        assert!(sql.contains("LEFT JOIN master.entity_mapping em"));
        assert!(sql.contains("ON em.data_source_id = src.data_source_id"));
        assert!(sql.contains("AND em.external_entity_id = src.external_id"));
        assert!(sql.contains("WHERE COALESCE(mp.parent_id, em.internal_entity_id) IS NOT NULL"));
        assert!(sql.contains("mapping_insert AS ("));
        assert!(sql.contains("FROM merge_parent mp"));
    }

    #[test]
    fn test_mapping_enables_windowed_child_delete() {
        let opts = LoadOptions::new(LoadScheme::Merge, t("intermediate.int_company"))
            .with_inheritance(merge_parent_config(), "internal_company_id")
            .with_mapping(entity_mapping_config())
            .with_hard_delete()
            .with_exclude_from_delete("tgt.sector = 'Fund'");
        let sql = render(&company_config(opts), false).unwrap();
        let child = &sql[sql.find("merge_child AS").unwrap()..];
        assert!(child.contains("WHEN NOT MATCHED BY SOURCE AND NOT (tgt.sector = 'Fund') THEN"));
    }

    #[test]
    fn test_delete_without_mapping_rejected() {
        let opts = LoadOptions::new(LoadScheme::Merge, t("intermediate.int_company"))
            .with_inheritance(merge_parent_config(), "internal_company_id")
            .with_hard_delete();
        assert!(LoadConfig::from_entity(&company(), opts).is_err());
    }

    #[test]
    fn test_upsert_inheritance() {
        let parent = LoadConfig::from_entity(
            &natural_entity(),
            LoadOptions::new(LoadScheme::Upsert, t("intermediate.int_company")),
        )
        .unwrap();
        let cfg = company_config(
            LoadOptions::new(LoadScheme::Upsert, t("intermediate.int_company"))
                .with_inheritance(parent, "natural_key"),
        );
        let sql = render(&cfg, false).unwrap();

        assert!(sql.contains("upsert_parent AS ("));
        assert!(sql.contains("INSERT INTO master.entity AS tgt (entity_id, entity_type_id, name)"));
        assert!(sql.contains("SELECT src.natural_key, src.entity_type_id, src.name"));
        assert!(sql.contains("ON CONFLICT (entity_id) DO UPDATE SET"));
        assert!(sql.contains("RETURNING tgt.entity_id AS parent_id, tgt.entity_id AS parent_key"));
        assert!(sql.contains("JOIN upsert_parent up\n      ON up.parent_key = src.natural_key"));
        assert!(sql.contains("upsert_child AS ("));
        assert!(sql.contains("INSERT INTO master.company AS tgt (company_id, ticker, sector, primary_company_id)"));
        assert!(sql.contains("FROM enriched_parent src"));
        assert!(sql.contains("ON CONFLICT (company_id)"));
        assert!(sql.ends_with("SELECT (SELECT COUNT(*) FROM upsert_child)"));
    }

    #[test]
    fn test_upsert_inheritance_with_mapping() {
        let parent = LoadConfig::from_entity(
            &natural_entity(),
            LoadOptions::new(LoadScheme::Upsert, t("intermediate.int_company")),
        )
        .unwrap();
        let cfg = company_config(
            LoadOptions::new(LoadScheme::Upsert, t("intermediate.int_company"))
                .with_inheritance(parent, "natural_key")
                .with_mapping(entity_mapping_config()),
        );
        let sql = render(&cfg, false).unwrap();
        assert!(sql.contains("COALESCE(up.parent_id, em.internal_entity_id) AS company_id"));
        assert!(sql.contains("LEFT JOIN upsert_parent up"));
        assert!(sql.contains("FROM upsert_parent up\n    JOIN source_query src"));
    }
}
