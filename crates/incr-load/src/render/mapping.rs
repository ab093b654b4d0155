//! Mapping-table append chained after a load.
//!
//! The loaded rows' external identities are recorded as
//! `(data_source, [type], external_id) → internal_id`. Existing tuples are left
//! alone (`ON CONFLICT DO NOTHING`), so the first writer of an identity wins.

use crate::core::{quote_ident, quote_list};
use crate::error::{LoadError, Result};
use crate::load_config::{LoadConfig, MappingConfig};

use super::merge::MergeStatement;
use super::source::{source_cte, SOURCE_CTE};
use super::upsert::UpsertStatement;
use super::{col, cte, key_join, SOURCE_ALIAS, TARGET_ALIAS};

/// Name of the mapping append CTE.
pub const MAPPING_CTE: &str = "mapping_insert";

/// Source-side columns carried to the mapping append, in conflict order.
pub fn source_identity_columns(mapping: &MappingConfig) -> Vec<String> {
    let mut cols = vec![mapping.data_source_column.clone()];
    if let Some(t) = mapping.source_type() {
        cols.push(t.to_string());
    }
    cols.push(mapping.source_external_id_column.clone());
    cols
}

/// `src.ds, src.type, src.ext` for a RETURNING list.
pub fn returning_identity(mapping: &MappingConfig, alias: &str) -> Vec<String> {
    source_identity_columns(mapping)
        .iter()
        .map(|c| col(alias, c))
        .collect()
}

/// `mapping_insert AS (INSERT INTO mapping ... ON CONFLICT ... DO NOTHING)`.
///
/// `rows` is a FROM clause whose alias `row_alias` exposes the source identity
/// columns; `internal_expr` yields the internal id.
pub fn mapping_insert(
    mapping: &MappingConfig,
    rows: &str,
    row_alias: &str,
    internal_expr: &str,
) -> String {
    let mut select: Vec<String> = returning_identity(mapping, row_alias);
    select.push(internal_expr.to_string());

    let conflict = mapping.conflict_columns();
    let mut insert_columns: Vec<&str> = conflict.clone();
    insert_columns.push(mapping.mapping_internal_column.as_str());

    let body = format!(
        "INSERT INTO {} ({})\nSELECT {}\nFROM {}\nWHERE {} IS NOT NULL\nON CONFLICT ({}) DO NOTHING\nRETURNING 1",
        mapping.mapping_table.quoted(),
        quote_list(&insert_columns),
        select.join(", "),
        rows,
        col(row_alias, &mapping.source_external_id_column),
        quote_list(&conflict)
    );
    cte(MAPPING_CTE, &body)
}

fn require_parts(config: &LoadConfig) -> Result<(&MappingConfig, &str)> {
    match (&config.mapping, &config.internal_id_column) {
        (Some(mapping), Some(internal)) => Ok((mapping, internal.as_str())),
        _ => Err(LoadError::Render(format!(
            "{}: mapping requires a mapping table and a single-column internal id",
            config.target_table
        ))),
    }
}

/// Merge, then append the mapping for every merged row.
pub fn render_merge(config: &LoadConfig, windowed: bool) -> Result<String> {
    let (mapping, internal) = require_parts(config)?;

    let mut returning = vec![col(TARGET_ALIAS, internal)];
    returning.extend(returning_identity(mapping, SOURCE_ALIAS));
    let merge = MergeStatement::for_config(config, SOURCE_CTE, windowed).with_returning(returning);

    Ok(format!(
        "WITH {},\n{},\n{}\nSELECT (SELECT COUNT(*) FROM merge_result)",
        source_cte(config, windowed),
        cte("merge_result", &merge.to_sql()),
        mapping_insert(
            mapping,
            "merge_result mr",
            "mr",
            &col("mr", internal)
        )
    ))
}

/// Upsert, then join the result back to the source to append the mapping.
pub fn render_upsert(config: &LoadConfig, windowed: bool) -> Result<String> {
    let (mapping, internal) = require_parts(config)?;

    let mut returning = vec![col(TARGET_ALIAS, internal)];
    returning.extend(
        config
            .unique_key
            .iter()
            .filter(|k| k.as_str() != internal)
            .map(|k| col(TARGET_ALIAS, k)),
    );
    let upsert = UpsertStatement::for_config(config, SOURCE_CTE).with_returning(returning);

    let key_pairs: Vec<(String, String)> = config
        .unique_key
        .iter()
        .map(|k| (config.source_column(k).to_string(), k.clone()))
        .collect();
    let rows = format!(
        "upsert_result ur\nJOIN {} {}\n  ON {}",
        SOURCE_CTE,
        SOURCE_ALIAS,
        key_join(SOURCE_ALIAS, "ur", &key_pairs)
    );

    Ok(format!(
        "WITH {},\n{},\n{}\nSELECT (SELECT COUNT(*) FROM upsert_result)",
        source_cte(config, windowed),
        cte("upsert_result", &upsert.to_sql()),
        mapping_insert(mapping, &rows, SOURCE_ALIAS, &format!("ur.{}", quote_ident(internal)))
    ))
}
