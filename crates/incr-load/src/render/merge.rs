//! `MERGE INTO ... USING ...` statements.

use crate::core::{quote_ident, TableRef};
use crate::load_config::{AuditConfig, LoadConfig};

use super::source::{source_cte, target_window, SOURCE_CTE};
use super::{col, distinct_condition, key_join, list, SOURCE_ALIAS, TARGET_ALIAS};

/// What happens to target rows missing from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteAction {
    Keep,
    Soft,
    Hard,
}

impl DeleteAction {
    pub fn for_config(config: &LoadConfig) -> Self {
        if config.with_soft_delete {
            DeleteAction::Soft
        } else if config.hard_delete {
            DeleteAction::Hard
        } else {
            DeleteAction::Keep
        }
    }
}

/// One MERGE statement. Column pairs carry already-formatted source expressions.
#[derive(Debug, Clone)]
pub struct MergeStatement {
    pub target: TableRef,
    pub source: String,
    /// `(source column, target column)` match pairs.
    pub on: Vec<(String, String)>,
    /// `(target column, source expression)` for `WHEN NOT MATCHED`.
    pub insert: Vec<(String, String)>,
    /// `(target column, source expression)` for `WHEN MATCHED`.
    pub update: Vec<(String, String)>,
    pub audit: AuditConfig,
    /// Skip matched rows that are already soft-deleted.
    pub soft_delete_guard: bool,
    pub delete: DeleteAction,
    /// Extra predicates on `tgt` for `WHEN NOT MATCHED BY SOURCE`.
    pub delete_conditions: Vec<String>,
    pub returning: Vec<String>,
}

impl MergeStatement {
    pub fn new(target: TableRef, source: impl Into<String>) -> Self {
        Self {
            target,
            source: source.into(),
            on: Vec::new(),
            insert: Vec::new(),
            update: Vec::new(),
            audit: AuditConfig::default(),
            soft_delete_guard: false,
            delete: DeleteAction::Keep,
            delete_conditions: Vec::new(),
            returning: Vec::new(),
        }
    }

    /// Statement for a plain load of `config` from `source`.
    pub fn for_config(config: &LoadConfig, source: &str, windowed: bool) -> Self {
        let src = |c: &String| col(SOURCE_ALIAS, config.source_column(c));
        let mut stmt = Self::new(config.target_table.clone(), source);
        stmt.on = config
            .unique_key
            .iter()
            .map(|k| (config.source_column(k).to_string(), k.clone()))
            .collect();
        stmt.insert = config.insert_columns().iter().map(|c| (c.clone(), src(c))).collect();
        stmt.update = config.data_columns().iter().map(|c| (c.clone(), src(c))).collect();
        stmt.audit = config.audit;
        stmt.soft_delete_guard = config.with_soft_delete;
        stmt.delete = DeleteAction::for_config(config);
        stmt.delete_conditions = delete_conditions(config, windowed);
        stmt
    }

    pub fn with_returning(mut self, returning: Vec<String>) -> Self {
        self.returning = returning;
        self
    }

    pub fn to_sql(&self) -> String {
        let mut sql = format!(
            "MERGE INTO {} AS {}\nUSING {} AS {}\nON {}",
            self.target.quoted(),
            TARGET_ALIAS,
            self.source,
            SOURCE_ALIAS,
            key_join(SOURCE_ALIAS, TARGET_ALIAS, &self.on)
        );

        if !self.update.is_empty() {
            let guard = if self.soft_delete_guard {
                format!(" AND {} IS NULL", col(TARGET_ALIAS, "deleted_at"))
            } else {
                String::new()
            };
            let mut set = self
                .update
                .iter()
                .map(|(t, expr)| format!("{} = {}", quote_ident(t), expr))
                .collect::<Vec<_>>();
            if self.audit.with_updated_at {
                set.push("updated_at = CURRENT_TIMESTAMP".to_string());
            }
            sql.push_str(&format!(
                "\nWHEN MATCHED{} AND {} THEN\n    UPDATE SET {}",
                guard,
                distinct_condition(TARGET_ALIAS, &self.update),
                list(&set)
            ));
        }

        let mut columns: Vec<String> = self.insert.iter().map(|(t, _)| quote_ident(t)).collect();
        let mut values: Vec<String> = self.insert.iter().map(|(_, expr)| expr.clone()).collect();
        for audit_col in self.audit.insert_columns() {
            columns.push(audit_col.to_string());
            values.push("CURRENT_TIMESTAMP".to_string());
        }
        sql.push_str(&format!(
            "\nWHEN NOT MATCHED THEN\n    INSERT ({})\n    VALUES ({})",
            list(&columns),
            list(&values)
        ));

        let mut conditions = self.delete_conditions.clone();
        match self.delete {
            DeleteAction::Keep => {}
            DeleteAction::Soft => {
                conditions.insert(0, format!("{} IS NULL", col(TARGET_ALIAS, "deleted_at")));
                sql.push_str(&format!(
                    "\nWHEN NOT MATCHED BY SOURCE AND {} THEN\n    UPDATE SET deleted_at = CURRENT_TIMESTAMP",
                    conditions.join(" AND ")
                ));
            }
            DeleteAction::Hard => {
                let guard = if conditions.is_empty() {
                    String::new()
                } else {
                    format!(" AND {}", conditions.join(" AND "))
                };
                sql.push_str(&format!(
                    "\nWHEN NOT MATCHED BY SOURCE{} THEN\n    DELETE",
                    guard
                ));
            }
        }

        if !self.returning.is_empty() {
            sql.push_str(&format!("\nRETURNING {}", list(&self.returning)));
        }
        sql
    }
}

/// Window scope and caller exclusion for deletes by source.
pub fn delete_conditions(config: &LoadConfig, windowed: bool) -> Vec<String> {
    let mut conditions: Vec<String> = target_window(config, TARGET_ALIAS, windowed)
        .into_iter()
        .collect();
    if let Some(exclude) = &config.exclude_from_delete {
        conditions.push(format!("NOT ({})", exclude));
    }
    conditions
}

/// Plain merge: `WITH source_query AS (...) MERGE INTO ...`.
pub fn render(config: &LoadConfig, windowed: bool) -> String {
    let stmt = MergeStatement::for_config(config, SOURCE_CTE, windowed);
    format!("WITH {}\n{}", source_cte(config, windowed), stmt.to_sql())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, EntityDescription};
    use crate::load_config::fixtures::*;
    use crate::load_config::{BatchConfig, LoadOptions, LoadScheme};

    fn currency_merge(opts: LoadOptions) -> String {
        render(&LoadConfig::from_entity(&currency(), opts).unwrap(), false)
    }

    fn merge_opts() -> LoadOptions {
        LoadOptions::new(LoadScheme::Merge, t("intermediate.int_currency"))
    }

    #[test]
    fn test_simple_merge() {
        let sql = currency_merge(merge_opts());
        assert!(sql.starts_with("WITH source_query AS ("));
        assert!(sql.contains("MERGE INTO master.currency AS tgt"));
        assert!(sql.contains("USING source_query AS src"));
        assert!(sql.contains("ON src.code = tgt.code"));
        assert!(sql.contains(
            "WHEN MATCHED AND (tgt.name IS DISTINCT FROM src.name) THEN\n    UPDATE SET name = src.name"
        ));
        assert!(sql.contains("WHEN NOT MATCHED THEN\n    INSERT (code, name)\n    VALUES (src.code, src.name)"));
        assert!(!sql.contains("NOT MATCHED BY SOURCE"));
    }

    #[test]
    fn test_composite_key() {
        let cfg = LoadConfig::from_entity(
            &market_data(),
            LoadOptions::new(LoadScheme::Merge, t("intermediate.int_market_data")),
        )
        .unwrap();
        let sql = render(&cfg, false);
        assert!(sql.contains("ON src.instrument_id = tgt.instrument_id\n    AND src.date = tgt.date"));
    }

    #[test]
    fn test_audit_columns() {
        let mut audit = AuditConfig::full();
        audit.with_deleted_at = false;
        let sql = currency_merge(merge_opts().with_audit(audit));
        assert!(sql.contains("UPDATE SET name = src.name, updated_at = CURRENT_TIMESTAMP"));
        assert!(sql.contains("INSERT (code, name, created_at, updated_at)"));
        assert!(sql.contains("VALUES (src.code, src.name, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)"));
    }

    #[test]
    fn test_soft_delete() {
        let sql = currency_merge(
            merge_opts()
                .with_audit(AuditConfig::full())
                .with_soft_delete()
                .with_exclude_from_delete("tgt.code = 'XXX'"),
        );
        assert!(sql.contains("WHEN MATCHED AND tgt.deleted_at IS NULL AND ("));
        assert!(sql.contains(
            "WHEN NOT MATCHED BY SOURCE AND tgt.deleted_at IS NULL AND NOT (tgt.code = 'XXX') THEN\n    UPDATE SET deleted_at = CURRENT_TIMESTAMP"
        ));
    }

    #[test]
    fn test_hard_delete_scoped_to_window() {
        let cfg = LoadConfig::from_entity(
            &market_data(),
            LoadOptions::new(LoadScheme::Merge, t("intermediate.int_market_data"))
                .with_column_mapping("date", "trade_date")
                .with_batch(BatchConfig::new("trade_date"))
                .with_hard_delete(),
        )
        .unwrap();
        let sql = render(&cfg, true);
        assert!(sql.contains("WHERE trade_date >= CAST(:start_date AS date)"));
        assert!(sql.contains("ON src.instrument_id = tgt.instrument_id\n    AND src.trade_date = tgt.date"));
        assert!(sql.contains(
            "WHEN NOT MATCHED BY SOURCE AND tgt.date >= CAST(:start_date AS date) AND tgt.date <= CAST(:end_date AS date) THEN\n    DELETE"
        ));
        assert!(sql.contains("INSERT (instrument_id, date, close, volume)"));
        assert!(sql.contains("VALUES (src.instrument_id, src.trade_date, src.close, src.volume)"));
    }

    #[test]
    fn test_unwindowed_hard_delete_unscoped() {
        let sql = currency_merge(merge_opts().with_hard_delete());
        assert!(sql.contains("WHEN NOT MATCHED BY SOURCE THEN\n    DELETE"));
    }

    #[test]
    fn test_no_data_columns_skips_matched_clause() {
        let entity = EntityDescription::new(
            t("master.region"),
            vec![Column::new("region_code", "text").not_null()],
        )
        .with_primary_key(&["region_code"]);
        let cfg = LoadConfig::from_entity(
            &entity,
            LoadOptions::new(LoadScheme::Merge, t("intermediate.int_region")),
        )
        .unwrap();
        let sql = render(&cfg, false);
        assert!(!sql.contains("WHEN MATCHED"));
        assert!(sql.contains("WHEN NOT MATCHED THEN"));
    }

    #[test]
    fn test_generated_key_left_to_database() {
        let cfg = LoadConfig::from_entity(
            &entity(),
            LoadOptions::new(LoadScheme::Merge, t("intermediate.int_entity"))
                .with_unique_key(&["entity_id"]),
        )
        .unwrap();
        let sql = render(&cfg, false);
        assert!(sql.contains("ON src.entity_id = tgt.entity_id"));
        assert!(sql.contains("INSERT (entity_type_id, name)"));
    }

    #[test]
    fn test_returning() {
        let stmt = MergeStatement::new(t("master.company"), "stg_source")
            .with_returning(vec!["tgt.company_id".into(), "src.external_id".into()]);
        assert!(stmt.to_sql().ends_with("RETURNING tgt.company_id, src.external_id"));
    }
}
