//! `INSERT ... ON CONFLICT` statements.

use crate::core::{quote_ident, quote_list, TableRef};
use crate::load_config::{AuditConfig, LoadConfig};

use super::source::{source_cte, SOURCE_CTE};
use super::{col, distinct_condition, list, SOURCE_ALIAS, TARGET_ALIAS};

/// One upsert statement reading from a named row set aliased `src`.
#[derive(Debug, Clone)]
pub struct UpsertStatement {
    pub target: TableRef,
    /// FROM clause body, e.g. `source_query src`.
    pub from: String,
    /// `(target column, source expression)` inserted.
    pub insert: Vec<(String, String)>,
    pub conflict: Vec<String>,
    /// Target columns refreshed from `EXCLUDED` on conflict.
    pub update: Vec<String>,
    /// Assignments appended verbatim to the conflict update.
    pub extra_set: Vec<String>,
    /// Skip the update when no refreshed column differs.
    pub only_changed: bool,
    pub audit: AuditConfig,
    pub returning: Vec<String>,
}

impl UpsertStatement {
    pub fn new(target: TableRef, from: impl Into<String>) -> Self {
        Self {
            target,
            from: from.into(),
            insert: Vec::new(),
            conflict: Vec::new(),
            update: Vec::new(),
            extra_set: Vec::new(),
            only_changed: true,
            audit: AuditConfig::default(),
            returning: Vec::new(),
        }
    }

    pub fn for_config(config: &LoadConfig, source: &str) -> Self {
        let mut stmt = Self::new(
            config.target_table.clone(),
            format!("{} {}", source, SOURCE_ALIAS),
        );
        stmt.insert = config
            .insert_columns()
            .iter()
            .map(|c| (c.clone(), col(SOURCE_ALIAS, config.source_column(c))))
            .collect();
        stmt.conflict = config.unique_key.clone();
        stmt.update = config.data_columns();
        stmt.audit = config.audit;
        stmt
    }

    pub fn with_returning(mut self, returning: Vec<String>) -> Self {
        self.returning = returning;
        self
    }

    pub fn to_sql(&self) -> String {
        let mut columns: Vec<String> = self.insert.iter().map(|(t, _)| quote_ident(t)).collect();
        let mut values: Vec<String> = self.insert.iter().map(|(_, expr)| expr.clone()).collect();
        for audit_col in self.audit.insert_columns() {
            columns.push(audit_col.to_string());
            values.push("CURRENT_TIMESTAMP".to_string());
        }

        let mut sql = format!(
            "INSERT INTO {} AS {} ({})\nSELECT {}\nFROM {}\nON CONFLICT ({}) DO",
            self.target.quoted(),
            TARGET_ALIAS,
            list(&columns),
            list(&values),
            self.from,
            quote_list(&self.conflict)
        );

        if self.update.is_empty() && self.extra_set.is_empty() {
            // Nothing to refresh: duplicates are ignored
            sql.push_str(" NOTHING");
        } else {
            let pairs: Vec<(String, String)> = self
                .update
                .iter()
                .map(|c| (c.clone(), format!("EXCLUDED.{}", quote_ident(c))))
                .collect();
            let mut set: Vec<String> = pairs
                .iter()
                .map(|(c, expr)| format!("{} = {}", quote_ident(c), expr))
                .collect();
            if self.audit.with_updated_at {
                set.push("updated_at = CURRENT_TIMESTAMP".to_string());
            }
            set.extend(self.extra_set.iter().cloned());
            sql.push_str(&format!(" UPDATE SET {}", list(&set)));
            if self.only_changed && !pairs.is_empty() {
                sql.push_str(&format!(
                    "\nWHERE {}",
                    distinct_condition(TARGET_ALIAS, &pairs)
                ));
            }
        }

        if !self.returning.is_empty() {
            sql.push_str(&format!("\nRETURNING {}", list(&self.returning)));
        }
        sql
    }
}

/// Plain upsert: `WITH source_query AS (...) INSERT ... ON CONFLICT ...`.
pub fn render(config: &LoadConfig, windowed: bool) -> String {
    format!(
        "WITH {}\n{}",
        source_cte(config, windowed),
        UpsertStatement::for_config(config, SOURCE_CTE).to_sql()
    )
}
