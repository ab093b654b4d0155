//! Unconditional append, used for truncate-then-reload batches.

use crate::core::quote_ident;
use crate::load_config::LoadConfig;

use super::source::{source_cte, SOURCE_CTE};
use super::{col, list, SOURCE_ALIAS};

pub fn render(config: &LoadConfig, windowed: bool) -> String {
    let insert_columns = config.insert_columns();
    let mut columns: Vec<String> = insert_columns.iter().map(|c| quote_ident(c)).collect();
    let mut values: Vec<String> = insert_columns
        .iter()
        .map(|c| col(SOURCE_ALIAS, config.source_column(c)))
        .collect();
    for audit_col in config.audit.insert_columns() {
        columns.push(audit_col.to_string());
        values.push("CURRENT_TIMESTAMP".to_string());
    }

    format!(
        "WITH {}\nINSERT INTO {} ({})\nSELECT {}\nFROM {} {}",
        source_cte(config, windowed),
        config.target_table.quoted(),
        list(&columns),
        list(&values),
        SOURCE_CTE,
        SOURCE_ALIAS
    )
}
