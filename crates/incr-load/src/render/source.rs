//! Source selection shared by every scheme.

use crate::core::quote_ident;
use crate::load_config::LoadConfig;

use super::cte;

/// Name of the source CTE.
pub const SOURCE_CTE: &str = "source_query";

/// `col >= CAST(:start_date AS date) AND col <= CAST(:end_date AS date)`.
pub fn window_condition(alias: Option<&str>, column: &str) -> String {
    let column = match alias {
        Some(a) => format!("{}.{}", a, quote_ident(column)),
        None => quote_ident(column),
    };
    format!(
        "{} >= CAST(:start_date AS date) AND {} <= CAST(:end_date AS date)",
        column, column
    )
}

/// Window predicate on the source's batch column.
pub fn source_window(config: &LoadConfig, alias: Option<&str>, windowed: bool) -> Option<String> {
    match (&config.batch, windowed) {
        (Some(batch), true) => Some(window_condition(alias, &batch.batch_date_column)),
        _ => None,
    }
}

/// Window predicate on the target's batch column, for scoped deletes.
pub fn target_window(config: &LoadConfig, alias: &str, windowed: bool) -> Option<String> {
    if !windowed {
        return None;
    }
    config
        .target_batch_column()
        .map(|column| window_condition(Some(alias), column))
}

/// Body of the source selection, with extra predicates ANDed to the window.
pub fn source_select(config: &LoadConfig, windowed: bool, extra: &[String]) -> String {
    let mut sql = format!("SELECT *\nFROM {}", config.source_table.quoted());

    let mut conditions: Vec<String> = source_window(config, None, windowed).into_iter().collect();
    conditions.extend(extra.iter().cloned());
    if !conditions.is_empty() {
        sql.push_str(&format!("\nWHERE {}", conditions.join("\n  AND ")));
    }

    if let Some(order_by) = &config.order_by {
        sql.push_str(&format!("\nORDER BY {}", order_by));
    }
    sql
}

/// `source_query AS (...)`.
pub fn source_cte(config: &LoadConfig, windowed: bool) -> String {
    cte(SOURCE_CTE, &source_select(config, windowed, &[]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_config::fixtures::*;
    use crate::load_config::{BatchConfig, LoadOptions, LoadScheme};

    fn config(batch: Option<&str>, order_by: Option<&str>) -> LoadConfig {
        let mut opts = LoadOptions::new(LoadScheme::Merge, t("intermediate.int_market_data"));
        if let Some(col) = batch {
            opts = opts.with_batch(BatchConfig::new(col));
        }
        if let Some(o) = order_by {
            opts = opts.with_order_by(o);
        }
        LoadConfig::from_entity(&market_data(), opts).unwrap()
    }

    #[test]
    fn test_unbatched_source() {
        let sql = source_cte(&config(None, None), false);
        assert!(sql.starts_with("source_query AS ("));
        assert!(sql.contains("SELECT *"));
        assert!(sql.contains("FROM intermediate.int_market_data"));
        assert!(!sql.contains("WHERE"));
    }

    #[test]
    fn test_windowed_source() {
        let sql = source_cte(&config(Some("date"), None), true);
        assert!(sql.contains(
            "WHERE date >= CAST(:start_date AS date) AND date <= CAST(:end_date AS date)"
        ));
    }

    #[test]
    fn test_batched_but_not_windowed() {
        let sql = source_cte(&config(Some("date"), None), false);
        assert!(!sql.contains(":start_date"));
    }

    #[test]
    fn test_order_by_after_window() {
        let sql = source_cte(&config(Some("date"), Some("date DESC, instrument_id")), true);
        let where_at = sql.find("WHERE").unwrap();
        let order_at = sql.find("ORDER BY date DESC, instrument_id").unwrap();
        assert!(where_at < order_at);
    }

    #[test]
    fn test_reserved_column_quoted_in_window() {
        assert_eq!(
            window_condition(Some("tgt"), "order"),
            "tgt.\"order\" >= CAST(:start_date AS date) AND tgt.\"order\" <= CAST(:end_date AS date)"
        );
    }
}
