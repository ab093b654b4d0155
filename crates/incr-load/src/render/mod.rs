//! SQL generation for the four load schemes.
//!
//! [`render`] turns a validated [`LoadConfig`] into a [`RenderedSql`]: an ordered
//! list of statements, each tagged with the role it plays in the transaction.
//! Window bounds and the CDC resume version are written as the named
//! placeholders `:start_date`, `:end_date` and `:last_version`; [`bind_named`]
//! rewrites them to positional `$n` parameters at execution time.
//!
//! Composite operations (mapping, inheritance) are chained as data-modifying
//! CTEs inside the load statement so that the whole window commits together.
//!
//! # Modules
//!
//! - [`source`]: the shared `source_query` CTE and window predicates
//! - [`merge`], [`upsert`], [`insert`], [`cdc`]: one builder per scheme
//! - [`mapping`]: mapping-table append chained after a load
//! - [`inheritance`]: parent/child composition
//! - [`self_ref`]: deferred self-referencing foreign key fix-up

pub mod cdc;
pub mod inheritance;
pub mod insert;
pub mod mapping;
pub mod merge;
pub mod self_ref;
pub mod source;
pub mod upsert;

use chrono::NaiveDate;
use serde::Serialize;

use crate::core::value::SqlParam;
use crate::core::{quote_ident, BoundStatement, RowCount, StatementRole};
use crate::error::{LoadError, Result};
use crate::load_config::{LoadConfig, LoadScheme};

/// Alias of the target table in generated statements.
pub const TARGET_ALIAS: &str = "tgt";

/// Alias of the source row set in generated statements.
pub const SOURCE_ALIAS: &str = "src";

/// One statement of a rendered load.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub role: StatementRole,
    pub sql: String,
}

/// Ordered statements executed in one transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedSql {
    pub statements: Vec<SqlStatement>,
}

impl RenderedSql {
    pub fn push(&mut self, role: StatementRole, sql: impl Into<String>) {
        self.statements.push(SqlStatement {
            role,
            sql: sql.into(),
        });
    }

    /// SQL of the main load statement.
    pub fn load_sql(&self) -> Option<&str> {
        self.statements
            .iter()
            .find(|s| matches!(s.role, StatementRole::Load(_)))
            .map(|s| s.sql.as_str())
    }

    /// All statements as one script, for dry runs and logs.
    pub fn to_script(&self) -> String {
        self.statements
            .iter()
            .map(|s| format!("{};", s.sql.trim_end()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Bind every statement's named placeholders.
    pub fn bind(&self, params: &LoadParams) -> Result<Vec<BoundStatement>> {
        self.statements
            .iter()
            .map(|s| {
                let (sql, values) = bind_named(&s.sql, params)?;
                Ok(BoundStatement {
                    role: s.role,
                    sql,
                    params: values,
                })
            })
            .collect()
    }
}

/// Runtime values for the named placeholders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadParams {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub last_version: Option<i64>,
}

impl LoadParams {
    /// Parameters of one batch window.
    pub fn window(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date: Some(start_date),
            end_date: Some(end_date),
            last_version: None,
        }
    }

    pub fn with_last_version(mut self, version: i64) -> Self {
        self.last_version = Some(version);
        self
    }

    /// True when both window bounds are set.
    pub fn is_windowed(&self) -> bool {
        self.start_date.is_some() && self.end_date.is_some()
    }

    fn value(&self, name: &str) -> Result<SqlParam> {
        let value = match name {
            "start_date" => self.start_date.map(SqlParam::Date),
            "end_date" => self.end_date.map(SqlParam::Date),
            "last_version" => self.last_version.map(SqlParam::BigInt),
            other => {
                return Err(LoadError::Render(format!(
                    "Unknown parameter ':{}'",
                    other
                )))
            }
        };
        value.ok_or_else(|| LoadError::Render(format!("No value bound for ':{}'", name)))
    }
}

/// Rewrite `:name` placeholders to `$n` and collect their values.
///
/// A name used twice reuses its position. Quoted text, `::` casts and `--`
/// comments are copied unchanged.
pub fn bind_named(sql: &str, params: &LoadParams) -> Result<(String, Vec<SqlParam>)> {
    let mut out = String::with_capacity(sql.len());
    let mut names: Vec<String> = Vec::new();
    let mut values = Vec::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                out.push(c);
                for n in chars.by_ref() {
                    out.push(n);
                    if n == c {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                out.push(c);
                for n in chars.by_ref() {
                    out.push(n);
                    if n == '\n' {
                        break;
                    }
                }
            }
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                out.push_str("::");
            }
            ':' if chars
                .peek()
                .map_or(false, |n| n.is_ascii_alphabetic() || *n == '_') =>
            {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        name.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let index = match names.iter().position(|existing| *existing == name) {
                    Some(i) => i,
                    None => {
                        values.push(params.value(&name)?);
                        names.push(name);
                        names.len() - 1
                    }
                };
                out.push_str(&format!("${}", index + 1));
            }
            _ => out.push(c),
        }
    }

    Ok((out, values))
}

/// Render a load. `windowed` restricts the source (and any deletes) to
/// `[:start_date, :end_date]` on the batch date column.
pub fn render(config: &LoadConfig, windowed: bool) -> Result<RenderedSql> {
    if windowed && config.batch.is_none() {
        return Err(LoadError::Render(format!(
            "{}: window requested but no batch_date_column is configured",
            config.target_table
        )));
    }

    let mut rendered = RenderedSql::default();

    if let Some(sql) = session_setting(config) {
        rendered.push(StatementRole::Session, sql);
    }

    let (sql, count) = match (config.scheme, &config.inheritance) {
        (LoadScheme::Merge, Some(_)) | (LoadScheme::Upsert, Some(_)) => {
            (inheritance::render(config, windowed)?, RowCount::Selected)
        }
        (LoadScheme::Merge, None) if config.mapping.is_some() => {
            (mapping::render_merge(config, windowed)?, RowCount::Selected)
        }
        (LoadScheme::Upsert, None) if config.mapping.is_some() => {
            (mapping::render_upsert(config, windowed)?, RowCount::Selected)
        }
        (LoadScheme::Merge, None) => (merge::render(config, windowed), RowCount::Affected),
        (LoadScheme::Upsert, None) => (upsert::render(config, windowed), RowCount::Affected),
        (LoadScheme::Insert, _) => (insert::render(config, windowed), RowCount::Affected),
        (LoadScheme::Cdc, _) => (cdc::render(config, windowed)?, RowCount::Selected),
    };
    rendered.push(StatementRole::Load(count), sql);

    if let Some(sql) = self_ref::render(config, windowed)? {
        rendered.push(StatementRole::SelfReference, sql);
    }

    Ok(rendered)
}

/// `SET LOCAL` of the hypertable decompression limit (merge and CDC).
fn session_setting(config: &LoadConfig) -> Option<String> {
    let applies = matches!(config.scheme, LoadScheme::Merge | LoadScheme::Cdc);
    match (applies, config.is_hypertable, config.hypertable_decompression_limit) {
        (true, true, Some(limit)) => Some(format!(
            "SET LOCAL timescaledb.max_tuples_decompressed_per_dml_transaction = {}",
            limit
        )),
        _ => None,
    }
}

// Shared fragment helpers used by the scheme builders.

/// `alias.column`, quoted.
pub(crate) fn col(alias: &str, column: &str) -> String {
    format!("{}.{}", alias, quote_ident(column))
}

/// Join items with `", "`.
pub(crate) fn list(items: &[String]) -> String {
    items.join(", ")
}

/// `src.a = tgt.a AND src.b = tgt.b` over `(source, target)` column pairs.
pub(crate) fn key_join(left: &str, right: &str, pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(l, r)| format!("{} = {}", col(left, l), col(right, r)))
        .collect::<Vec<_>>()
        .join("\n    AND ")
}

/// `(tgt.a IS DISTINCT FROM src.a OR ...)` over `(target, source expr)` pairs.
pub(crate) fn distinct_condition(target_alias: &str, assignments: &[(String, String)]) -> String {
    let items = assignments
        .iter()
        .map(|(t, expr)| format!("{} IS DISTINCT FROM {}", col(target_alias, t), expr))
        .collect::<Vec<_>>();
    format!("({})", items.join(" OR "))
}

/// Indent every line of a CTE body.
pub(crate) fn indent(sql: &str) -> String {
    sql.lines()
        .map(|l| {
            if l.is_empty() {
                String::new()
            } else {
                format!("    {}", l)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `name AS (\n    body\n)`.
pub(crate) fn cte(name: &str, body: &str) -> String {
    format!("{} AS (\n{}\n)", name, indent(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    // =========================================================================
    // Binder tests
    // =========================================================================

    #[test]
    fn test_bind_named_positions() {
        let params = LoadParams::window(date("2024-01-01"), date("2024-01-31"));
        let (sql, values) = bind_named(
            "SELECT * FROM t WHERE d >= :start_date AND d <= :end_date OR d = :start_date",
            &params,
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM t WHERE d >= $1 AND d <= $2 OR d = $1"
        );
        assert_eq!(
            values,
            vec![
                SqlParam::Date(date("2024-01-01")),
                SqlParam::Date(date("2024-01-31"))
            ]
        );
    }

    #[test]
    fn test_bind_skips_casts_quotes_and_comments() {
        let params = LoadParams::default().with_last_version(7);
        let sql = "SELECT ':start_date', x::text, \"a:b\" -- :end_date\nFROM t WHERE v > :last_version";
        let (bound, values) = bind_named(sql, &params).unwrap();
        assert_eq!(
            bound,
            "SELECT ':start_date', x::text, \"a:b\" -- :end_date\nFROM t WHERE v > $1"
        );
        assert_eq!(values, vec![SqlParam::BigInt(7)]);
    }

    #[test]
    fn test_bind_missing_value_fails() {
        let err = bind_named("SELECT :start_date", &LoadParams::default()).unwrap_err();
        assert!(err.to_string().contains("No value bound for ':start_date'"));

        let err = bind_named("SELECT :nope", &LoadParams::default()).unwrap_err();
        assert!(err.to_string().contains("Unknown parameter"));
    }

    #[test]
    fn test_rendered_script() {
        let mut rendered = RenderedSql::default();
        rendered.push(StatementRole::Session, "SET LOCAL x = 1");
        rendered.push(StatementRole::Load(RowCount::Affected), "DELETE FROM t\n");
        assert_eq!(rendered.to_script(), "SET LOCAL x = 1;\n\nDELETE FROM t;");
        assert_eq!(rendered.load_sql(), Some("DELETE FROM t\n"));
    }

    #[test]
    fn test_cte_indents_body() {
        assert_eq!(cte("a", "SELECT 1\nFROM t"), "a AS (\n    SELECT 1\n    FROM t\n)");
    }
}
