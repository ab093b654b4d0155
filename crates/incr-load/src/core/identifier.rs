//! Identifier validation and quoting for generated SQL.
//!
//! Table and column names cannot be bound as statement parameters, so every
//! identifier that reaches rendered SQL is validated when a load is configured
//! and quoted when it is written out. Quoting follows PostgreSQL's own
//! `quote_ident()`: plain lower-case names are emitted bare, anything else
//! (mixed case, spaces, reserved words) is wrapped in double quotes.
//!
//! Caller-supplied SQL fragments (`order_by`, delete exclusions) cannot be
//! quoted; [`validate_sql_fragment`] screens them for statement separators and
//! comments instead.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LoadError, Result};

/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1).
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Schema used when a table name is given without one.
pub const DEFAULT_SCHEMA: &str = "public";

/// Reserved words that must be quoted even when lower-case.
const RESERVED: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric", "both",
    "case", "cast", "check", "collate", "column", "constraint", "create", "current_catalog",
    "current_date", "current_role", "current_time", "current_timestamp", "current_user",
    "default", "deferrable", "desc", "distinct", "do", "else", "end", "except", "false",
    "fetch", "for", "foreign", "from", "grant", "group", "having", "in", "initially",
    "intersect", "into", "lateral", "leading", "limit", "localtime", "localtimestamp", "not",
    "null", "offset", "on", "only", "or", "order", "placing", "primary", "references",
    "returning", "select", "session_user", "some", "symmetric", "table", "then", "to",
    "trailing", "true", "union", "unique", "user", "using", "variadic", "when", "where",
    "window", "with",
];

/// Validate an identifier.
///
/// Rejects empty names, names containing null bytes and names longer than
/// PostgreSQL keeps.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LoadError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(LoadError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(LoadError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Validate then quote a PostgreSQL identifier.
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(quote_ident(name))
}

/// Quote an identifier that has already been validated.
///
/// Mirrors PostgreSQL `quote_ident()`: quotes are added only when needed and
/// embedded double quotes are doubled.
pub fn quote_ident(name: &str) -> String {
    if is_plain_identifier(name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Quote and join a column list with `", "`.
pub fn quote_list<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let first_ok = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    first_ok
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$')
        && !RESERVED.contains(&name)
}

/// Qualify a PostgreSQL table name with schema.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}

/// A `schema.table` reference.
///
/// Serialized as the unquoted `schema.table` string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    /// Build a reference from validated parts.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let table = Self {
            schema: schema.into(),
            name: name.into(),
        };
        validate_identifier(&table.schema)?;
        validate_identifier(&table.name)?;
        Ok(table)
    }

    /// Parse `schema.table`, or a bare `table` placed in `public`.
    pub fn parse(qualified: &str) -> Result<Self> {
        let trimmed = qualified.trim();
        let parts: Vec<&str> = trimmed.split('.').collect();
        match parts.as_slice() {
            [table] => Self::new(DEFAULT_SCHEMA, *table),
            [schema, table] => Self::new(*schema, *table),
            _ => Err(LoadError::Config(format!(
                "Invalid table name '{}': expected 'schema.table'",
                qualified
            ))),
        }
    }

    /// Quoted `schema.table` for SQL text.
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

impl TryFrom<String> for TableRef {
    type Error = LoadError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TableRef> for String {
    fn from(table: TableRef) -> Self {
        table.to_string()
    }
}

/// Screen a caller-supplied SQL fragment (ORDER BY list, delete exclusion).
///
/// Fragments are written into statements verbatim, so anything that could end
/// the statement or hide the rest of it is rejected: semicolons, comment
/// markers and unbalanced quotes or parentheses.
pub fn validate_sql_fragment(kind: &str, fragment: &str) -> Result<()> {
    if fragment.trim().is_empty() {
        return Err(LoadError::Config(format!("{} cannot be empty", kind)));
    }

    if fragment.contains(';') {
        return Err(LoadError::Config(format!(
            "SECURITY: {} contains semicolon (possible injection): {:?}",
            kind, fragment
        )));
    }

    if fragment.contains("--") || fragment.contains("/*") || fragment.contains("*/") {
        return Err(LoadError::Config(format!(
            "SECURITY: {} contains SQL comment markers (possible injection): {:?}",
            kind, fragment
        )));
    }

    if fragment.matches('\'').count() % 2 != 0 || fragment.matches('"').count() % 2 != 0 {
        return Err(LoadError::Config(format!(
            "{} has unbalanced quotes: {:?}",
            kind, fragment
        )));
    }

    let mut depth: i32 = 0;
    for c in fragment.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    break;
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(LoadError::Config(format!(
            "{} has unbalanced parentheses: {:?}",
            kind, fragment
        )));
    }

    Ok(())
}
