//! Parameter values bound to rendered statements.
//!
//! Rendered SQL only ever binds window dates and the CDC resume version, so the
//! value set is small. Keeping it as a closed enum lets statements be logged,
//! compared in tests and converted to driver types in one place.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A value bound to a positional `$n` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    /// A `date` value (batch window bound).
    Date(NaiveDate),
    /// A `bigint` value (change version).
    BigInt(i64),
}

impl fmt::Display for SqlParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlParam::Date(d) => write!(f, "'{}'::date", d.format("%Y-%m-%d")),
            SqlParam::BigInt(v) => write!(f, "{}", v),
        }
    }
}

/// Format a parameter list for logs: `[$1 = '2024-01-01'::date, $2 = 17]`.
pub fn format_params(params: &[SqlParam]) -> String {
    let items: Vec<String> = params
        .iter()
        .enumerate()
        .map(|(i, p)| format!("${} = {}", i + 1, p))
        .collect();
    format!("[{}]", items.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_params() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let text = format_params(&[SqlParam::Date(d), SqlParam::BigInt(42)]);
        assert_eq!(text, "[$1 = '2024-01-31'::date, $2 = 42]");
    }

    #[test]
    fn test_format_params_empty() {
        assert_eq!(format_params(&[]), "[]");
    }
}
