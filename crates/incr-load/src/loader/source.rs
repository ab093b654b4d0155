//! What a loader executes.
//!
//! A [`LoadSource`] yields the statements for one execution. The usual source
//! is [`TemplateSource`], which renders a [`LoadConfig`]; [`SqlFileSource`]
//! runs a hand-written script with the same named parameters.

use std::path::Path;

use crate::core::{RowCount, StatementRole, TableRef};
use crate::error::{LoadError, Result};
use crate::load_config::LoadConfig;
use crate::render::{self, RenderedSql};

/// Statements for one load execution.
pub trait LoadSource: Send + Sync {
    /// Target label used in logs and results.
    fn target(&self) -> String;

    /// Scheme label used in logs and results.
    fn scheme(&self) -> String;

    /// Columns written by the load, when known.
    fn columns(&self) -> Vec<String> {
        Vec::new()
    }

    /// Render the statements; `windowed` restricts them to one batch window.
    fn render(&self, windowed: bool) -> Result<RenderedSql>;

    /// Tracking table whose last version feeds `:last_version`.
    fn tracking_table(&self) -> Option<&TableRef> {
        None
    }
}

/// Source rendered from a [`LoadConfig`].
#[derive(Debug, Clone)]
pub struct TemplateSource {
    config: LoadConfig,
}

impl TemplateSource {
    pub fn new(config: LoadConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }
}

impl LoadSource for TemplateSource {
    fn target(&self) -> String {
        self.config.target_description()
    }

    fn scheme(&self) -> String {
        self.config.scheme.to_string()
    }

    fn columns(&self) -> Vec<String> {
        self.config.columns.clone()
    }

    fn render(&self, windowed: bool) -> Result<RenderedSql> {
        render::render(&self.config, windowed)
    }

    fn tracking_table(&self) -> Option<&TableRef> {
        self.config.cdc.as_ref().map(|c| &c.tracking_table)
    }
}

/// A SQL script executed verbatim, one statement per `;`.
#[derive(Debug, Clone)]
pub struct SqlFileSource {
    name: String,
    statements: Vec<String>,
}

impl SqlFileSource {
    /// Read and split a `.sql` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_sql(name, &content)
    }

    pub fn from_sql(name: impl Into<String>, sql: &str) -> Result<Self> {
        let name = name.into();
        let statements = split_statements(sql);
        if statements.is_empty() {
            return Err(LoadError::Config(format!(
                "{} contains no SQL statements",
                name
            )));
        }
        Ok(Self { name, statements })
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }
}

impl LoadSource for SqlFileSource {
    fn target(&self) -> String {
        self.name.clone()
    }

    fn scheme(&self) -> String {
        "sql".to_string()
    }

    fn render(&self, _windowed: bool) -> Result<RenderedSql> {
        let mut rendered = RenderedSql::default();
        for sql in &self.statements {
            rendered.push(StatementRole::Load(RowCount::Affected), sql.clone());
        }
        Ok(rendered)
    }
}

/// Split a script on `;` outside quotes, dollar-quoted bodies and comments.
/// Empty statements are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let end = match c {
            '\'' | '"' => {
                has_code = true;
                closing(&chars, i + 1, &[c])
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                closing(&chars, i + 2, &['\n'])
            }
            '/' if chars.get(i + 1) == Some(&'*') => closing(&chars, i + 2, &['*', '/']),
            '$' => match dollar_tag(&chars, i) {
                Some(tag) => {
                    has_code = true;
                    closing(&chars, i + tag.len(), &tag)
                }
                None => {
                    has_code = true;
                    i + 1
                }
            },
            ';' => {
                if has_code {
                    statements.push(current.trim().to_string());
                }
                current.clear();
                has_code = false;
                i += 1;
                continue;
            }
            _ => {
                if !c.is_whitespace() {
                    has_code = true;
                }
                i + 1
            }
        };
        current.extend(&chars[i..end]);
        i = end;
    }
    if has_code {
        statements.push(current.trim().to_string());
    }

    statements
}

/// Opening `$tag$` (or `$$`) at `start`. `$1` style parameters are not tags.
fn dollar_tag(chars: &[char], start: usize) -> Option<Vec<char>> {
    let mut end = start + 1;
    while let Some(&c) = chars.get(end) {
        if c == '$' {
            return Some(chars[start..=end].to_vec());
        }
        let valid = c == '_' || c.is_alphabetic() || (end > start + 1 && c.is_ascii_digit());
        if !valid {
            return None;
        }
        end += 1;
    }
    None
}

/// Index just past the first occurrence of `delimiter` at or after `from`,
/// or the end of input when it never closes.
fn closing(chars: &[char], from: usize, delimiter: &[char]) -> usize {
    let mut i = from;
    while i + delimiter.len() <= chars.len() {
        if chars[i..i + delimiter.len()] == *delimiter {
            return i + delimiter.len();
        }
        i += 1;
    }
    chars.len()
}
