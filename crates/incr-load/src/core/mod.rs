//! Core abstractions shared by every part of the engine.
//!
//! - [`identifier`]: identifier validation, quoting and `schema.table` references
//! - [`schema`]: typed entity descriptions returned by the catalog
//! - [`value`]: parameter values bound to rendered statements
//! - [`traits`]: catalog, date statistics and statement execution seams

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use identifier::{quote_ident, quote_list, quote_pg, validate_sql_fragment, TableRef};
pub use schema::{Column, EntityDescription, ForeignKey, UniqueConstraint};
pub use traits::{
    BoundStatement, Catalog, ConstraintDef, ConstraintKind, DateStats, ExecutionOutcome,
    IndexDef, RowCount, StatementExecutor, StatementRole, TableSetting,
};
pub use value::SqlParam;
