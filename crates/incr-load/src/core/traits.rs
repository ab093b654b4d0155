//! Traits at the seam between the engine and the database.
//!
//! - [`Catalog`]: describe entities and run the DDL used around bulk loads
//! - [`DateStats`]: date statistics consumed by batch strategies
//! - [`StatementExecutor`]: transactional execution of rendered statements
//!
//! The Postgres backend implements all three. Loaders are generic over a
//! backend so that tests can substitute an in-memory recorder.
//!
//! DDL text is produced by the types in this module ([`IndexDef`],
//! [`ConstraintDef`], [`TableSetting`]) so that the same statement can be
//! executed or logged as a manual recovery step.

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::identifier::{quote_ident, TableRef};
use super::schema::EntityDescription;
use super::value::SqlParam;

/// Kind of a table constraint that can be dropped before a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    ForeignKey,
    PrimaryKey,
    Unique,
}

impl ConstraintKind {
    /// `pg_constraint.contype` code.
    pub fn contype(&self) -> &'static str {
        match self {
            ConstraintKind::ForeignKey => "f",
            ConstraintKind::PrimaryKey => "p",
            ConstraintKind::Unique => "u",
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConstraintKind::ForeignKey => "FOREIGN KEY",
            ConstraintKind::PrimaryKey => "PRIMARY KEY",
            ConstraintKind::Unique => "UNIQUE",
        };
        f.write_str(s)
    }
}

/// An index as recorded before it is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Schema holding the index.
    pub schema: String,
    /// Index name.
    pub name: String,
    /// Full `CREATE INDEX` statement (`pg_indexes.indexdef`).
    pub definition: String,
}

impl IndexDef {
    /// `DROP INDEX` statement.
    pub fn drop_sql(&self) -> String {
        format!(
            "DROP INDEX IF EXISTS {}.{}",
            quote_ident(&self.schema),
            quote_ident(&self.name)
        )
    }

    /// `CREATE INDEX` statement, optionally non-blocking.
    pub fn create_sql(&self, concurrently: bool) -> String {
        if concurrently && !self.definition.contains(" CONCURRENTLY ") {
            self.definition
                .replacen(" INDEX ", " INDEX CONCURRENTLY ", 1)
        } else {
            self.definition.clone()
        }
    }
}

/// A constraint as recorded before it is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintDef {
    /// Constraint name.
    pub name: String,
    /// Constraint kind.
    pub kind: ConstraintKind,
    /// Definition text (`pg_get_constraintdef`).
    pub definition: String,
}

impl ConstraintDef {
    /// `ALTER TABLE ... DROP CONSTRAINT` statement.
    pub fn drop_sql(&self, table: &TableRef) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
            table.quoted(),
            quote_ident(&self.name)
        )
    }

    /// `ALTER TABLE ... ADD CONSTRAINT` statement.
    ///
    /// Foreign keys are re-added `NOT VALID` so the existing rows are not
    /// rescanned.
    pub fn add_sql(&self, table: &TableRef) -> String {
        let mut sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {}",
            table.quoted(),
            quote_ident(&self.name),
            self.definition
        );
        if self.kind == ConstraintKind::ForeignKey && !self.definition.contains("NOT VALID") {
            sql.push_str(" NOT VALID");
        }
        sql
    }
}

/// Storage settings toggled while a table is in bulk mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableSetting {
    /// `autovacuum_enabled` storage parameter.
    Autovacuum(bool),
    /// LOGGED (true) or UNLOGGED (false).
    Logged(bool),
}

impl TableSetting {
    /// `ALTER TABLE` statement applying this setting.
    pub fn alter_sql(&self, table: &TableRef) -> String {
        match self {
            TableSetting::Autovacuum(enabled) => format!(
                "ALTER TABLE {} SET (autovacuum_enabled = {})",
                table.quoted(),
                enabled
            ),
            TableSetting::Logged(true) => format!("ALTER TABLE {} SET LOGGED", table.quoted()),
            TableSetting::Logged(false) => format!("ALTER TABLE {} SET UNLOGGED", table.quoted()),
        }
    }
}

/// How the row count of a load statement is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCount {
    /// Rows affected by the statement itself.
    Affected,
    /// First column of the single row the statement returns.
    Selected,
}

/// Role of a statement within a rendered load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementRole {
    /// Session/transaction setting applied before the load.
    Session,
    /// The load statement whose count becomes the result's `rowcount`.
    Load(RowCount),
    /// Deferred self-referencing foreign key fix-up.
    SelfReference,
}

/// A statement ready for execution: positional SQL and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub role: StatementRole,
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// Counts returned by executing a rendered load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Count from the load statement.
    pub rowcount: i64,
    /// Rows touched by the self-reference fix-up.
    pub self_reference_rows: i64,
}

/// Catalog introspection and DDL.
///
/// Only the query methods and [`Catalog::execute_ddl`] need implementing; the
/// DDL helpers are default methods built on the definition types above.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Read columns, keys and foreign keys of a table.
    async fn describe_entity(&self, table: &TableRef) -> Result<EntityDescription>;

    /// Indexes on a table that do not back a constraint.
    async fn list_indexes(&self, table: &TableRef) -> Result<Vec<IndexDef>>;

    /// Constraints of one kind on a table.
    async fn list_constraints(
        &self,
        table: &TableRef,
        kind: ConstraintKind,
    ) -> Result<Vec<ConstraintDef>>;

    /// Execute one DDL statement outside any explicit transaction.
    async fn execute_ddl(&self, sql: &str) -> Result<()>;

    /// Drop an index.
    async fn drop_index(&self, index: &IndexDef) -> Result<()> {
        self.execute_ddl(&index.drop_sql()).await
    }

    /// Recreate a dropped index.
    async fn create_index(&self, index: &IndexDef, concurrently: bool) -> Result<()> {
        self.execute_ddl(&index.create_sql(concurrently)).await
    }

    /// Drop a constraint.
    async fn drop_constraint(&self, table: &TableRef, constraint: &ConstraintDef) -> Result<()> {
        self.execute_ddl(&constraint.drop_sql(table)).await
    }

    /// Recreate a dropped constraint.
    async fn add_constraint(&self, table: &TableRef, constraint: &ConstraintDef) -> Result<()> {
        self.execute_ddl(&constraint.add_sql(table)).await
    }

    /// Remove every row (cascading to referencing tables).
    async fn truncate(&self, table: &TableRef) -> Result<()> {
        self.execute_ddl(&format!("TRUNCATE TABLE {} CASCADE", table.quoted()))
            .await
    }

    /// Apply a storage setting.
    async fn apply_setting(&self, table: &TableRef, setting: TableSetting) -> Result<()> {
        self.execute_ddl(&setting.alter_sql(table)).await
    }

    /// Refresh planner statistics.
    async fn analyze(&self, table: &TableRef) -> Result<()> {
        self.execute_ddl(&format!("ANALYZE {}", table.quoted())).await
    }
}

/// Date statistics over a source's batch column.
#[async_trait]
pub trait DateStats: Send + Sync {
    /// `MIN` and `MAX` of the column, `None` when the table is empty.
    async fn min_max_date(
        &self,
        table: &TableRef,
        column: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate)>>;

    /// `MIN` of the column.
    async fn min_date(&self, table: &TableRef, column: &str) -> Result<Option<NaiveDate>>;

    /// Row counts per distinct date, ordered by date.
    async fn daily_counts(&self, table: &TableRef, column: &str) -> Result<Vec<(NaiveDate, i64)>>;
}

/// Transactional execution of rendered statements.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Execute all statements in one transaction, in order.
    async fn execute_transaction(&self, statements: &[BoundStatement])
        -> Result<ExecutionOutcome>;

    /// Last processed change version recorded in a tracking table.
    async fn last_tracked_version(&self, tracking_table: &TableRef) -> Result<Option<i64>>;
}
