//! Loaders: run rendered statements against the target.
//!
//! - [`SimpleLoader`]: one execution in one transaction (optionally a dry run)
//! - [`BatchLoader`]: one transaction per batch window, wrapped in the DDL
//!   choreography of [`BatchConfig`](crate::load_config::BatchConfig)
//!
//! Both are generic over the database seams in [`crate::core::traits`], so
//! tests drive them against an in-memory recorder.

pub mod batch;
pub mod guard;
pub mod result;
pub mod simple;
pub mod source;

pub use batch::{plan_batches, BatchLoader};
pub use guard::{BulkLoadGuard, FinalizeReport};
pub use result::{
    BatchLoadResult, BatchOutcome, BatchStatus, DryRunResult, LoadOutput, SimpleLoadResult,
};
pub use simple::{dry_run, SimpleLoader};
pub use source::{split_statements, LoadSource, SqlFileSource, TemplateSource};

use tracing::error;

use crate::core::value::format_params;
use crate::core::{BoundStatement, Catalog, DateStats, StatementExecutor};
use crate::error::LoadError;

/// Everything a batched load needs from the database.
pub trait LoadBackend: Catalog + DateStats + StatementExecutor {}

impl<T: Catalog + DateStats + StatementExecutor> LoadBackend for T {}

/// Log a failed execution with the statements and parameters needed to
/// reproduce it by hand.
fn log_failure(target: &str, statements: &[BoundStatement], err: &LoadError) {
    error!("{}: load failed: {}", target, err);
    for stmt in statements {
        error!(
            "{}: statement:\n{}\nparameters: {}",
            target,
            stmt.sql,
            format_params(&stmt.params)
        );
    }
}

/// Database errors become statement errors naming the target; connection
/// problems keep their own kind.
fn statement_error(target: &str, err: LoadError) -> LoadError {
    match err {
        LoadError::Database(e) => LoadError::statement(target, e),
        other => other,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory backend recording every DDL and statement it receives.

    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use tokio_util::sync::CancellationToken;

    use crate::core::{
        BoundStatement, Catalog, ConstraintDef, ConstraintKind, DateStats, EntityDescription,
        ExecutionOutcome, IndexDef, RowCount, StatementExecutor, StatementRole, SqlParam,
        TableRef,
    };
    use crate::error::{LoadError, Result};

    #[derive(Default)]
    pub struct RecordingBackend {
        pub entities: Vec<EntityDescription>,
        pub indexes: Vec<IndexDef>,
        pub constraints: Vec<ConstraintDef>,
        pub bounds: Option<(NaiveDate, NaiveDate)>,
        pub counts: Vec<(NaiveDate, i64)>,
        /// Windows starting on these dates fail.
        pub failing_windows: Vec<NaiveDate>,
        /// DDL containing any of these fragments fails.
        pub failing_ddl: Vec<String>,
        pub rows_per_window: i64,
        pub last_version: Option<i64>,
        /// Cancelled after this many transactions.
        pub cancel_after: Option<(usize, CancellationToken)>,
        pub ddl: Mutex<Vec<String>>,
        pub executed: Mutex<Vec<Vec<BoundStatement>>>,
    }

    impl RecordingBackend {
        pub fn ddl(&self) -> Vec<String> {
            self.ddl.lock().unwrap().clone()
        }

        pub fn executed(&self) -> Vec<Vec<BoundStatement>> {
            self.executed.lock().unwrap().clone()
        }

        /// Position of the first DDL containing `fragment`.
        pub fn ddl_position(&self, fragment: &str) -> Option<usize> {
            self.ddl().iter().position(|d| d.contains(fragment))
        }
    }

    #[async_trait]
    impl Catalog for RecordingBackend {
        async fn describe_entity(&self, table: &TableRef) -> Result<EntityDescription> {
            self.entities
                .iter()
                .find(|e| &e.table == table)
                .cloned()
                .ok_or_else(|| LoadError::Config(format!("table {} does not exist", table)))
        }

        async fn list_indexes(&self, _table: &TableRef) -> Result<Vec<IndexDef>> {
            Ok(self.indexes.clone())
        }

        async fn list_constraints(
            &self,
            _table: &TableRef,
            kind: ConstraintKind,
        ) -> Result<Vec<ConstraintDef>> {
            Ok(self
                .constraints
                .iter()
                .filter(|c| c.kind == kind)
                .cloned()
                .collect())
        }

        async fn execute_ddl(&self, sql: &str) -> Result<()> {
            self.ddl.lock().unwrap().push(sql.to_string());
            if self.failing_ddl.iter().any(|f| sql.contains(f.as_str())) {
                return Err(LoadError::statement("ddl", format!("rejected: {}", sql)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DateStats for RecordingBackend {
        async fn min_max_date(
            &self,
            _table: &TableRef,
            _column: &str,
        ) -> Result<Option<(NaiveDate, NaiveDate)>> {
            Ok(self.bounds)
        }

        async fn min_date(&self, _table: &TableRef, _column: &str) -> Result<Option<NaiveDate>> {
            Ok(self.bounds.map(|b| b.0))
        }

        async fn daily_counts(
            &self,
            _table: &TableRef,
            _column: &str,
        ) -> Result<Vec<(NaiveDate, i64)>> {
            Ok(self.counts.clone())
        }
    }

    #[async_trait]
    impl StatementExecutor for RecordingBackend {
        async fn execute_transaction(
            &self,
            statements: &[BoundStatement],
        ) -> Result<ExecutionOutcome> {
            let done = {
                let mut executed = self.executed.lock().unwrap();
                executed.push(statements.to_vec());
                executed.len()
            };
            if let Some((after, token)) = &self.cancel_after {
                if done >= *after {
                    token.cancel();
                }
            }

            let window_start = statements
                .iter()
                .flat_map(|s| s.params.iter())
                .find_map(|p| match p {
                    SqlParam::Date(d) => Some(*d),
                    SqlParam::BigInt(_) => None,
                });
            if let Some(start) = window_start {
                if self.failing_windows.contains(&start) {
                    return Err(LoadError::statement("window", "duplicate key value"));
                }
            }

            let mut outcome = ExecutionOutcome::default();
            for stmt in statements {
                match stmt.role {
                    StatementRole::Load(RowCount::Affected | RowCount::Selected) => {
                        outcome.rowcount += self.rows_per_window
                    }
                    StatementRole::SelfReference => outcome.self_reference_rows += 1,
                    StatementRole::Session => {}
                }
            }
            Ok(outcome)
        }

        async fn last_tracked_version(&self, _tracking_table: &TableRef) -> Result<Option<i64>> {
            Ok(self.last_version)
        }
    }
}
