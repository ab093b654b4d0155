//! Restoration of everything a batched load takes apart.
//!
//! [`BulkLoadGuard`] records each dropped index, dropped constraint and
//! changed storage setting as it happens. [`BulkLoadGuard::release`] puts them
//! back and must run on every exit path. Restoration failures are logged with
//! the exact DDL for a manual fix and never replace the load's own result.
//!
//! A guard dropped without being released (the task was aborted mid-load)
//! cannot run async DDL, so it logs the recovery statements instead.

use tracing::{debug, error, info, warn};

use crate::core::{Catalog, ConstraintDef, IndexDef, TableRef, TableSetting};

/// What a release restored and what is left for manual recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeReport {
    pub indexes_restored: usize,
    pub constraints_restored: usize,
    pub settings_restored: usize,
    pub analyzed: bool,

    /// DDL that failed and must be run by hand.
    pub recovery_ddl: Vec<String>,
}

impl FinalizeReport {
    pub fn is_clean(&self) -> bool {
        self.recovery_ddl.is_empty()
    }
}

/// Scoped record of the bulk-load changes made to one table.
#[derive(Debug)]
pub struct BulkLoadGuard {
    table: TableRef,
    /// Partitioned tables cannot build indexes CONCURRENTLY.
    hypertable: bool,
    indexes: Vec<IndexDef>,
    /// In drop order.
    constraints: Vec<ConstraintDef>,
    /// Settings that undo what was entered, in entry order.
    settings: Vec<TableSetting>,
    released: bool,
}

impl BulkLoadGuard {
    pub fn new(table: TableRef, hypertable: bool) -> Self {
        Self {
            table,
            hypertable,
            indexes: Vec::new(),
            constraints: Vec::new(),
            settings: Vec::new(),
            released: false,
        }
    }

    pub fn record_index(&mut self, index: IndexDef) {
        self.indexes.push(index);
    }

    pub fn record_constraint(&mut self, constraint: ConstraintDef) {
        self.constraints.push(constraint);
    }

    /// Record the setting that restores the table on exit.
    pub fn record_setting(&mut self, restore: TableSetting) {
        self.settings.push(restore);
    }

    /// True when nothing needs restoring.
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty() && self.constraints.is_empty() && self.settings.is_empty()
    }

    /// Statements that restore everything still recorded, in execution order.
    pub fn recovery_ddl(&self) -> Vec<String> {
        let concurrently = !self.hypertable;
        self.indexes
            .iter()
            .map(|i| i.create_sql(concurrently))
            .chain(
                self.constraints
                    .iter()
                    .rev()
                    .map(|c| c.add_sql(&self.table)),
            )
            .chain(self.settings.iter().map(|s| s.alter_sql(&self.table)))
            .collect()
    }

    /// Recreate indexes, then constraints (reverse drop order), then leave
    /// bulk mode and refresh statistics.
    pub async fn release(mut self, catalog: &dyn Catalog) -> FinalizeReport {
        self.released = true;
        let mut report = FinalizeReport::default();
        let table = self.table.clone();
        let concurrently = !self.hypertable;

        let indexes = std::mem::take(&mut self.indexes);
        if !indexes.is_empty() {
            info!(
                "{}: recreating {} indexes{}",
                table,
                indexes.len(),
                if concurrently { " concurrently" } else { "" }
            );
        }
        for index in &indexes {
            match catalog.create_index(index, concurrently).await {
                Ok(()) => {
                    debug!("{}: recreated index {}", table, index.name);
                    report.indexes_restored += 1;
                }
                Err(e) => {
                    let ddl = index.create_sql(concurrently);
                    error!(
                        "{}: failed to recreate index {}: {}. Recovery DDL: {}",
                        table, index.name, e, ddl
                    );
                    report.recovery_ddl.push(ddl);
                }
            }
        }

        let constraints = std::mem::take(&mut self.constraints);
        for constraint in constraints.iter().rev() {
            match catalog.add_constraint(&table, constraint).await {
                Ok(()) => {
                    info!(
                        "{}: restored {} constraint {}",
                        table, constraint.kind, constraint.name
                    );
                    report.constraints_restored += 1;
                }
                Err(e) => {
                    let ddl = constraint.add_sql(&table);
                    error!(
                        "{}: failed to restore {} constraint {}: {}. Recovery DDL: {}",
                        table, constraint.kind, constraint.name, e, ddl
                    );
                    report.recovery_ddl.push(ddl);
                }
            }
        }

        let settings = std::mem::take(&mut self.settings);
        for setting in &settings {
            match catalog.apply_setting(&table, *setting).await {
                Ok(()) => report.settings_restored += 1,
                Err(e) => {
                    let ddl = setting.alter_sql(&table);
                    error!(
                        "{}: failed to leave bulk mode: {}. Recovery DDL: {}",
                        table, e, ddl
                    );
                    report.recovery_ddl.push(ddl);
                }
            }
        }
        if !settings.is_empty() {
            info!("{}: bulk mode off", table);
        }

        match catalog.analyze(&table).await {
            Ok(()) => report.analyzed = true,
            Err(e) => warn!("{}: ANALYZE failed: {}", table, e),
        }

        report
    }
}

impl Drop for BulkLoadGuard {
    fn drop(&mut self) {
        if self.released || self.is_empty() {
            return;
        }
        error!(
            "{}: load aborted with the table still in bulk-load state. Run manually:\n{}",
            self.table,
            self.recovery_ddl()
                .iter()
                .map(|ddl| format!("{};", ddl))
                .collect::<Vec<_>>()
                .join("\n")
        );
    }
}
