//! Batched loader.
//!
//! A run moves through fixed phases:
//!
//! 1. **Validate**: the load has a batch config with a date column
//! 2. **Prepare**: drop FK, then PK, then UNIQUE constraints; truncate;
//!    drop plain indexes. Every drop is recorded in a [`BulkLoadGuard`]
//! 3. **Bulk mode**: autovacuum off and/or UNLOGGED
//! 4. **Plan**: ask the strategy for windows
//! 5. **Execute**: one transaction per window, in order
//! 6. **Aggregate**: completed, partial failure, skipped or cancelled
//! 7. **Finalize**: release the guard. Runs on every path, including a
//!    fail-fast abort, before the outcome is returned
//!
//! The choreography assumes no other writer touches the table during the run.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batching::{BatchStrategy, DateRange};
use crate::core::{ConstraintKind, TableSetting};
use crate::error::{LoadError, Result};
use crate::load_config::BatchConfig;
use crate::render::cdc::INITIAL_VERSION;
use crate::render::{LoadParams, RenderedSql};

use super::guard::BulkLoadGuard;
use super::result::{BatchLoadResult, BatchOutcome, BatchStatus};
use super::source::{LoadSource, TemplateSource};
use super::{log_failure, statement_error, LoadBackend};

/// Runs a [`TemplateSource`] window by window.
pub struct BatchLoader<'a, B> {
    backend: &'a B,
    source: &'a TemplateSource,
    strategy: Box<dyn BatchStrategy>,
    cancel: CancellationToken,
}

impl<'a, B: LoadBackend> BatchLoader<'a, B> {
    pub fn new(
        backend: &'a B,
        source: &'a TemplateSource,
        strategy: Box<dyn BatchStrategy>,
    ) -> Self {
        Self {
            backend,
            source,
            strategy,
            cancel: CancellationToken::new(),
        }
    }

    /// Token checked between windows.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run every window.
    ///
    /// Returns `Err` on a fail-fast batch error, or when batches failed and
    /// partial success is not allowed. The table is restored either way.
    pub async fn run(&self) -> Result<BatchLoadResult> {
        let config = self.source.config();
        let target = self.source.target();

        // Phase 1: Validate
        let batch = config
            .batch
            .as_ref()
            .filter(|b| !b.batch_date_column.is_empty())
            .ok_or_else(|| {
                LoadError::Config(format!(
                    "{}: batched load requires batch.batch_date_column",
                    target
                ))
            })?;
        let rendered = self.source.render(true)?;
        let last_version = match self.source.tracking_table() {
            Some(tracking) => Some(
                self.backend
                    .last_tracked_version(tracking)
                    .await?
                    .unwrap_or(INITIAL_VERSION),
            ),
            None => None,
        };

        info!(
            "{}: batched {} load by {} ({}), options: {}",
            target,
            config.scheme,
            batch.batch_date_column,
            self.strategy,
            batch.describe()
        );

        let start = Instant::now();
        let mut guard = BulkLoadGuard::new(
            config.target_table.clone(),
            config.is_hypertable || batch.is_hypertable,
        );

        let outcome = self
            .run_guarded(&mut guard, batch, &rendered, last_version)
            .await;

        // Phase 7: Finalize
        let report = guard.release(self.backend).await;
        if !report.is_clean() {
            error!(
                "{}: {} restore steps need manual recovery",
                target,
                report.recovery_ddl.len()
            );
        }

        let mut result = outcome?;
        result.duration_secs = start.elapsed().as_secs_f64();
        result.recovery_ddl = report.recovery_ddl;

        info!(
            "{}: {} - {}/{} batches succeeded, {} rows in {:.1}s",
            target,
            result.status,
            result.successful,
            result.total,
            result.rowcount,
            result.duration_secs
        );

        if result.failed > 0 && !batch.allow_partial_success {
            return Err(LoadError::PartialFailure {
                target,
                failed: result.failed,
                total: result.total,
            });
        }
        Ok(result)
    }

    async fn run_guarded(
        &self,
        guard: &mut BulkLoadGuard,
        batch: &BatchConfig,
        rendered: &RenderedSql,
        last_version: Option<i64>,
    ) -> Result<BatchLoadResult> {
        let config = self.source.config();
        let target = self.source.target();

        // Phase 2: Prepare
        self.prepare_table(guard, batch).await?;

        // Phase 3: Bulk mode
        self.enter_bulk_mode(guard, batch).await?;

        // Phase 4: Plan
        let windows = self
            .strategy
            .generate_batches(self.backend, &config.source_table, &batch.batch_date_column)
            .await?;
        if windows.is_empty() {
            info!("{}: no data to process", target);
            return Ok(BatchLoadResult::skipped(target));
        }
        info!("{}: {} batches planned", target, windows.len());

        // Phase 5: Execute
        let total = windows.len();
        let mut result = BatchLoadResult {
            status: BatchStatus::Completed,
            target: target.clone(),
            total,
            successful: 0,
            failed: 0,
            rowcount: 0,
            successful_batches: Vec::new(),
            failed_batches: Vec::new(),
            message: None,
            recovery_ddl: Vec::new(),
            duration_secs: 0.0,
        };

        for (i, range) in windows.iter().enumerate() {
            let batch_no = i + 1;
            if self.cancel.is_cancelled() {
                warn!(
                    "{}: cancelled before batch {}/{}, skipping {} remaining",
                    target,
                    batch_no,
                    total,
                    total - i
                );
                result.status = BatchStatus::Cancelled;
                result.message = Some(format!("Cancelled after {} of {} batches", i, total));
                break;
            }

            let mut params = LoadParams::window(range.start, range.end);
            if let Some(version) = last_version {
                params = params.with_last_version(version);
            }

            let started = Instant::now();
            match self.execute_window(&target, rendered, &params).await {
                Ok(rowcount) => {
                    let secs = started.elapsed().as_secs_f64();
                    info!(
                        status = "success",
                        batch = batch_no,
                        total,
                        start_date = %range.start,
                        end_date = %range.end,
                        duration = secs,
                        "✓ Batch {}/{}: {} ({:.1}s)",
                        batch_no,
                        total,
                        range,
                        secs
                    );
                    result.rowcount += rowcount;
                    result.successful += 1;
                    result
                        .successful_batches
                        .push(BatchOutcome::succeeded(batch_no, range, secs, rowcount));
                }
                Err(e) => {
                    let secs = started.elapsed().as_secs_f64();
                    error!(
                        status = "failed",
                        batch = batch_no,
                        total,
                        start_date = %range.start,
                        end_date = %range.end,
                        duration = secs,
                        error = %e,
                        "✗ Batch {}/{}: {} - {}",
                        batch_no,
                        total,
                        range,
                        e
                    );
                    if batch.fail_fast {
                        return Err(LoadError::batch(target, range.to_string(), e));
                    }
                    result.failed += 1;
                    result
                        .failed_batches
                        .push(BatchOutcome::failed(batch_no, range, secs, e.to_string()));
                }
            }
        }

        // Phase 6: Aggregate
        if result.failed > 0 && result.status == BatchStatus::Completed {
            result.status = BatchStatus::PartialFailure;
        }
        Ok(result)
    }

    async fn prepare_table(&self, guard: &mut BulkLoadGuard, batch: &BatchConfig) -> Result<()> {
        let table = &self.source.config().target_table;

        // FK first: dropping a PK or UNIQUE that an FK depends on would fail
        let drops = [
            (batch.drop_fk, ConstraintKind::ForeignKey),
            (batch.drop_pk, ConstraintKind::PrimaryKey),
            (batch.drop_unique, ConstraintKind::Unique),
        ];
        for (enabled, kind) in drops {
            if !enabled {
                continue;
            }
            for constraint in self.backend.list_constraints(table, kind).await? {
                info!("{}: dropping {} constraint {}", table, kind, constraint.name);
                debug!("{}: restore with: {}", table, constraint.add_sql(table));
                self.backend.drop_constraint(table, &constraint).await?;
                guard.record_constraint(constraint);
            }
        }

        if batch.truncate_before_load {
            info!("{}: truncating", table);
            self.backend.truncate(table).await?;
        }

        if batch.drop_indexes {
            let indexes = self.backend.list_indexes(table).await?;
            info!("{}: dropping {} indexes", table, indexes.len());
            for index in indexes {
                debug!("{}: restore with: {}", table, index.definition);
                self.backend.drop_index(&index).await?;
                guard.record_index(index);
            }
        }

        Ok(())
    }

    async fn enter_bulk_mode(&self, guard: &mut BulkLoadGuard, batch: &BatchConfig) -> Result<()> {
        if !batch.uses_bulk_mode() {
            return Ok(());
        }
        let table = &self.source.config().target_table;
        info!("{}: entering bulk mode", table);

        if batch.disable_autovacuum {
            self.backend
                .apply_setting(table, TableSetting::Autovacuum(false))
                .await?;
            guard.record_setting(TableSetting::Autovacuum(true));
        }
        if batch.disable_wal {
            self.backend
                .apply_setting(table, TableSetting::Logged(false))
                .await?;
            guard.record_setting(TableSetting::Logged(true));
        }
        Ok(())
    }

    async fn execute_window(
        &self,
        target: &str,
        rendered: &RenderedSql,
        params: &LoadParams,
    ) -> Result<i64> {
        let bound = rendered.bind(params)?;
        match self.backend.execute_transaction(&bound).await {
            Ok(outcome) => Ok(outcome.rowcount),
            Err(e) => {
                log_failure(target, &bound, &e);
                Err(statement_error(target, e))
            }
        }
    }
}

/// Windows a batched load would run, without executing anything.
pub async fn plan_batches<B: LoadBackend>(
    backend: &B,
    source: &TemplateSource,
    strategy: &dyn BatchStrategy,
) -> Result<Vec<DateRange>> {
    let config = source.config();
    let batch = config.batch.as_ref().ok_or_else(|| {
        LoadError::Config(format!(
            "{}: load has no batch config",
            config.target_table
        ))
    })?;
    strategy
        .generate_batches(backend, &config.source_table, &batch.batch_date_column)
        .await
}
