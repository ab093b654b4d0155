//! Single-transaction loader.

use std::time::Instant;

use tracing::{debug, info};

use crate::core::StatementExecutor;
use crate::error::Result;
use crate::render::cdc::INITIAL_VERSION;
use crate::render::LoadParams;

use super::result::{DryRunResult, LoadOutput, SimpleLoadResult};
use super::source::LoadSource;
use super::{log_failure, statement_error};

/// Executes one rendered load in one transaction.
pub struct SimpleLoader<'a, E> {
    executor: &'a E,
    source: &'a dyn LoadSource,
    dry_run: bool,
}

impl<'a, E: StatementExecutor> SimpleLoader<'a, E> {
    pub fn new(executor: &'a E, source: &'a dyn LoadSource) -> Self {
        Self {
            executor,
            source,
            dry_run: false,
        }
    }

    /// Render only; nothing is sent to the database.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run the load. Window bounds in `params` restrict it to one window.
    pub async fn load(&self, params: LoadParams) -> Result<LoadOutput> {
        if self.dry_run {
            return dry_run(self.source, params.is_windowed()).map(LoadOutput::DryRun);
        }

        let target = self.source.target();
        let scheme = self.source.scheme();
        let rendered = self.source.render(params.is_windowed())?;

        let mut params = params;
        if let Some(tracking) = self.source.tracking_table() {
            let version = self
                .executor
                .last_tracked_version(tracking)
                .await?
                .unwrap_or(INITIAL_VERSION);
            info!("{}: resuming after change version {}", target, version);
            params = params.with_last_version(version);
        }

        let bound = rendered.bind(&params)?;
        info!("{}: loading ({})", target, scheme);
        debug!("{}: SQL:\n{}", target, rendered.to_script());

        let start = Instant::now();
        let outcome = match self.executor.execute_transaction(&bound).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log_failure(&target, &bound, &e);
                return Err(statement_error(&target, e));
            }
        };
        let duration_secs = start.elapsed().as_secs_f64();

        info!(
            "{}: {} rows in {:.1}s",
            target, outcome.rowcount, duration_secs
        );
        if outcome.self_reference_rows > 0 {
            info!(
                "{}: resolved self-references on {} rows",
                target, outcome.self_reference_rows
            );
        }

        Ok(LoadOutput::Simple(SimpleLoadResult {
            rowcount: outcome.rowcount,
            sql: rendered.to_script(),
            target,
            scheme,
            columns: self.source.columns(),
            statements: bound.len(),
            self_reference_rows: outcome.self_reference_rows,
            duration_secs,
        }))
    }
}

/// Render a source without touching the database.
pub fn dry_run(source: &dyn LoadSource, windowed: bool) -> Result<DryRunResult> {
    let rendered = source.render(windowed)?;
    Ok(DryRunResult {
        dry_run: true,
        sql: rendered.to_script(),
        target: source.target(),
        scheme: source.scheme(),
    })
}
