//! Running named loads from the config file.
//!
//! The [`Runner`] turns a [`LoadDefinition`](crate::config::LoadDefinition)
//! into a validated [`LoadConfig`] by describing the tables involved, then
//! hands it to the right loader. It is the layer the CLI (or any scheduler)
//! calls; it never decides when a load runs.

pub mod embedded;

pub use embedded::EmbeddedCatalog;

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use crate::batching::{BatchStrategy, DateRange};
use crate::config::{Config, LoadSpec};
use crate::core::{Catalog, TableRef};
use crate::error::{LoadError, Result};
use crate::load_config::{LoadConfig, LoadOptions, MappingConfig};
use crate::loader::{
    dry_run, plan_batches, BatchLoader, LoadBackend, LoadOutput, LoadSource, SimpleLoader,
    SqlFileSource, TemplateSource,
};
use crate::render::{self, LoadParams, RenderedSql};

/// Caller choices for one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub dry_run: bool,
    /// Allows a truncating load whose definition does not confirm it.
    pub confirm_full_load: bool,
}

impl RunOptions {
    /// Window parameters; both bounds or neither.
    pub fn params(&self) -> Result<LoadParams> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) if start > end => Err(LoadError::Config(format!(
                "start date {} is after end date {}",
                start, end
            ))),
            (Some(start), Some(end)) => Ok(LoadParams::window(start, end)),
            (None, None) => Ok(LoadParams::default()),
            _ => Err(LoadError::Config(
                "--start-date and --end-date must be given together".into(),
            )),
        }
    }
}

/// Result of a run, as reported to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run identifier.
    pub run_id: String,

    /// Load definition name.
    pub load: String,

    pub started_at: DateTime<Utc>,

    #[serde(flatten)]
    pub output: LoadOutput,
}

impl RunReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Tables that must be described to resolve a load.
pub fn required_tables(spec: &LoadSpec) -> Vec<TableRef> {
    let mut tables = vec![spec.target_table.clone()];
    if let Some(mapping) = &spec.mapping {
        tables.push(mapping.mapping_table.clone());
    }
    if let Some(inh) = &spec.inheritance {
        tables.push(inh.parent.target_table.clone());
        if let Some(mapping) = &inh.parent.mapping {
            tables.push(mapping.mapping_table.clone());
        }
    }
    tables
}

/// Describe the tables of a load and build its [`LoadConfig`].
pub async fn resolve_load(catalog: &dyn Catalog, spec: &LoadSpec) -> Result<LoadConfig> {
    let parent = match &spec.inheritance {
        Some(inh) => Some((
            resolve_single(catalog, &inh.parent, None).await?,
            inh.source_parent_key.as_str(),
        )),
        None => None,
    };
    resolve_single(catalog, spec, parent).await
}

async fn resolve_single(
    catalog: &dyn Catalog,
    spec: &LoadSpec,
    parent: Option<(LoadConfig, &str)>,
) -> Result<LoadConfig> {
    let entity = catalog.describe_entity(&spec.target_table).await?;
    let mut options = options_from_spec(spec);

    if let Some(mapping) = &spec.mapping {
        // Under inheritance the mapping resolves parent ids
        let owner = parent
            .as_ref()
            .map(|(p, _)| p.target_table.clone())
            .unwrap_or_else(|| spec.target_table.clone());
        let mapping_entity = catalog.describe_entity(&mapping.mapping_table).await?;
        options.mapping = Some(MappingConfig::from_entity(
            &mapping_entity,
            &owner,
            &mapping.overrides,
        )?);
    }

    if let Some((parent_config, source_parent_key)) = parent {
        options = options.with_inheritance(parent_config, source_parent_key);
    }

    LoadConfig::from_entity(&entity, options)
}

fn options_from_spec(spec: &LoadSpec) -> LoadOptions {
    LoadOptions {
        unique_key: spec.unique_key.clone(),
        exclude_columns: spec.exclude_columns.clone(),
        include_audit_columns: spec.include_audit_columns,
        include_server_default_columns: spec.include_server_default_columns,
        column_mapping: spec.column_mapping.clone(),
        order_by: spec.order_by.clone(),
        with_soft_delete: spec.with_soft_delete,
        hard_delete: spec.hard_delete,
        exclude_from_delete: spec.exclude_from_delete.clone(),
        audit: spec.audit,
        self_reference: spec.self_reference.clone(),
        batch: spec.batch.clone(),
        cdc: spec.cdc.clone(),
        is_hypertable: spec.is_hypertable,
        hypertable_decompression_limit: spec.hypertable_decompression_limit,
        ..LoadOptions::new(spec.scheme, spec.source_table.clone())
    }
}

/// Runs named loads against a backend.
pub struct Runner<'a, B> {
    config: &'a Config,
    backend: &'a B,
    cancel: CancellationToken,
}

impl<'a, B: Catalog> Runner<'a, B> {
    pub fn new(config: &'a Config, backend: &'a B) -> Self {
        Self {
            config,
            backend,
            cancel: CancellationToken::new(),
        }
    }

    /// Token checked between batch windows.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build the validated config of a named load.
    pub async fn resolve(&self, name: &str) -> Result<LoadConfig> {
        let definition = self.config.load_definition(name)?;
        resolve_load(self.backend, &definition.spec).await
    }

    /// Render a named load without executing it.
    pub async fn render(&self, name: &str, windowed: bool) -> Result<RenderedSql> {
        let config = self.resolve(name).await?;
        render::render(&config, windowed)
    }

    /// Dry run of a named load. Batched loads render in windowed form.
    pub async fn dry_run(&self, name: &str, options: &RunOptions) -> Result<RunReport> {
        let params = options.params()?;
        let config = self.resolve(name).await?;
        let windowed = params.is_windowed() || config.batch.is_some();
        let source = TemplateSource::new(config);
        let output = LoadOutput::DryRun(dry_run(&source, windowed)?);
        Ok(report(name, Utc::now(), output))
    }

    /// Statements of a SQL file as [`RunOptions::dry_run`] would print them.
    pub fn dry_run_sql(&self, path: &Path, options: &RunOptions) -> Result<RunReport> {
        let params = options.params()?;
        let source = SqlFileSource::from_file(path)?;
        let output = LoadOutput::DryRun(dry_run(&source, params.is_windowed())?);
        Ok(report(&source.target(), Utc::now(), output))
    }

    /// Strategy of a named load, floored by the configured start date.
    fn strategy(&self, spec: &LoadSpec) -> Result<Box<dyn BatchStrategy>> {
        spec.strategy
            .clone()
            .unwrap_or_default()
            .build(self.config.start_date_floor()?)
    }
}

impl<'a, B: LoadBackend> Runner<'a, B> {
    /// Run a named load.
    ///
    /// Batched loads go through [`BatchLoader`] unless an explicit window is
    /// given, in which case that single window runs through [`SimpleLoader`].
    pub async fn run(&self, name: &str, options: &RunOptions) -> Result<RunReport> {
        if options.dry_run {
            return self.dry_run(name, options).await;
        }

        let definition = self.config.load_definition(name)?;
        let spec = &definition.spec;
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!(
            "load",
            run_id = %run_id,
            load = %name,
            target = %spec.target_table,
            scheme = %spec.scheme
        );

        self.run_definition(name, spec, options, run_id)
            .instrument(span)
            .await
    }

    async fn run_definition(
        &self,
        name: &str,
        spec: &LoadSpec,
        options: &RunOptions,
        run_id: String,
    ) -> Result<RunReport> {
        if spec.truncates() && !(spec.confirm_full_load || options.confirm_full_load) {
            return Err(LoadError::Config(format!(
                "load '{}' truncates {} before loading; set confirm_full_load: true \
                 or pass --confirm-full-load",
                name, spec.target_table
            )));
        }

        let started_at = Utc::now();
        let params = options.params()?;
        info!("Starting load run: {}", run_id);

        let config = resolve_load(self.backend, spec).await?;
        let batched = config.batch.is_some() && !params.is_windowed();
        let source = TemplateSource::new(config);

        let output = if batched {
            let strategy = self.strategy(spec)?;
            BatchLoader::new(self.backend, &source, strategy)
                .with_cancellation(self.cancel.clone())
                .run()
                .await
                .map(LoadOutput::Batch)?
        } else {
            SimpleLoader::new(self.backend, &source).load(params).await?
        };

        info!("{}", output.summary());
        Ok(RunReport {
            run_id,
            load: name.to_string(),
            started_at,
            output,
        })
    }

    /// Windows a named load would run.
    pub async fn plan(&self, name: &str) -> Result<Vec<DateRange>> {
        let definition = self.config.load_definition(name)?;
        let config = resolve_load(self.backend, &definition.spec).await?;
        let strategy = self.strategy(&definition.spec)?;
        plan_batches(self.backend, &TemplateSource::new(config), strategy.as_ref()).await
    }

    /// Run a SQL file through [`SimpleLoader`].
    pub async fn exec_sql(&self, path: &Path, options: &RunOptions) -> Result<RunReport> {
        if options.dry_run {
            return self.dry_run_sql(path, options);
        }

        let params = options.params()?;
        let source = SqlFileSource::from_file(path)?;
        let name = source.target();
        let started_at = Utc::now();
        let output = SimpleLoader::new(self.backend, &source)
            .load(params)
            .await?;
        Ok(report(&name, started_at, output))
    }
}

fn report(load: &str, started_at: DateTime<Utc>, output: LoadOutput) -> RunReport {
    RunReport {
        run_id: uuid::Uuid::new_v4().to_string(),
        load: load.to_string(),
        started_at,
        output,
    }
}
