//! # incr-load
//!
//! Incremental table loads into PostgreSQL.
//!
//! A load moves the rows of a staging table (or view) into a target table
//! using one of four schemes:
//!
//! - **Merge** via `MERGE INTO`, with optional soft or hard deletes
//! - **Upsert** via `INSERT ... ON CONFLICT`
//! - **Insert** for append-only targets
//! - **CDC** applying tagged change rows and recording the processed version
//!
//! Loads can resolve external ids through a mapping table, compose a parent
//! and child table ("is-a" inheritance), fix up self-referencing keys, and run
//! in date windows with indexes and constraints dropped for the duration.
//!
//! ## Example
//!
//! ```rust,no_run
//! use incr_load::{Config, PgTarget, RunOptions, Runner};
//!
//! #[tokio::main]
//! async fn main() -> incr_load::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let target = PgTarget::connect(&config.database).await?;
//!     let report = Runner::new(&config, &target)
//!         .run("currencies", &RunOptions::default())
//!         .await?;
//!     println!("{}", report.output.summary());
//!     Ok(())
//! }
//! ```

pub mod batching;
pub mod config;
pub mod core;
pub mod error;
pub mod load_config;
pub mod loader;
pub mod postgres;
pub mod render;
pub mod runner;

// Re-exports for convenient access
pub use batching::{BatchStrategy, DateRange, StrategyConfig};
pub use config::{Config, DatabaseConfig, LoadDefinition, LoadSpec};
pub use crate::core::{Catalog, DateStats, EntityDescription, StatementExecutor, TableRef};
pub use error::{LoadError, Result};
pub use load_config::{LoadConfig, LoadOptions, LoadScheme};
pub use loader::{
    BatchLoadResult, BatchLoader, BatchStatus, LoadBackend, LoadOutput, SimpleLoader,
    SqlFileSource, TemplateSource,
};
pub use postgres::PgTarget;
pub use render::{render, LoadParams, RenderedSql};
pub use runner::{EmbeddedCatalog, RunOptions, RunReport, Runner};
