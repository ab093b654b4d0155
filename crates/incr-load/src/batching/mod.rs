//! Batch window generation.
//!
//! A [`BatchStrategy`] turns a source table's date column into an ordered list
//! of non-overlapping, contiguous [`DateRange`] windows. Two strategies exist:
//!
//! - [`FixedIntervalStrategy`]: windows of a fixed number of days or weeks
//! - [`VolumeBasedStrategy`]: windows sized by per-day row counts
//!
//! Both read statistics through [`DateStats`], so they run against a stub in
//! tests.

pub mod fixed;
pub mod range;
pub mod volume;

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::{DateStats, TableRef};
use crate::error::Result;

pub use fixed::FixedIntervalStrategy;
pub use range::{BatchAccumulator, DateRange, DateRangeWithCount, IntervalUnit};
pub use volume::{VolumeBasedStrategy, DEFAULT_TARGET_ROWS};

/// Produces batch windows for a source table.
#[async_trait]
pub trait BatchStrategy: Send + Sync + fmt::Display {
    /// Ordered windows covering the observed (or configured) date span.
    async fn generate_batches(
        &self,
        stats: &dyn DateStats,
        table: &TableRef,
        date_column: &str,
    ) -> Result<Vec<DateRange>>;
}

/// Strategy selection as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    FixedInterval {
        #[serde(default = "default_interval")]
        interval: u32,

        #[serde(default)]
        unit: IntervalUnit,

        #[serde(default)]
        min_date: Option<NaiveDate>,

        #[serde(default)]
        max_date: Option<NaiveDate>,

        /// Start at the configured time-series floor when no `min_date` is set.
        #[serde(default)]
        use_start_date_floor: bool,
    },
    VolumeBased {
        #[serde(default = "default_target_rows")]
        target_rows: i64,
    },
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::FixedInterval {
            interval: default_interval(),
            unit: IntervalUnit::Day,
            min_date: None,
            max_date: None,
            use_start_date_floor: false,
        }
    }
}

impl StrategyConfig {
    /// Build the strategy. `start_date_floor` replaces a missing `min_date`
    /// when the strategy opts in.
    pub fn build(&self, start_date_floor: Option<NaiveDate>) -> Result<Box<dyn BatchStrategy>> {
        match self {
            StrategyConfig::FixedInterval {
                interval,
                unit,
                min_date,
                max_date,
                use_start_date_floor,
            } => {
                let min = match (min_date, use_start_date_floor) {
                    (Some(d), _) => Some(*d),
                    (None, true) => start_date_floor,
                    (None, false) => None,
                };
                let strategy = FixedIntervalStrategy::new(*interval, *unit)?
                    .with_min_date(min)
                    .with_max_date(*max_date);
                Ok(Box::new(strategy))
            }
            StrategyConfig::VolumeBased { target_rows } => {
                Ok(Box::new(VolumeBasedStrategy::new(*target_rows)?))
            }
        }
    }
}

fn default_interval() -> u32 {
    1
}

fn default_target_rows() -> i64 {
    DEFAULT_TARGET_ROWS
}
