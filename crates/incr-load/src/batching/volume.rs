//! Windows sized by row volume.

use std::fmt;

use async_trait::async_trait;
use tracing::debug;

use crate::core::{DateStats, TableRef};
use crate::error::{LoadError, Result};

use super::range::{accumulate, DateRange};
use super::BatchStrategy;

/// Default target rows per window.
pub const DEFAULT_TARGET_ROWS: i64 = 100_000;

/// Groups consecutive days until adding the next day would exceed `target_rows`.
///
/// A day whose own count exceeds the target becomes a one-day window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBasedStrategy {
    target_rows: i64,
}

impl VolumeBasedStrategy {
    pub fn new(target_rows: i64) -> Result<Self> {
        if target_rows <= 0 {
            return Err(LoadError::Config(format!(
                "target_rows must be positive (got {})",
                target_rows
            )));
        }
        Ok(Self { target_rows })
    }

    pub fn target_rows(&self) -> i64 {
        self.target_rows
    }
}

impl Default for VolumeBasedStrategy {
    fn default() -> Self {
        Self {
            target_rows: DEFAULT_TARGET_ROWS,
        }
    }
}

impl fmt::Display for VolumeBasedStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VolumeBasedStrategy(target_rows={})", self.target_rows)
    }
}

#[async_trait]
impl BatchStrategy for VolumeBasedStrategy {
    async fn generate_batches(
        &self,
        stats: &dyn DateStats,
        table: &TableRef,
        date_column: &str,
    ) -> Result<Vec<DateRange>> {
        let counts = stats.daily_counts(table, date_column).await?;
        debug!("{} distinct dates in {}.{}", counts.len(), table, date_column);
        Ok(accumulate(&counts, self.target_rows))
    }
}
