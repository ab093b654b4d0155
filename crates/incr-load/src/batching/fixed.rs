//! Fixed-size date windows.

use std::fmt;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use tracing::{debug, warn};

use crate::core::{DateStats, TableRef};
use crate::error::{LoadError, Result};

use super::range::{DateRange, IntervalUnit};
use super::BatchStrategy;

/// Walks forward from the minimum date in contiguous windows of `interval` units.
///
/// Bounds resolution:
/// - both bounds given: no table scan
/// - only `min_date`: `max_date` is today, no table scan
/// - only `max_date`: `MIN` is queried
/// - neither: `MIN` and `MAX` are queried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedIntervalStrategy {
    interval: u32,
    unit: IntervalUnit,
    min_date: Option<NaiveDate>,
    max_date: Option<NaiveDate>,
}

impl FixedIntervalStrategy {
    pub fn new(interval: u32, unit: IntervalUnit) -> Result<Self> {
        if interval == 0 {
            return Err(LoadError::Config(
                "Fixed interval must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            interval,
            unit,
            min_date: None,
            max_date: None,
        })
    }

    /// Use a known minimum instead of scanning.
    pub fn with_min_date(mut self, date: Option<NaiveDate>) -> Self {
        self.min_date = date;
        self
    }

    /// Use a known maximum instead of scanning.
    pub fn with_max_date(mut self, date: Option<NaiveDate>) -> Self {
        self.max_date = date;
        self
    }

    pub fn min_date(&self) -> Option<NaiveDate> {
        self.min_date
    }

    /// Split `[start, end]` into windows.
    pub fn create_intervals(&self, start: NaiveDate, end: NaiveDate) -> Vec<DateRange> {
        if start > end {
            return Vec::new();
        }

        let delta = self.unit.delta(self.interval);
        let mut current = DateRange::from_start_and_delta(start, delta).cap_at(end);
        let mut ranges = vec![current];

        while current.ends_before(end) {
            current = current.shift().cap_at(end);
            ranges.push(current);
        }

        ranges
    }

    async fn resolve_bounds(
        &self,
        stats: &dyn DateStats,
        table: &TableRef,
        date_column: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate)>> {
        match (self.min_date, self.max_date) {
            (Some(min), Some(max)) => Ok(Some((min, max))),
            (Some(min), None) => Ok(Some((min, Local::now().date_naive()))),
            (None, Some(max)) => {
                debug!("Querying MIN({}) on {}", date_column, table);
                Ok(stats
                    .min_date(table, date_column)
                    .await?
                    .map(|min| (min, max)))
            }
            (None, None) => {
                debug!("Querying MIN/MAX({}) on {}", date_column, table);
                stats.min_max_date(table, date_column).await
            }
        }
    }
}

impl fmt::Display for FixedIntervalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FixedIntervalStrategy(interval={}, unit={})",
            self.interval, self.unit
        )
    }
}

#[async_trait]
impl BatchStrategy for FixedIntervalStrategy {
    async fn generate_batches(
        &self,
        stats: &dyn DateStats,
        table: &TableRef,
        date_column: &str,
    ) -> Result<Vec<DateRange>> {
        let Some((min, max)) = self.resolve_bounds(stats, table, date_column).await? else {
            return Ok(Vec::new());
        };

        if min > max {
            warn!(
                "Start date {} is after end date {} for {}; nothing to load",
                min, max, table
            );
            return Ok(Vec::new());
        }

        Ok(self.create_intervals(min, max))
    }
}
