//! Immutable date-range values used by batch strategies.

use std::fmt;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Date format used for window bounds in logs and results.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Unit of a fixed batch interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    #[default]
    Day,
    Week,
}

impl IntervalUnit {
    /// Length of `interval` units.
    pub fn delta(&self, interval: u32) -> Duration {
        match self {
            IntervalUnit::Day => Duration::days(i64::from(interval)),
            IntervalUnit::Week => Duration::weeks(i64::from(interval)),
        }
    }
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntervalUnit::Day => f.write_str("day"),
            IntervalUnit::Week => f.write_str("week"),
        }
    }
}

/// An inclusive `[start, end]` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Window of length `delta` starting at `start` (`end = start + delta - 1 day`).
    ///
    /// Ends past the last representable date saturate to [`NaiveDate::MAX`].
    pub fn from_start_and_delta(start: NaiveDate, delta: Duration) -> Self {
        Self::new(start, saturating_add(start, delta - Duration::days(1)))
    }

    /// The next window of the same length, starting the day after this one ends.
    pub fn shift(&self) -> Self {
        let length = self.end - self.start;
        let next_start = saturating_add(self.end, Duration::days(1));
        Self::new(next_start, saturating_add(next_start, length))
    }

    /// Clamp the end to `max_date`.
    pub fn cap_at(&self, max_date: NaiveDate) -> Self {
        if self.end > max_date {
            Self::new(self.start, max_date)
        } else {
            *self
        }
    }

    pub fn ends_before(&self, date: NaiveDate) -> bool {
        self.end < date
    }

    /// Number of days covered.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// `("YYYY-MM-DD", "YYYY-MM-DD")`.
    pub fn to_strings(&self) -> (String, String) {
        (
            self.start.format(DATE_FORMAT).to_string(),
            self.end.format(DATE_FORMAT).to_string(),
        )
    }
}

fn saturating_add(date: NaiveDate, delta: Duration) -> NaiveDate {
    date.checked_add_signed(delta).unwrap_or(NaiveDate::MAX)
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}→{}",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

/// A window together with the rows it currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRangeWithCount {
    pub range: DateRange,
    pub row_count: i64,
}

impl DateRangeWithCount {
    /// One-day window.
    pub fn start_new(date: NaiveDate, row_count: i64) -> Self {
        Self::starting_at(date, date, row_count)
    }

    /// Window from `start` up to the observed `date`.
    pub fn starting_at(start: NaiveDate, date: NaiveDate, row_count: i64) -> Self {
        Self {
            range: DateRange::new(start, date),
            row_count,
        }
    }

    pub fn can_add(&self, row_count: i64, target_rows: i64) -> bool {
        self.row_count + row_count <= target_rows
    }

    pub fn extend_to(&self, end: NaiveDate, additional_rows: i64) -> Self {
        Self {
            range: DateRange::new(self.range.start, end),
            row_count: self.row_count + additional_rows,
        }
    }
}

/// Folds `(date, row_count)` pairs into windows bounded by a target row count.
///
/// Every step returns a new accumulator; nothing is mutated. A new window
/// starts the day after the previous one ended, so days without rows are
/// covered by the window that follows them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchAccumulator {
    current: Option<DateRangeWithCount>,
    target_rows: i64,
    completed: Vec<DateRange>,
}

impl BatchAccumulator {
    pub fn new(target_rows: i64) -> Self {
        Self {
            current: None,
            target_rows,
            completed: Vec::new(),
        }
    }

    /// Fold one day's count into the accumulator.
    ///
    /// Dates must arrive in ascending order.
    pub fn process(&self, date: NaiveDate, row_count: i64) -> Self {
        let (current, completed) = match self.current {
            None => (DateRangeWithCount::start_new(date, row_count), self.completed.clone()),
            Some(cur) if cur.can_add(row_count, self.target_rows) => {
                (cur.extend_to(date, row_count), self.completed.clone())
            }
            Some(cur) => {
                let mut completed = self.completed.clone();
                completed.push(cur.range);
                let start = cur.range.end + Duration::days(1);
                (
                    DateRangeWithCount::starting_at(start, date, row_count),
                    completed,
                )
            }
        };

        Self {
            current: Some(current),
            target_rows: self.target_rows,
            completed,
        }
    }

    /// Close the open window and return all windows.
    pub fn finalize(self) -> Vec<DateRange> {
        let mut ranges = self.completed;
        if let Some(cur) = self.current {
            ranges.push(cur.range);
        }
        ranges
    }
}

/// Fold a full list of daily counts.
pub fn accumulate(counts: &[(NaiveDate, i64)], target_rows: i64) -> Vec<DateRange> {
    counts
        .iter()
        .fold(BatchAccumulator::new(target_rows), |acc, (date, rows)| {
            acc.process(*date, *rows)
        })
        .finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn test_from_start_and_delta() {
        let r = DateRange::from_start_and_delta(d("2024-01-01"), IntervalUnit::Day.delta(30));
        assert_eq!(r, DateRange::new(d("2024-01-01"), d("2024-01-30")));
        assert_eq!(r.days(), 30);
    }

    #[test]
    fn test_week_delta() {
        let r = DateRange::from_start_and_delta(d("2024-01-01"), IntervalUnit::Week.delta(1));
        assert_eq!(r.end, d("2024-01-07"));
    }

    #[test]
    fn test_shift_keeps_length() {
        let r = DateRange::new(d("2024-01-01"), d("2024-01-30")).shift();
        assert_eq!(r, DateRange::new(d("2024-01-31"), d("2024-02-29")));
    }

    #[test]
    fn test_oversized_delta_saturates() {
        let start = d("2024-01-01");
        let r = DateRange::from_start_and_delta(start, IntervalUnit::Week.delta(u32::MAX));
        assert_eq!(r.end, NaiveDate::MAX);
        assert_eq!(r.cap_at(d("2024-12-31")).end, d("2024-12-31"));

        let shifted = DateRange::new(start, NaiveDate::MAX).shift();
        assert_eq!(shifted.start, NaiveDate::MAX);
        assert_eq!(shifted.end, NaiveDate::MAX);
    }

    #[test]
    fn test_cap_at() {
        let r = DateRange::new(d("2024-03-31"), d("2024-04-29"));
        assert_eq!(r.cap_at(d("2024-03-31")).end, d("2024-03-31"));
        assert_eq!(r.cap_at(d("2024-12-31")), r);
    }

    #[test]
    fn test_display_and_strings() {
        let r = DateRange::new(d("2024-01-01"), d("2024-01-07"));
        assert_eq!(r.to_string(), "2024-01-01→2024-01-07");
        assert_eq!(
            r.to_strings(),
            ("2024-01-01".to_string(), "2024-01-07".to_string())
        );
    }

    #[test]
    fn test_accumulator_is_pure() {
        let acc = BatchAccumulator::new(100);
        let next = acc.process(d("2024-01-01"), 10);
        assert_eq!(acc, BatchAccumulator::new(100));
        assert_ne!(next, acc);
    }

    #[test]
    fn test_accumulator_empty() {
        assert!(accumulate(&[], 100).is_empty());
    }

    #[test]
    fn test_accumulator_scenario() {
        let counts = [
            (d("2024-01-01"), 6000),
            (d("2024-01-02"), 3000),
            (d("2024-01-03"), 8000),
            (d("2024-01-04"), 2000),
        ];
        assert_eq!(
            accumulate(&counts, 10_000),
            vec![
                DateRange::new(d("2024-01-01"), d("2024-01-02")),
                DateRange::new(d("2024-01-03"), d("2024-01-04")),
            ]
        );
    }

    #[test]
    fn test_accumulator_oversized_day_is_own_window() {
        let counts = [
            (d("2024-01-01"), 10),
            (d("2024-01-02"), 500),
            (d("2024-01-03"), 10),
        ];
        assert_eq!(
            accumulate(&counts, 100),
            vec![
                DateRange::new(d("2024-01-01"), d("2024-01-01")),
                DateRange::new(d("2024-01-02"), d("2024-01-02")),
                DateRange::new(d("2024-01-03"), d("2024-01-03")),
            ]
        );
    }

    #[test]
    fn test_accumulator_gap_days_join_next_window() {
        let counts = [(d("2024-01-01"), 80), (d("2024-01-05"), 80)];
        assert_eq!(
            accumulate(&counts, 100),
            vec![
                DateRange::new(d("2024-01-01"), d("2024-01-01")),
                DateRange::new(d("2024-01-02"), d("2024-01-05")),
            ]
        );
    }

    #[test]
    fn test_accumulator_volume_bound_property() {
        // Pseudo-random counts; every multi-day window must stay within target.
        let start = d("2023-01-01");
        let counts: Vec<(NaiveDate, i64)> = (0..200)
            .filter(|i| i % 7 != 3)
            .map(|i| (start + Duration::days(i), (i * 7919 % 1500) + 1))
            .collect();
        let target = 2000;
        let ranges = accumulate(&counts, target);

        for r in &ranges {
            let sum: i64 = counts
                .iter()
                .filter(|(day, _)| *day >= r.start && *day <= r.end)
                .map(|(_, c)| c)
                .sum();
            let observed = counts
                .iter()
                .filter(|(day, _)| *day >= r.start && *day <= r.end)
                .count();
            assert!(sum <= target || observed == 1, "window {} holds {}", r, sum);
        }

        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end + Duration::days(1), pair[1].start);
        }
        assert_eq!(ranges.first().unwrap().start, counts.first().unwrap().0);
        assert_eq!(ranges.last().unwrap().end, counts.last().unwrap().0);
    }
}
