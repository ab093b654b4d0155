//! Load results returned to the caller.

use serde::{Deserialize, Serialize};

use crate::batching::DateRange;
use crate::error::Result;

/// Result of a [`SimpleLoader`](super::SimpleLoader) execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleLoadResult {
    /// Count reported by the load statement.
    pub rowcount: i64,

    /// Rendered script, before parameter binding.
    pub sql: String,

    pub target: String,
    pub scheme: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,

    /// Number of statements executed.
    pub statements: usize,

    /// Rows touched by the self-reference fix-up.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub self_reference_rows: i64,

    pub duration_secs: f64,
}

/// What a dry run would have executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DryRunResult {
    pub dry_run: bool,
    pub sql: String,
    pub target: String,
    pub scheme: String,
}

/// Overall outcome of a batched run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Completed,
    PartialFailure,
    Skipped,
    Cancelled,
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BatchStatus::Completed => "completed",
            BatchStatus::PartialFailure => "partial_failure",
            BatchStatus::Skipped => "skipped",
            BatchStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One executed window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// 1-based position in the run.
    pub batch: usize,
    pub start_date: String,
    pub end_date: String,

    /// Seconds spent on the window.
    pub duration: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rowcount: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchOutcome {
    pub fn succeeded(batch: usize, range: &DateRange, duration: f64, rowcount: i64) -> Self {
        let (start_date, end_date) = range.to_strings();
        Self {
            batch,
            start_date,
            end_date,
            duration,
            rowcount: Some(rowcount),
            error: None,
        }
    }

    pub fn failed(batch: usize, range: &DateRange, duration: f64, error: String) -> Self {
        let (start_date, end_date) = range.to_strings();
        Self {
            batch,
            start_date,
            end_date,
            duration,
            rowcount: None,
            error: Some(error),
        }
    }
}

/// Result of a [`BatchLoader`](super::BatchLoader) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchLoadResult {
    pub status: BatchStatus,
    pub target: String,

    /// Windows planned.
    pub total: usize,
    pub successful: usize,
    pub failed: usize,

    /// Rows reported by the successful windows.
    pub rowcount: i64,

    pub successful_batches: Vec<BatchOutcome>,
    pub failed_batches: Vec<BatchOutcome>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Restore DDL that failed during finalize and must be run by hand.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery_ddl: Vec<String>,

    pub duration_secs: f64,
}

impl BatchLoadResult {
    /// Result for a run without windows.
    pub fn skipped(target: impl Into<String>) -> Self {
        Self {
            status: BatchStatus::Skipped,
            target: target.into(),
            total: 0,
            successful: 0,
            failed: 0,
            rowcount: 0,
            successful_batches: Vec::new(),
            failed_batches: Vec::new(),
            message: Some("No data to process".to_string()),
            recovery_ddl: Vec::new(),
            duration_secs: 0.0,
        }
    }
}

/// Anything a loader can return.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoadOutput {
    DryRun(DryRunResult),
    Simple(SimpleLoadResult),
    Batch(BatchLoadResult),
}

impl LoadOutput {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        match self {
            LoadOutput::DryRun(r) => format!("{} ({}): dry run", r.target, r.scheme),
            LoadOutput::Simple(r) => format!(
                "{} ({}): {} rows in {:.1}s",
                r.target, r.scheme, r.rowcount, r.duration_secs
            ),
            LoadOutput::Batch(r) => format!(
                "{}: {}, {}/{} batches, {} rows in {:.1}s",
                r.target, r.status, r.successful, r.total, r.rowcount, r.duration_secs
            ),
        }
    }
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_skipped_result_json() {
        let json = serde_json::to_value(LoadOutput::Batch(BatchLoadResult::skipped(
            "master.market_data",
        )))
        .unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["message"], "No data to process");
        assert_eq!(json["total"], 0);
    }

    #[test]
    fn test_batch_outcome_fields() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 7).unwrap(),
        );
        let failed = BatchOutcome::failed(2, &range, 0.5, "boom".into());
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["batch"], 2);
        assert_eq!(json["start_date"], "2024-01-01");
        assert_eq!(json["end_date"], "2024-01-07");
        assert_eq!(json["error"], "boom");
        assert!(json.get("rowcount").is_none());

        let ok = BatchOutcome::succeeded(1, &range, 1.25, 40);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["rowcount"], 40);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_dry_run_json() {
        let output = LoadOutput::DryRun(DryRunResult {
            dry_run: true,
            sql: "SELECT 1;".into(),
            target: "master.currency".into(),
            scheme: "merge".into(),
        });
        let json: serde_json::Value = serde_json::from_str(&output.to_json().unwrap()).unwrap();
        assert_eq!(json["dry_run"], true);
        assert_eq!(output.summary(), "master.currency (merge): dry run");
    }

    #[test]
    fn test_status_display() {
        assert_eq!(BatchStatus::PartialFailure.to_string(), "partial_failure");
        assert_eq!(
            serde_json::to_value(BatchStatus::PartialFailure).unwrap(),
            "partial_failure"
        );
    }
}
