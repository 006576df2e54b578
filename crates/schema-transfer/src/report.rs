//! Final run report assembly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransferError};
use crate::executor::{TaskStatus, TransferResult};
use crate::graph::cycles::CycleReport;
use crate::graph::DanglingReference;
use crate::verify::ValidationMismatch;

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every object succeeded.
    Success,
    /// Some objects succeeded, some failed or were skipped.
    Partial,
    /// Nothing succeeded.
    Failed,
    /// The run was cancelled before completion.
    Cancelled,
}

impl RunStatus {
    /// Derive the overall status from per-object results.
    pub fn from_results(results: &[TransferResult], cancelled: bool) -> Self {
        if cancelled {
            return RunStatus::Cancelled;
        }
        let succeeded = results
            .iter()
            .filter(|r| r.status == TaskStatus::Succeeded)
            .count();
        let troubled = results
            .iter()
            .filter(|r| {
                matches!(r.status, TaskStatus::Failed | TaskStatus::Skipped)
                    || !r.errors.is_empty()
            })
            .count();

        if troubled == 0 {
            RunStatus::Success
        } else if succeeded > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        }
    }
}

/// Complete, always-produced report of a transfer run.
///
/// Downstream consumers render this as JSON/CSV/HTML; the core only owns the
/// data. Even a halted run yields a full report with its partial results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReport {
    /// Unique run identifier.
    pub run_id: String,

    /// Overall status.
    pub status: RunStatus,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub elapsed_seconds: f64,

    /// Total rows moved across all tables.
    pub rows_transferred: i64,

    /// Per-object outcomes, in plan order.
    pub results: Vec<TransferResult>,

    /// Cycles found and how they were broken.
    pub cycles: CycleReport,

    /// Edges excluded during graph building.
    pub problems: Vec<DanglingReference>,

    /// Verification findings. Never blocks completion.
    pub mismatches: Vec<ValidationMismatch>,
}

impl TransferReport {
    /// Convert to a pretty-printed JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Error out unless the run fully succeeded.
    ///
    /// For callers that treat anything short of full success as fatal; the
    /// report itself stays available for inspection either way.
    pub fn ensure_success(&self) -> Result<()> {
        match self.status {
            RunStatus::Success => Ok(()),
            RunStatus::Cancelled => Err(TransferError::Cancelled),
            _ => {
                let unsuccessful = self
                    .results
                    .iter()
                    .filter(|r| r.status != TaskStatus::Succeeded)
                    .count();
                Err(TransferError::Validation(format!(
                    "run {} finished {:?}: {} objects unsuccessful, {} mismatches",
                    self.run_id,
                    self.status,
                    unsuccessful,
                    self.mismatches.len()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ObjectId, ObjectKind};

    fn result(name: &str, status: TaskStatus) -> TransferResult {
        TransferResult {
            object: ObjectId::new("app", name, ObjectKind::Table),
            status,
            rows_source: 0,
            rows_transferred: 0,
            rows_target: None,
            elapsed_seconds: 0.0,
            errors: Vec::new(),
        }
    }

    #[test]
    fn test_status_success() {
        let results = vec![result("a", TaskStatus::Succeeded)];
        assert_eq!(RunStatus::from_results(&results, false), RunStatus::Success);
    }

    #[test]
    fn test_status_partial() {
        let results = vec![
            result("a", TaskStatus::Succeeded),
            result("b", TaskStatus::Failed),
        ];
        assert_eq!(RunStatus::from_results(&results, false), RunStatus::Partial);
    }

    #[test]
    fn test_status_failed_when_nothing_succeeded() {
        let results = vec![
            result("a", TaskStatus::Failed),
            result("b", TaskStatus::Skipped),
        ];
        assert_eq!(RunStatus::from_results(&results, false), RunStatus::Failed);
    }

    #[test]
    fn test_cancelled_wins() {
        let results = vec![result("a", TaskStatus::Succeeded)];
        assert_eq!(
            RunStatus::from_results(&results, true),
            RunStatus::Cancelled
        );
    }

    fn report(status: RunStatus, results: Vec<TransferResult>) -> TransferReport {
        TransferReport {
            run_id: "test".into(),
            status,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            elapsed_seconds: 1.5,
            rows_transferred: 42,
            results,
            cycles: CycleReport::default(),
            problems: Vec::new(),
            mismatches: Vec::new(),
        }
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = report(RunStatus::Success, vec![result("a", TaskStatus::Succeeded)]);

        let json = report.to_json().unwrap();
        assert!(json.contains("\"status\": \"success\""));
        assert!(json.contains("\"rows_transferred\": 42"));
    }

    #[test]
    fn test_ensure_success_passes_clean_run() {
        let report = report(RunStatus::Success, vec![result("a", TaskStatus::Succeeded)]);
        report.ensure_success().unwrap();
    }

    #[test]
    fn test_ensure_success_surfaces_cancellation() {
        let report = report(RunStatus::Cancelled, vec![result("a", TaskStatus::Skipped)]);
        assert!(matches!(
            report.ensure_success(),
            Err(TransferError::Cancelled)
        ));
    }

    #[test]
    fn test_ensure_success_rejects_partial_run() {
        let report = report(
            RunStatus::Partial,
            vec![
                result("a", TaskStatus::Succeeded),
                result("b", TaskStatus::Failed),
            ],
        );
        match report.ensure_success() {
            Err(TransferError::Validation(msg)) => assert!(msg.contains("1 objects unsuccessful")),
            other => panic!("expected Validation error, got {:?}", other),
        }
    }
}
