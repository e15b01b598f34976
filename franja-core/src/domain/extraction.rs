//! Extraction run states and outcomes

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::{Error, ErrorKind};

/// Phase of an extraction run
///
/// `Idle -> Validating -> Connecting -> Extracting -> Reporting -> Done`,
/// with `Failed` reachable from every non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Validating,
    Connecting,
    Extracting,
    Reporting,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Idle, Validating)
            | (Validating, Connecting)
            | (Connecting, Extracting)
            | (Extracting, Reporting)
            | (Reporting, Done) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Validating => "validating",
            RunState::Connecting => "connecting",
            RunState::Extracting => "extracting",
            RunState::Reporting => "reporting",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rows written to each report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCounts {
    pub invoices: usize,
    pub partners: usize,
}

/// Summary of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub invoice_file_path: PathBuf,
    pub partner_file_path: PathBuf,
    pub row_counts: RowCounts,
    pub elapsed: Duration,
    pub warnings: Vec<String>,
}

/// Structured description of a failed run, safe to display
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionFailure {
    pub kind: ErrorKind,
    pub message: String,
    /// Phase that was running when the run failed
    pub phase: RunState,
}

impl ExtractionFailure {
    pub fn from_error(error: &Error, phase: RunState) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            phase,
        }
    }
}

impl fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (while {})", self.message, self.phase)
    }
}

impl std::error::Error for ExtractionFailure {}

/// Message sent from the worker to the caller
#[derive(Debug, Clone)]
pub enum RunEvent {
    Progress(RunState),
    Finished(Result<ExtractionResult, ExtractionFailure>),
}

/// A completed run as kept in the history log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub invoice_rows: u64,
    pub partner_rows: u64,
    pub elapsed_secs: f64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            RunState::Idle,
            RunState::Validating,
            RunState::Connecting,
            RunState::Extracting,
            RunState::Reporting,
            RunState::Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_failed_is_absorbing() {
        assert!(RunState::Extracting.can_advance_to(RunState::Failed));
        assert!(RunState::Idle.can_advance_to(RunState::Failed));
        assert!(!RunState::Failed.can_advance_to(RunState::Validating));
        assert!(!RunState::Done.can_advance_to(RunState::Failed));
        assert!(!RunState::Validating.can_advance_to(RunState::Reporting));
    }

    #[test]
    fn test_failure_from_error() {
        let failure = ExtractionFailure::from_error(&Error::Cancelled, RunState::Extracting);
        assert_eq!(failure.kind, ErrorKind::Cancelled);
        assert!(failure.to_string().contains("extracting"));
    }
}
