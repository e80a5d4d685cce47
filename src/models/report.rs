//! Run report models
//!
//! A run yields one [`SyncResult`] per form and an aggregated [`SyncReport`]
//! returned to the trigger caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::FormSpec;

/// Status of one form within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Table replaced with fetched rows
    Success,
    /// Source returned no records, table left untouched
    NoData,
    /// Fetch or write failed
    Error,
    /// Not started because the run was cancelled
    Skipped,
}

impl SyncStatus {
    /// Whether the form counts towards a successful run
    pub fn is_ok(&self) -> bool {
        matches!(self, SyncStatus::Success | SyncStatus::NoData)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::NoData => "no_data",
            SyncStatus::Error => "error",
            SyncStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(SyncStatus::Success),
            "no_data" => Ok(SyncStatus::NoData),
            "error" => Ok(SyncStatus::Error),
            "skipped" => Ok(SyncStatus::Skipped),
            _ => Err(format!("Invalid sync status: {}", s)),
        }
    }
}

/// Outcome of one form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Destination table
    pub form: String,

    /// Source form type
    pub source_id: String,

    pub status: SyncStatus,

    /// Rows written, present when the form succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,

    /// Error message, present when the form failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResult {
    pub fn success(form: &FormSpec, row_count: usize) -> Self {
        Self::new(form, SyncStatus::Success, Some(row_count), None)
    }

    pub fn no_data(form: &FormSpec) -> Self {
        Self::new(form, SyncStatus::NoData, Some(0), None)
    }

    pub fn error(form: &FormSpec, error: impl ToString) -> Self {
        Self::new(form, SyncStatus::Error, None, Some(error.to_string()))
    }

    pub fn skipped(form: &FormSpec) -> Self {
        Self::new(form, SyncStatus::Skipped, None, None)
    }

    fn new(
        form: &FormSpec,
        status: SyncStatus,
        row_count: Option<usize>,
        error: Option<String>,
    ) -> Self {
        Self {
            form: form.destination_table.clone(),
            source_id: form.source_id.clone(),
            status,
            row_count,
            error,
        }
    }
}

/// Aggregated outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Partial,
    Failed,
}

impl RunOutcome {
    /// Derive the outcome from per-form results
    ///
    /// An empty run counts as success.
    pub fn from_results(results: &[SyncResult]) -> Self {
        let ok = results.iter().filter(|r| r.status.is_ok()).count();
        let failed = results.len() - ok;

        match (ok, failed) {
            (_, 0) => RunOutcome::Success,
            (0, _) => RunOutcome::Failed,
            _ => RunOutcome::Partial,
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Success => write!(f, "success"),
            RunOutcome::Partial => write!(f, "partial"),
            RunOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Report returned for a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub outcome: RunOutcome,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<SyncResult>,
}

impl SyncReport {
    /// Build a report from the results of a finished run
    pub fn new(started_at: DateTime<Utc>, results: Vec<SyncResult>) -> Self {
        let outcome = RunOutcome::from_results(&results);
        let failed = results.iter().filter(|r| !r.status.is_ok()).count();
        let message = match outcome {
            RunOutcome::Success => "All forms processed successfully".to_string(),
            RunOutcome::Partial => format!(
                "{} of {} forms failed or were skipped",
                failed,
                results.len()
            ),
            RunOutcome::Failed => "No form was processed successfully".to_string(),
        };

        Self {
            outcome,
            message,
            started_at,
            finished_at: Utc::now(),
            results,
        }
    }

    /// Results with the given status
    pub fn with_status(&self, status: SyncStatus) -> impl Iterator<Item = &SyncResult> {
        self.results.iter().filter(move |r| r.status == status)
    }
}
