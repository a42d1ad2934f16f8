use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ContentHash, RunId};
use crate::outcome::{FailureKind, Outcome};

/// Audit record of a single pipeline run.
///
/// Records carry a hash of the source, never the source or any computed
/// values, so they can be logged freely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct RunRecord {
    /// Unique identifier for this run.
    pub id: RunId,
    /// SHA-256 of the submitted source text.
    pub source_hash: ContentHash,
    /// When the run was received.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration from receipt to outcome.
    pub duration: Duration,
    /// Terminal state of the run.
    pub status: RunStatus,
}

impl RunRecord {
    /// Create a record for a run that has just finished.
    #[must_use]
    pub fn new(
        id: RunId,
        source_hash: ContentHash,
        started_at: DateTime<Utc>,
        duration: Duration,
        status: RunStatus,
    ) -> Self {
        Self {
            id,
            source_hash,
            started_at,
            duration,
            status,
        }
    }
}

/// Terminal state of a run, mirroring the orchestrator's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum RunStatus {
    /// Static analysis refused the source; nothing was executed.
    Rejected,
    /// Execution started but did not complete.
    ExecFailed { kind: FailureKind },
    /// Execution and serialization completed.
    Completed,
    /// The final extraction step failed.
    SerializationFailed,
}

impl From<&Outcome> for RunStatus {
    fn from(outcome: &Outcome) -> Self {
        match outcome.failure_kind() {
            None => Self::Completed,
            Some(FailureKind::SyntaxError | FailureKind::UnsafeCode) => Self::Rejected,
            Some(FailureKind::SerializationError) => Self::SerializationFailed,
            Some(kind) => Self::ExecFailed { kind },
        }
    }
}
