use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lifecycle::{LifecycleError, SubmitMode};
use crate::record::{DoiState, IdentifierRecord};
use crate::validator::Violation;

/// Result of one record in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Accepted {
        state: DoiState,
        #[serde(skip_serializing_if = "Option::is_none")]
        external_id: Option<String>,
    },
    Rejected {
        /// Error kind, as in `LifecycleError::kind`.
        kind: String,
        message: String,
        retryable: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        violations: Vec<Violation>,
    },
}

impl RecordOutcome {
    pub fn accepted(record: &IdentifierRecord) -> Self {
        RecordOutcome::Accepted {
            state: record.state,
            external_id: record.external_id.clone(),
        }
    }

    pub fn rejected(err: &LifecycleError) -> Self {
        RecordOutcome::Rejected {
            kind: err.kind().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            violations: err.violations().to_vec(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, RecordOutcome::Accepted { .. })
    }
}

/// Outcome for the record at `index` in the submitted batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub index: usize,
    pub key: String,
    #[serde(flatten)]
    pub outcome: RecordOutcome,
}

/// A processed batch. Outcomes are in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: Uuid,
    pub mode: SubmitMode,
    /// Validation only: nothing was sent to the authority or recorded.
    #[serde(default)]
    pub dry_run: bool,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub accepted: usize,
    pub rejected: usize,
    pub outcomes: Vec<BatchOutcome>,
}

impl BatchJob {
    pub(crate) fn new(
        mode: SubmitMode,
        dry_run: bool,
        submitted_at: DateTime<Utc>,
        outcomes: Vec<BatchOutcome>,
    ) -> Self {
        let accepted = outcomes.iter().filter(|o| o.outcome.is_accepted()).count();
        Self {
            id: Uuid::new_v4(),
            mode,
            dry_run,
            submitted_at,
            completed_at: Utc::now(),
            accepted,
            rejected: outcomes.len() - accepted,
            outcomes,
        }
    }

    /// Outcomes of rejected records.
    pub fn rejections(&self) -> impl Iterator<Item = &BatchOutcome> {
        self.outcomes.iter().filter(|o| !o.outcome.is_accepted())
    }
}
