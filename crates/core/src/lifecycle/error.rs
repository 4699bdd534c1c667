use thiserror::Error;

use crate::ledger::LedgerError;
use crate::record::{state_label, DoiState, RecordField};
use crate::validator::Violation;

/// Errors returned by lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The record failed validation. Nothing was sent or appended.
    #[error("validation failed for {key}: {}", join(.violations))]
    ValidationFailed {
        key: String,
        violations: Vec<Violation>,
    },

    /// The authority refused the record. The key is now in `error`.
    #[error("registration rejected for {key}: {reason}")]
    RegistrationRejected { key: String, reason: String },

    /// Transient authority or network failure. State is unchanged.
    #[error("registration authority unavailable for {key}: {reason}")]
    RegistrationUnavailable { key: String, reason: String },

    /// Another transition for the key is in flight or already landed.
    #[error("concurrent modification of {key}: {detail}")]
    ConcurrentModification { key: String, detail: String },

    #[error("cannot {operation} {key} in state {}", state_label(*.state))]
    InvalidTransition {
        key: String,
        operation: &'static str,
        state: Option<DoiState>,
    },

    #[error("no record for key {0}")]
    NotFound(String),

    /// The supplied identifier differs from the one already issued.
    #[error("identifier mismatch for {key}: recorded {recorded}, supplied {supplied}")]
    IdentifierMismatch {
        key: String,
        recorded: String,
        supplied: String,
    },

    /// The update touches fields that may not change once registered.
    #[error("{key} is registered; these fields may not change: {}", join(.fields))]
    UpdateNotAllowed {
        key: String,
        fields: Vec<RecordField>,
    },

    #[error("persistence error: {0}")]
    Persistence(String),
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl LifecycleError {
    /// Short label for metrics and API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleError::ValidationFailed { .. } => "validation_failed",
            LifecycleError::RegistrationRejected { .. } => "registration_rejected",
            LifecycleError::RegistrationUnavailable { .. } => "registration_unavailable",
            LifecycleError::ConcurrentModification { .. } => "concurrent_modification",
            LifecycleError::InvalidTransition { .. } => "invalid_transition",
            LifecycleError::NotFound(_) => "not_found",
            LifecycleError::IdentifierMismatch { .. } => "identifier_mismatch",
            LifecycleError::UpdateNotAllowed { .. } => "update_not_allowed",
            LifecycleError::Persistence(_) => "persistence",
        }
    }

    /// Whether repeating the same call unchanged may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LifecycleError::RegistrationUnavailable { .. }
                | LifecycleError::ConcurrentModification { .. }
                | LifecycleError::Persistence(_)
        )
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            LifecycleError::ValidationFailed { violations, .. } => violations,
            _ => &[],
        }
    }
}

impl From<LedgerError> for LifecycleError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::OutOfOrder { key, .. } => LifecycleError::ConcurrentModification {
                detail: out_of_order_detail(&key),
                key,
            },
            other => LifecycleError::Persistence(other.to_string()),
        }
    }
}

fn out_of_order_detail(key: &str) -> String {
    format!("state of {} changed before the transition was recorded", key)
}
