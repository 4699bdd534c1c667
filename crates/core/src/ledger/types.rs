use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::LedgerError;
use crate::record::{state_label, DoiRequest, DoiState, IdentifierRecord};

/// Record contents captured with every transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordSnapshot {
    /// The request as last accepted for this key.
    pub request: DoiRequest,
    pub publisher: String,
    /// Exchange document sent to the authority, absent for local-only states.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// A transition to be appended.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub key: String,
    /// State the writer observed before the transition (`None` for a new key).
    pub previous_state: Option<DoiState>,
    pub new_state: DoiState,
    pub actor: String,
    pub message: Option<String>,
    pub snapshot: RecordSnapshot,
}

impl NewTransaction {
    pub fn new(
        previous_state: Option<DoiState>,
        new_state: DoiState,
        actor: impl Into<String>,
        snapshot: RecordSnapshot,
    ) -> Self {
        Self {
            key: snapshot.request.key.clone(),
            previous_state,
            new_state,
            actor: actor.into(),
            message: None,
            snapshot,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// An immutable, persisted state transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: i64,
    pub key: String,
    /// Per-key sequence number, starting at 1 with no gaps.
    pub sequence: i64,
    pub previous_state: Option<DoiState>,
    pub new_state: DoiState,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub snapshot: RecordSnapshot,
    /// Hex SHA-256 of the stored snapshot document.
    pub payload_digest: String,
}

impl Transaction {
    pub fn external_id(&self) -> Option<&str> {
        self.snapshot.request.external_id.as_deref()
    }

    /// Project this transaction into the record view.
    pub fn to_record(&self) -> IdentifierRecord {
        let request = &self.snapshot.request;
        IdentifierRecord {
            key: self.key.clone(),
            state: self.new_state,
            external_id: request.external_id.clone(),
            title: request.title.clone(),
            node: request.node.clone(),
            contributors: request.contributors.clone(),
            publication_date: request.publication_date.clone(),
            landing_page: request.landing_page.clone(),
            description: request.description.clone(),
            keywords: request.keywords.clone(),
            publisher: self.snapshot.publisher.clone(),
            payload: self.snapshot.payload.clone(),
            submitter: self.actor.clone(),
            message: self.message.clone(),
            last_modified: self.timestamp,
        }
    }
}

/// Hex SHA-256 digest of a serialized snapshot.
pub fn payload_digest(serialized: &str) -> String {
    format!("{:x}", Sha256::digest(serialized.as_bytes()))
}

/// Fold a key's transactions (oldest first) into its current state.
///
/// Fails with `Corrupt` if the chain is broken: a sequence gap, or a
/// transaction whose previous state is not the state produced by the one
/// before it.
pub fn fold_state(transactions: &[Transaction]) -> Result<Option<DoiState>, LedgerError> {
    let mut state: Option<DoiState> = None;
    for (idx, tx) in transactions.iter().enumerate() {
        let expected_sequence = idx as i64 + 1;
        if tx.sequence != expected_sequence {
            return Err(LedgerError::Corrupt(format!(
                "{}: expected sequence {}, found {}",
                tx.key, expected_sequence, tx.sequence
            )));
        }
        if tx.previous_state != state {
            return Err(LedgerError::Corrupt(format!(
                "{} #{}: previous state {} does not follow {}",
                tx.key,
                tx.sequence,
                state_label(tx.previous_state),
                state_label(state)
            )));
        }
        state = Some(tx.new_state);
    }
    Ok(state)
}

/// Filter for listing projected records.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub state: Option<DoiState>,
    pub node: Option<String>,
    /// Actor of the latest transaction.
    pub submitter: Option<String>,
    pub external_id: Option<String>,
    pub modified_after: Option<DateTime<Utc>>,
    pub modified_before: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl RecordFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            limit: 100,
            offset: 0,
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: DoiState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_submitter(mut self, submitter: impl Into<String>) -> Self {
        self.submitter = Some(submitter.into());
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_modified_range(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.modified_after = after;
        self.modified_before = before;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}
