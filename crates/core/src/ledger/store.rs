//! Transaction log trait and error type.

use thiserror::Error;

use super::{NewTransaction, RecordFilter, Transaction};
use crate::record::{state_label, DoiState, IdentifierRecord};

/// Errors from transaction log operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The declared previous state no longer matches the key's current state.
    #[error(
        "out of order append for {key}: declared previous state {}, current state {}",
        state_label(*.declared),
        state_label(*.actual)
    )]
    OutOfOrder {
        key: String,
        declared: Option<DoiState>,
        actual: Option<DoiState>,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored row failed an integrity check.
    #[error("Corrupt transaction log: {0}")]
    Corrupt(String),
}

/// Trait for transaction log implementations.
///
/// `append` is the only write. Implementations must check the transaction's
/// declared previous state against the key's current state atomically with
/// the write, and assign gap-free per-key sequence numbers.
pub trait TransactionLog: Send + Sync {
    /// Append a transition, failing with `OutOfOrder` if the key's current
    /// state differs from `tx.previous_state`.
    fn append(&self, tx: NewTransaction) -> Result<Transaction, LedgerError>;

    /// All transactions for a key, oldest first.
    fn transactions_for(&self, key: &str) -> Result<Vec<Transaction>, LedgerError>;

    /// Most recent transaction for a key.
    fn latest(&self, key: &str) -> Result<Option<Transaction>, LedgerError>;

    /// Current projected state of a key, `None` if it has no transactions.
    fn current_state(&self, key: &str) -> Result<Option<DoiState>, LedgerError> {
        Ok(self.latest(key)?.map(|tx| tx.new_state))
    }

    /// Keys whose current state is `reserved` or `pending_registration`.
    fn pending_keys(&self) -> Result<Vec<String>, LedgerError>;

    /// Projected records matching the filter, most recently modified first.
    fn list(&self, filter: &RecordFilter) -> Result<Vec<IdentifierRecord>, LedgerError>;

    /// Number of records matching the filter (ignoring limit/offset).
    fn count(&self, filter: &RecordFilter) -> Result<i64, LedgerError>;
}
