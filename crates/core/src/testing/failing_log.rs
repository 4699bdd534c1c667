//! Transaction log wrapper that can refuse writes.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::ledger::{
    LedgerError, NewTransaction, RecordFilter, SqliteTransactionLog, Transaction, TransactionLog,
};
use crate::record::IdentifierRecord;

/// In-memory SQLite log whose appends can be switched to fail, for
/// exercising the "authority accepted but the write was lost" path.
pub struct FailingTransactionLog {
    inner: SqliteTransactionLog,
    fail_appends: AtomicBool,
}

impl FailingTransactionLog {
    pub fn new() -> Result<Self, LedgerError> {
        Ok(Self {
            inner: SqliteTransactionLog::in_memory()?,
            fail_appends: AtomicBool::new(false),
        })
    }

    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }
}

impl TransactionLog for FailingTransactionLog {
    fn append(&self, tx: NewTransaction) -> Result<Transaction, LedgerError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(LedgerError::Database("disk I/O error".to_string()));
        }
        self.inner.append(tx)
    }

    fn transactions_for(&self, key: &str) -> Result<Vec<Transaction>, LedgerError> {
        self.inner.transactions_for(key)
    }

    fn latest(&self, key: &str) -> Result<Option<Transaction>, LedgerError> {
        self.inner.latest(key)
    }

    fn pending_keys(&self) -> Result<Vec<String>, LedgerError> {
        self.inner.pending_keys()
    }

    fn list(&self, filter: &RecordFilter) -> Result<Vec<IdentifierRecord>, LedgerError> {
        self.inner.list(filter)
    }

    fn count(&self, filter: &RecordFilter) -> Result<i64, LedgerError> {
        self.inner.count(filter)
    }
}
