//! Append-only transaction log.
//!
//! Every lifecycle transition is persisted here as an immutable
//! [`Transaction`]. The log is the only source of a key's current state;
//! [`IdentifierRecord`](crate::record::IdentifierRecord) values are
//! projections of the latest transaction for each key.

mod sqlite;
mod store;
mod types;

pub use sqlite::SqliteTransactionLog;
pub use store::{LedgerError, TransactionLog};
pub use types::{fold_state, payload_digest, NewTransaction, RecordFilter, RecordSnapshot, Transaction};
