//! SQLite-backed transaction log.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{
    payload_digest, LedgerError, NewTransaction, RecordFilter, RecordSnapshot, Transaction,
    TransactionLog,
};
use crate::record::{DoiState, IdentifierRecord};

const COLUMNS: &str = "t.id, t.record_key, t.sequence, t.previous_state, t.new_state, \
     t.timestamp, t.actor, t.message, t.payload, t.payload_digest";

const LATEST_ONLY: &str =
    "t.sequence = (SELECT MAX(s.sequence) FROM transactions s WHERE s.record_key = t.record_key)";

/// SQLite-backed transaction log.
///
/// Rows are immutable: triggers abort any UPDATE or DELETE on the table.
pub struct SqliteTransactionLog {
    conn: Mutex<Connection>,
}

impl SqliteTransactionLog {
    /// Open (or create) a transaction log database file.
    pub fn new(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path).map_err(|e| LedgerError::Database(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory transaction log (useful for testing).
    pub fn in_memory() -> Result<Self, LedgerError> {
        let conn =
            Connection::open_in_memory().map_err(|e| LedgerError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), LedgerError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                record_key TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                previous_state TEXT,
                new_state TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                actor TEXT NOT NULL,
                node TEXT NOT NULL,
                external_id TEXT,
                message TEXT,
                payload TEXT NOT NULL,
                payload_digest TEXT NOT NULL,
                UNIQUE (record_key, sequence)
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_new_state ON transactions(new_state);
            CREATE INDEX IF NOT EXISTS idx_transactions_timestamp ON transactions(timestamp);
            CREATE INDEX IF NOT EXISTS idx_transactions_external_id ON transactions(external_id);

            CREATE TRIGGER IF NOT EXISTS transactions_no_update
            BEFORE UPDATE ON transactions
            BEGIN
                SELECT RAISE(ABORT, 'transactions are immutable');
            END;

            CREATE TRIGGER IF NOT EXISTS transactions_no_delete
            BEFORE DELETE ON transactions
            BEGIN
                SELECT RAISE(ABORT, 'transactions are immutable');
            END;
            "#,
        )
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &RecordFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = vec![LATEST_ONLY];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(state) = filter.state {
            conditions.push("t.new_state = ?");
            params.push(Box::new(state.as_str()));
        }

        if let Some(ref node) = filter.node {
            conditions.push("lower(t.node) = lower(?)");
            params.push(Box::new(node.clone()));
        }

        if let Some(ref submitter) = filter.submitter {
            conditions.push("t.actor = ?");
            params.push(Box::new(submitter.clone()));
        }

        if let Some(ref external_id) = filter.external_id {
            conditions.push("t.external_id = ?");
            params.push(Box::new(external_id.clone()));
        }

        if let Some(after) = filter.modified_after {
            conditions.push("t.timestamp >= ?");
            params.push(Box::new(format_timestamp(&after)));
        }

        if let Some(before) = filter.modified_before {
            conditions.push("t.timestamp <= ?");
            params.push(Box::new(format_timestamp(&before)));
        }

        (format!("WHERE {}", conditions.join(" AND ")), params)
    }

    fn read_row(row: &rusqlite::Row) -> rusqlite::Result<TransactionRow> {
        Ok(TransactionRow {
            id: row.get(0)?,
            key: row.get(1)?,
            sequence: row.get(2)?,
            previous_state: row.get(3)?,
            new_state: row.get(4)?,
            timestamp: row.get(5)?,
            actor: row.get(6)?,
            message: row.get(7)?,
            payload: row.get(8)?,
            payload_digest: row.get(9)?,
        })
    }
}

/// Timestamps are stored in a fixed-width UTC form so they sort as text.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::Corrupt(format!("Invalid timestamp {}: {}", raw, e)))
}

fn parse_state(raw: &str) -> Result<DoiState, LedgerError> {
    raw.parse::<DoiState>().map_err(LedgerError::Corrupt)
}

struct TransactionRow {
    id: i64,
    key: String,
    sequence: i64,
    previous_state: Option<String>,
    new_state: String,
    timestamp: String,
    actor: String,
    message: Option<String>,
    payload: String,
    payload_digest: String,
}

impl TransactionRow {
    fn into_transaction(self) -> Result<Transaction, LedgerError> {
        if payload_digest(&self.payload) != self.payload_digest {
            return Err(LedgerError::Corrupt(format!(
                "{} #{}: payload digest mismatch",
                self.key, self.sequence
            )));
        }

        let snapshot: RecordSnapshot = serde_json::from_str(&self.payload)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;

        Ok(Transaction {
            id: self.id,
            key: self.key,
            sequence: self.sequence,
            previous_state: self.previous_state.as_deref().map(parse_state).transpose()?,
            new_state: parse_state(&self.new_state)?,
            timestamp: parse_timestamp(&self.timestamp)?,
            actor: self.actor,
            message: self.message,
            snapshot,
            payload_digest: self.payload_digest,
        })
    }
}

impl TransactionLog for SqliteTransactionLog {
    fn append(&self, tx: NewTransaction) -> Result<Transaction, LedgerError> {
        let mut conn = self.lock()?;

        let payload = serde_json::to_string(&tx.snapshot)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        let digest = payload_digest(&payload);

        // IMMEDIATE takes the write lock up front so the state check and the
        // insert are atomic across connections too.
        let db_tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        let last: Option<(i64, String, String)> = db_tx
            .query_row(
                "SELECT sequence, new_state, timestamp FROM transactions \
                 WHERE record_key = ? ORDER BY sequence DESC LIMIT 1",
                params![tx.key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        let (sequence, actual, last_timestamp) = match last {
            Some((seq, state, ts)) => (
                seq + 1,
                Some(parse_state(&state)?),
                Some(parse_timestamp(&ts)?),
            ),
            None => (1, None, None),
        };

        if actual != tx.previous_state {
            return Err(LedgerError::OutOfOrder {
                key: tx.key,
                declared: tx.previous_state,
                actual,
            });
        }

        // Truncate to the stored precision so the returned value matches reads.
        let now = parse_timestamp(&format_timestamp(&Utc::now()))?;
        let timestamp = match last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };

        db_tx
            .execute(
                "INSERT INTO transactions (record_key, sequence, previous_state, new_state, timestamp, actor, node, external_id, message, payload, payload_digest) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    tx.key,
                    sequence,
                    tx.previous_state.map(|s| s.as_str()),
                    tx.new_state.as_str(),
                    format_timestamp(&timestamp),
                    tx.actor,
                    tx.snapshot.request.node,
                    tx.snapshot.request.external_id,
                    tx.message,
                    payload,
                    digest,
                ],
            )
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        let id = db_tx.last_insert_rowid();
        db_tx
            .commit()
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        Ok(Transaction {
            id,
            key: tx.key,
            sequence,
            previous_state: tx.previous_state,
            new_state: tx.new_state,
            timestamp,
            actor: tx.actor,
            message: tx.message,
            snapshot: tx.snapshot,
            payload_digest: digest,
        })
    }

    fn transactions_for(&self, key: &str) -> Result<Vec<Transaction>, LedgerError> {
        let conn = self.lock()?;

        let sql = format!(
            "SELECT {} FROM transactions t WHERE t.record_key = ? ORDER BY t.sequence ASC",
            COLUMNS
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![key], Self::read_row)
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        let mut transactions = Vec::new();
        for row_result in rows {
            let row = row_result.map_err(|e| LedgerError::Database(e.to_string()))?;
            transactions.push(row.into_transaction()?);
        }

        Ok(transactions)
    }

    fn latest(&self, key: &str) -> Result<Option<Transaction>, LedgerError> {
        let conn = self.lock()?;

        let sql = format!(
            "SELECT {} FROM transactions t WHERE t.record_key = ? ORDER BY t.sequence DESC LIMIT 1",
            COLUMNS
        );
        let row = conn
            .query_row(&sql, params![key], Self::read_row)
            .optional()
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        row.map(TransactionRow::into_transaction).transpose()
    }

    fn pending_keys(&self) -> Result<Vec<String>, LedgerError> {
        let conn = self.lock()?;

        let sql = format!(
            "SELECT t.record_key FROM transactions t WHERE {} AND t.new_state IN (?, ?) ORDER BY t.record_key ASC",
            LATEST_ONLY
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(
                params![
                    DoiState::Reserved.as_str(),
                    DoiState::PendingRegistration.as_str()
                ],
                |row| row.get::<_, String>(0),
            )
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| LedgerError::Database(e.to_string()))
    }

    fn list(&self, filter: &RecordFilter) -> Result<Vec<IdentifierRecord>, LedgerError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM transactions t {} ORDER BY t.timestamp DESC, t.record_key ASC LIMIT ? OFFSET ?",
            COLUMNS, where_clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        // Build parameter slice with limit and offset
        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::read_row)
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        let mut records = Vec::new();
        for row_result in rows {
            let row = row_result.map_err(|e| LedgerError::Database(e.to_string()))?;
            records.push(row.into_transaction()?.to_record());
        }

        Ok(records)
    }

    fn count(&self, filter: &RecordFilter) -> Result<i64, LedgerError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!("SELECT COUNT(*) FROM transactions t {}", where_clause);

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| LedgerError::Database(e.to_string()))
    }
}
