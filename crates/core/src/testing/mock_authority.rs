//! Mock registration authority for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::authority::{
    AuthorityReceipt, AuthorityRecord, RegistrationAuthority, RegistrationError, RemoteStatus,
};

/// A recorded authority call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// "reserve", "submit" or "query_status".
    pub operation: &'static str,
    /// Record key, for reserve and submit.
    pub key: Option<String>,
    /// Identifier sent with the call.
    pub external_id: Option<String>,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Mock implementation of the RegistrationAuthority trait.
///
/// Issues identifiers of the form `10.17189/NNNNNN`, one per record key, so a
/// resubmitted key gets the same identifier back. Status answers for
/// `query_status` are scripted per identifier and default to pending.
///
/// # Example
///
/// ```rust,ignore
/// let authority = MockRegistrationAuthority::new();
///
/// // Fail the next call
/// authority.set_next_error(RegistrationError::Timeout).await;
///
/// // Script what the authority reports for an identifier
/// authority.set_remote_status("10.17189/100000", RemoteStatus::Registered).await;
///
/// assert_eq!(authority.calls_for("submit").await.len(), 1);
/// ```
#[derive(Debug)]
pub struct MockRegistrationAuthority {
    /// Recorded calls.
    calls: Arc<RwLock<Vec<RecordedCall>>>,
    /// Identifiers issued by record key.
    issued: Arc<RwLock<HashMap<String, String>>>,
    /// Scripted query answers by identifier.
    remote: Arc<RwLock<HashMap<String, RemoteStatus>>>,
    /// Status returned by reserve.
    reserve_status: Arc<RwLock<RemoteStatus>>,
    /// Status returned by submit.
    submit_status: Arc<RwLock<RemoteStatus>>,
    /// If set, the next call will fail with this error.
    next_error: Arc<RwLock<Option<RegistrationError>>>,
    /// Artificial latency applied to every call.
    delay: Arc<RwLock<Duration>>,
    /// Whether receipts carry an identifier.
    issue_identifiers: Arc<RwLock<bool>>,
    /// Counter for generating identifiers.
    doi_counter: Arc<RwLock<u32>>,
}

impl Default for MockRegistrationAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRegistrationAuthority {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            issued: Arc::new(RwLock::new(HashMap::new())),
            remote: Arc::new(RwLock::new(HashMap::new())),
            reserve_status: Arc::new(RwLock::new(RemoteStatus::Reserved)),
            submit_status: Arc::new(RwLock::new(RemoteStatus::Pending)),
            next_error: Arc::new(RwLock::new(None)),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
            issue_identifiers: Arc::new(RwLock::new(true)),
            doi_counter: Arc::new(RwLock::new(100_000)),
        }
    }

    /// Get all recorded calls.
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }

    /// Recorded calls for one operation.
    pub async fn calls_for(&self, operation: &str) -> Vec<RecordedCall> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    /// Identifier issued for a record key, if any.
    pub async fn issued_doi(&self, key: &str) -> Option<String> {
        self.issued.read().await.get(key).cloned()
    }

    /// Script the status `query_status` reports for an identifier.
    pub async fn set_remote_status(&self, external_id: &str, status: RemoteStatus) {
        self.remote
            .write()
            .await
            .insert(external_id.to_string(), status);
    }

    pub async fn set_reserve_status(&self, status: RemoteStatus) {
        *self.reserve_status.write().await = status;
    }

    pub async fn set_submit_status(&self, status: RemoteStatus) {
        *self.submit_status.write().await = status;
    }

    /// Set an error to be returned on the next call.
    pub async fn set_next_error(&self, error: RegistrationError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    /// Whether reserve and submit receipts carry an identifier.
    pub async fn set_issue_identifiers(&self, issue: bool) {
        *self.issue_identifiers.write().await = issue;
    }

    async fn record(&self, operation: &'static str, key: Option<&str>, external_id: Option<&str>) {
        self.calls.write().await.push(RecordedCall {
            operation,
            key: key.map(str::to_string),
            external_id: external_id.map(str::to_string),
            timestamp: Utc::now(),
        });
    }

    async fn before_call(&self) -> Result<(), RegistrationError> {
        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.next_error.write().await.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn identifier_for(&self, record: &AuthorityRecord) -> Option<String> {
        if let Some(doi) = &record.doi {
            return Some(doi.clone());
        }
        if !*self.issue_identifiers.read().await {
            return None;
        }

        let mut issued = self.issued.write().await;
        if let Some(doi) = issued.get(&record.accession_number) {
            return Some(doi.clone());
        }
        let mut counter = self.doi_counter.write().await;
        *counter += 1;
        let doi = format!("10.17189/{}", *counter);
        issued.insert(record.accession_number.clone(), doi.clone());
        Some(doi)
    }

    async fn answer(
        &self,
        operation: &'static str,
        record: &AuthorityRecord,
        status: RemoteStatus,
    ) -> Result<AuthorityReceipt, RegistrationError> {
        self.record(
            operation,
            Some(&record.accession_number),
            record.doi.as_deref(),
        )
        .await;
        self.before_call().await?;

        let external_id = match status {
            RemoteStatus::Error { .. } => record.doi.clone(),
            _ => self.identifier_for(record).await,
        };
        Ok(AuthorityReceipt {
            external_id,
            status,
        })
    }
}

#[async_trait]
impl RegistrationAuthority for MockRegistrationAuthority {
    fn name(&self) -> &str {
        "mock"
    }

    async fn reserve(&self, record: &AuthorityRecord) -> Result<AuthorityReceipt, RegistrationError> {
        let status = self.reserve_status.read().await.clone();
        self.answer("reserve", record, status).await
    }

    async fn submit(&self, record: &AuthorityRecord) -> Result<AuthorityReceipt, RegistrationError> {
        let status = self.submit_status.read().await.clone();
        self.answer("submit", record, status).await
    }

    async fn query_status(&self, external_id: &str) -> Result<RemoteStatus, RegistrationError> {
        self.record("query_status", None, Some(external_id)).await;
        self.before_call().await?;

        Ok(self
            .remote
            .read()
            .await
            .get(external_id)
            .cloned()
            .unwrap_or(RemoteStatus::Pending))
    }
}
