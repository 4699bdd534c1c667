use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::authority::{
    AuthorityReceipt, AuthorityRecord, RegistrationAuthority, RegistrationError, RemoteStatus,
};
use crate::config::LifecycleConfig;
use crate::ledger::{NewTransaction, RecordFilter, RecordSnapshot, Transaction, TransactionLog};
use crate::metrics;
use crate::record::{state_label, DoiRequest, DoiState, IdentifierRecord, RecordField};
use crate::validator::{RuleSet, Validator};

use super::LifecycleError;

/// What a submission should do with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitMode {
    /// Store locally as a draft.
    Draft,
    /// Reserve an identifier with the authority.
    Reserve,
    /// Submit for registration.
    Register,
}

impl SubmitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitMode::Draft => "draft",
            SubmitMode::Reserve => "reserve",
            SubmitMode::Register => "register",
        }
    }

    /// Whether a key in `current` may take this transition.
    pub fn admits(&self, current: Option<DoiState>) -> bool {
        match self {
            SubmitMode::Draft => matches!(
                current,
                None | Some(DoiState::Draft | DoiState::Reserved | DoiState::Error)
            ),
            SubmitMode::Reserve => {
                matches!(current, None | Some(DoiState::Draft | DoiState::Reserved))
            }
            SubmitMode::Register => matches!(
                current,
                Some(DoiState::Draft | DoiState::Reserved | DoiState::Registered)
            ),
        }
    }

    /// State recorded when the transition succeeds.
    pub fn target(&self) -> DoiState {
        match self {
            SubmitMode::Draft => DoiState::Draft,
            SubmitMode::Reserve => DoiState::Reserved,
            SubmitMode::Register => DoiState::PendingRegistration,
        }
    }

    fn rules(&self) -> RuleSet {
        match self {
            SubmitMode::Draft | SubmitMode::Reserve => RuleSet::Minimal,
            SubmitMode::Register => RuleSet::Full,
        }
    }
}

/// Releases a key's in-flight claim when dropped.
struct InFlightGuard {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

/// Drives identifier requests through their lifecycle.
///
/// Operations on different keys run fully in parallel. A second operation on
/// a key that already has one in flight in this process is refused with
/// `ConcurrentModification`; across processes the transaction log's
/// previous-state check gives the same result.
pub struct LifecycleManager {
    config: LifecycleConfig,
    log: Arc<dyn TransactionLog>,
    authority: Arc<dyn RegistrationAuthority>,
    validator: Arc<Validator>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl LifecycleManager {
    pub fn new(
        config: LifecycleConfig,
        log: Arc<dyn TransactionLog>,
        authority: Arc<dyn RegistrationAuthority>,
        validator: Arc<Validator>,
    ) -> Self {
        Self {
            config,
            log,
            authority,
            validator,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn log(&self) -> &Arc<dyn TransactionLog> {
        &self.log
    }

    pub fn authority(&self) -> &Arc<dyn RegistrationAuthority> {
        &self.authority
    }

    /// Apply `mode` to a request.
    pub async fn submit(
        &self,
        request: DoiRequest,
        mode: SubmitMode,
        actor: &str,
    ) -> Result<IdentifierRecord, LifecycleError> {
        match mode {
            SubmitMode::Draft => self.draft(request, actor).await,
            SubmitMode::Reserve => self.reserve(request, actor).await,
            SubmitMode::Register => self.register(request, actor).await,
        }
    }

    /// Check what `mode` would do without doing it.
    ///
    /// Runs the same precondition, identifier and rule checks as the real
    /// transition and returns the record it would produce. Nothing is sent
    /// to the authority and nothing is appended, so an identifier the
    /// authority would issue is absent from the preview.
    pub async fn dry_run(
        &self,
        request: DoiRequest,
        mode: SubmitMode,
        actor: &str,
    ) -> Result<IdentifierRecord, LifecycleError> {
        observe("dry_run", self.dry_run_inner(request, mode, actor).await)
    }

    /// Create or update a local draft, or move a reserved or failed record
    /// back to draft. No external call is made.
    pub async fn draft(
        &self,
        request: DoiRequest,
        actor: &str,
    ) -> Result<IdentifierRecord, LifecycleError> {
        observe("draft", self.draft_inner(request, actor).await)
    }

    /// Reserve an identifier for a new, draft or already reserved record.
    pub async fn reserve(
        &self,
        request: DoiRequest,
        actor: &str,
    ) -> Result<IdentifierRecord, LifecycleError> {
        observe("reserve", self.reserve_inner(request, actor).await)
    }

    /// Submit a draft, reserved or registered record for registration.
    pub async fn register(
        &self,
        request: DoiRequest,
        actor: &str,
    ) -> Result<IdentifierRecord, LifecycleError> {
        observe("register", self.register_inner(request, actor).await)
    }

    /// Move an `error` record back to the last stable state it held.
    pub async fn retry(&self, key: &str, actor: &str) -> Result<IdentifierRecord, LifecycleError> {
        observe("retry", self.retry_inner(key, actor))
    }

    /// Record an authority status observed for an in-flight key.
    ///
    /// `observed` is the latest transaction the caller read before querying
    /// the authority. Any transition appended since then, even one that kept
    /// the same state, makes the status stale and is refused with
    /// `ConcurrentModification`. Returns the new record when a transition was
    /// appended, `None` when the status calls for no change.
    pub fn apply_remote_status(
        &self,
        observed: &Transaction,
        status: &RemoteStatus,
        actor: &str,
    ) -> Result<Option<IdentifierRecord>, LifecycleError> {
        observe(
            "reconcile",
            self.apply_remote_status_inner(observed, status, actor),
        )
    }

    /// Current projection of a key.
    pub fn status(&self, key: &str) -> Result<IdentifierRecord, LifecycleError> {
        self.log
            .latest(key)?
            .map(|tx| tx.to_record())
            .ok_or_else(|| LifecycleError::NotFound(key.to_string()))
    }

    /// Every transaction recorded for a key, oldest first.
    pub fn history(&self, key: &str) -> Result<Vec<Transaction>, LifecycleError> {
        let history = self.log.transactions_for(key)?;
        if history.is_empty() {
            return Err(LifecycleError::NotFound(key.to_string()));
        }
        Ok(history)
    }

    pub fn list(&self, filter: &RecordFilter) -> Result<Vec<IdentifierRecord>, LifecycleError> {
        Ok(self.log.list(filter)?)
    }

    pub fn count(&self, filter: &RecordFilter) -> Result<i64, LifecycleError> {
        Ok(self.log.count(filter)?)
    }

    /// Run an authority call under the external call timeout.
    pub(crate) async fn call_authority<T>(
        &self,
        operation: &'static str,
        key: &str,
        call: impl Future<Output = Result<T, RegistrationError>>,
    ) -> Result<T, RegistrationError> {
        let timer = Instant::now();
        let result = match tokio::time::timeout(self.config.external_call_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(RegistrationError::Timeout),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::AUTHORITY_REQUESTS
            .with_label_values(&[operation, outcome])
            .inc();
        metrics::AUTHORITY_REQUEST_DURATION
            .with_label_values(&[operation])
            .observe(timer.elapsed().as_secs_f64());
        debug!(key = %key, operation, outcome, "Authority call finished");

        result
    }

    async fn draft_inner(
        &self,
        request: DoiRequest,
        actor: &str,
    ) -> Result<IdentifierRecord, LifecycleError> {
        let _guard = self.claim(&request.key)?;

        let latest = self.log.latest(&request.key)?;
        let current = latest.as_ref().map(|tx| tx.new_state);
        if !SubmitMode::Draft.admits(current) {
            return Err(invalid(&request.key, "draft", current));
        }

        let request = merge_identifier(latest.as_ref(), request)?;
        self.ensure_valid(&request, RuleSet::Minimal).await?;

        let mut tx = NewTransaction::new(current, DoiState::Draft, actor, self.snapshot(request));
        if let Some(previous @ (DoiState::Reserved | DoiState::Error)) = current {
            tx = tx.with_message(format!("moved back to draft from {}", previous));
        }

        Ok(self.append(tx)?.to_record())
    }

    async fn reserve_inner(
        &self,
        request: DoiRequest,
        actor: &str,
    ) -> Result<IdentifierRecord, LifecycleError> {
        let _guard = self.claim(&request.key)?;

        let latest = self.log.latest(&request.key)?;
        let current = latest.as_ref().map(|tx| tx.new_state);
        if !SubmitMode::Reserve.admits(current) {
            return Err(invalid(&request.key, "reserve", current));
        }

        let mut request = merge_identifier(latest.as_ref(), request)?;
        self.ensure_valid(&request, RuleSet::Minimal).await?;

        let outbound = AuthorityRecord::from_request(&request, &self.config.publisher);
        let result = self
            .call_authority("reserve", &request.key, self.authority.reserve(&outbound))
            .await;
        let receipt = match result {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.authority_failure(current, request, actor, e)),
        };

        match &receipt.status {
            RemoteStatus::Reserved => {}
            RemoteStatus::Error { message } => {
                return Err(self.record_rejection(current, request, actor, message.clone()))
            }
            other => {
                return Err(LifecycleError::RegistrationUnavailable {
                    key: request.key,
                    reason: format!("authority answered a reservation with {}", other.as_str()),
                })
            }
        }

        adopt_identifier(&mut request, &receipt)?;

        let tx = NewTransaction::new(current, DoiState::Reserved, actor, self.snapshot(request));
        Ok(self.append(tx)?.to_record())
    }

    async fn register_inner(
        &self,
        request: DoiRequest,
        actor: &str,
    ) -> Result<IdentifierRecord, LifecycleError> {
        let _guard = self.claim(&request.key)?;

        let latest = self.log.latest(&request.key)?;
        let current = latest.as_ref().map(|tx| tx.new_state);
        if !SubmitMode::Register.admits(current) {
            return Err(invalid(&request.key, "register", current));
        }

        let mut request = merge_identifier(latest.as_ref(), request)?;
        self.ensure_update_allowed(latest.as_ref(), &request)?;
        self.ensure_valid(&request, RuleSet::Full).await?;

        let outbound = AuthorityRecord::from_request(&request, &self.config.publisher);
        let result = self
            .call_authority("submit", &request.key, self.authority.submit(&outbound))
            .await;
        let receipt = match result {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.authority_failure(current, request, actor, e)),
        };

        match &receipt.status {
            // Registration is only confirmed by the reconciler, even when the
            // authority finishes synchronously.
            RemoteStatus::Pending | RemoteStatus::Registered => {}
            RemoteStatus::Error { message } => {
                return Err(self.record_rejection(current, request, actor, message.clone()))
            }
            RemoteStatus::Reserved => {
                return Err(LifecycleError::RegistrationUnavailable {
                    key: request.key,
                    reason: "authority answered a registration with reserved".to_string(),
                })
            }
        }

        adopt_identifier(&mut request, &receipt)?;
        // Without an identifier the reconciler could never query this key.
        if request.external_id.is_none() {
            return Err(LifecycleError::RegistrationUnavailable {
                key: request.key,
                reason: "authority accepted the submission without issuing an identifier"
                    .to_string(),
            });
        }

        let tx = NewTransaction::new(
            current,
            DoiState::PendingRegistration,
            actor,
            self.snapshot(request),
        );
        Ok(self.append(tx)?.to_record())
    }

    async fn dry_run_inner(
        &self,
        request: DoiRequest,
        mode: SubmitMode,
        actor: &str,
    ) -> Result<IdentifierRecord, LifecycleError> {
        let latest = self.log.latest(&request.key)?;
        let current = latest.as_ref().map(|tx| tx.new_state);
        if !mode.admits(current) {
            return Err(invalid(&request.key, mode.as_str(), current));
        }

        let request = merge_identifier(latest.as_ref(), request)?;
        if mode == SubmitMode::Register {
            self.ensure_update_allowed(latest.as_ref(), &request)?;
        }
        self.ensure_valid(&request, mode.rules()).await?;

        debug!(key = %request.key, mode = mode.as_str(), "Dry run passed");
        let RecordSnapshot {
            request,
            publisher,
            payload,
        } = self.snapshot(request);
        Ok(IdentifierRecord {
            key: request.key,
            state: mode.target(),
            external_id: request.external_id,
            title: request.title,
            node: request.node,
            contributors: request.contributors,
            publication_date: request.publication_date,
            landing_page: request.landing_page,
            description: request.description,
            keywords: request.keywords,
            publisher,
            payload,
            submitter: actor.to_string(),
            message: Some(format!("dry run of {}: nothing submitted", mode.as_str())),
            last_modified: Utc::now(),
        })
    }

    fn retry_inner(&self, key: &str, actor: &str) -> Result<IdentifierRecord, LifecycleError> {
        let _guard = self.claim(key)?;

        let history = self.log.transactions_for(key)?;
        let latest = history
            .last()
            .ok_or_else(|| LifecycleError::NotFound(key.to_string()))?;
        if latest.new_state != DoiState::Error {
            return Err(invalid(key, "retry", Some(latest.new_state)));
        }

        let stable = history
            .iter()
            .rev()
            .find(|tx| tx.new_state.is_retry_target());
        let target = stable.map(|tx| tx.new_state).unwrap_or(DoiState::Draft);

        let mut request = stable.unwrap_or(latest).snapshot.request.clone();
        request.external_id = history
            .iter()
            .rev()
            .find_map(|tx| tx.external_id().map(str::to_string));

        let tx = NewTransaction::new(Some(DoiState::Error), target, actor, self.snapshot(request))
            .with_message(format!("retried from error back to {}", target));
        Ok(self.append(tx)?.to_record())
    }

    fn apply_remote_status_inner(
        &self,
        observed: &Transaction,
        status: &RemoteStatus,
        actor: &str,
    ) -> Result<Option<IdentifierRecord>, LifecycleError> {
        let key = observed.key.as_str();
        let _guard = self.claim(key)?;

        let latest = self
            .log
            .latest(key)?
            .ok_or_else(|| LifecycleError::NotFound(key.to_string()))?;
        if latest.sequence != observed.sequence {
            return Err(LifecycleError::ConcurrentModification {
                key: key.to_string(),
                detail: format!(
                    "transaction #{} ({}) superseded by #{} ({}) during reconciliation",
                    observed.sequence, observed.new_state, latest.sequence, latest.new_state
                ),
            });
        }
        let observed = latest.new_state;

        let (new_state, message) = match (observed, status) {
            (DoiState::PendingRegistration, RemoteStatus::Registered) => {
                (DoiState::Registered, None)
            }
            (
                DoiState::PendingRegistration | DoiState::Reserved,
                RemoteStatus::Error { message },
            ) => (DoiState::Error, Some(message.clone())),
            (
                DoiState::PendingRegistration | DoiState::Reserved,
                RemoteStatus::Pending | RemoteStatus::Reserved,
            ) => return Ok(None),
            (DoiState::Reserved, RemoteStatus::Registered) => {
                warn!(
                    key = %key,
                    "Authority reports a reserved identifier as registered; ignoring"
                );
                return Ok(None);
            }
            (state, _) => return Err(invalid(key, "reconcile", Some(state))),
        };

        let mut tx = NewTransaction::new(Some(observed), new_state, actor, latest.snapshot);
        if let Some(message) = message {
            tx = tx.with_message(message);
        }
        Ok(Some(self.append(tx)?.to_record()))
    }

    fn claim(&self, key: &str) -> Result<InFlightGuard, LifecycleError> {
        let mut keys = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !keys.insert(key.to_string()) {
            return Err(LifecycleError::ConcurrentModification {
                key: key.to_string(),
                detail: "another transition is in flight".to_string(),
            });
        }
        Ok(InFlightGuard {
            keys: Arc::clone(&self.in_flight),
            key: key.to_string(),
        })
    }

    /// A registered record may only change the configured fields.
    fn ensure_update_allowed(
        &self,
        latest: Option<&Transaction>,
        request: &DoiRequest,
    ) -> Result<(), LifecycleError> {
        let Some(latest) = latest.filter(|tx| tx.new_state == DoiState::Registered) else {
            return Ok(());
        };
        let disallowed: Vec<RecordField> = latest
            .snapshot
            .request
            .changed_fields(request)
            .into_iter()
            .filter(|field| !self.config.update_allowed_fields.contains(field))
            .collect();
        if disallowed.is_empty() {
            Ok(())
        } else {
            Err(LifecycleError::UpdateNotAllowed {
                key: request.key.clone(),
                fields: disallowed,
            })
        }
    }

    async fn ensure_valid(&self, request: &DoiRequest, rules: RuleSet) -> Result<(), LifecycleError> {
        let violations = self.validator.validate(request, rules).await;
        if violations.is_empty() {
            Ok(())
        } else {
            Err(LifecycleError::ValidationFailed {
                key: request.key.clone(),
                violations,
            })
        }
    }

    fn snapshot(&self, request: DoiRequest) -> RecordSnapshot {
        let payload =
            serde_json::to_value(AuthorityRecord::from_request(&request, &self.config.publisher))
                .ok();
        RecordSnapshot {
            request,
            publisher: self.config.publisher.clone(),
            payload,
        }
    }

    fn append(&self, tx: NewTransaction) -> Result<Transaction, LifecycleError> {
        let from = state_label(tx.previous_state);
        let tx = self.log.append(tx)?;
        let to = tx.new_state.as_str();

        metrics::TRANSITIONS.with_label_values(&[from, to]).inc();
        info!(
            key = %tx.key,
            from,
            to,
            sequence = tx.sequence,
            external_id = ?tx.external_id(),
            "Transition recorded"
        );

        Ok(tx)
    }

    /// Turn a failed authority call into the caller-facing error, recording
    /// the `error` state for rejections.
    fn authority_failure(
        &self,
        current: Option<DoiState>,
        request: DoiRequest,
        actor: &str,
        err: RegistrationError,
    ) -> LifecycleError {
        if err.is_retryable() {
            warn!(key = %request.key, error = %err, "Authority unavailable");
            return LifecycleError::RegistrationUnavailable {
                key: request.key,
                reason: err.to_string(),
            };
        }
        self.record_rejection(current, request, actor, err.to_string())
    }

    fn record_rejection(
        &self,
        current: Option<DoiState>,
        request: DoiRequest,
        actor: &str,
        reason: String,
    ) -> LifecycleError {
        let key = request.key.clone();
        warn!(key = %key, reason = %reason, "Authority rejected record");

        let tx = NewTransaction::new(current, DoiState::Error, actor, self.snapshot(request))
            .with_message(reason.clone());
        match self.append(tx) {
            Ok(_) => LifecycleError::RegistrationRejected { key, reason },
            Err(e) => e,
        }
    }
}

fn observe<T>(
    operation: &'static str,
    result: Result<T, LifecycleError>,
) -> Result<T, LifecycleError> {
    if let Err(ref e) = result {
        metrics::LIFECYCLE_FAILURES
            .with_label_values(&[operation, e.kind()])
            .inc();
        debug!(operation, error = %e, "Lifecycle operation failed");
    }
    result
}

fn invalid(key: &str, operation: &'static str, state: Option<DoiState>) -> LifecycleError {
    LifecycleError::InvalidTransition {
        key: key.to_string(),
        operation,
        state,
    }
}

/// Carry the recorded identifier into the request, refusing a different one.
fn merge_identifier(
    latest: Option<&Transaction>,
    mut request: DoiRequest,
) -> Result<DoiRequest, LifecycleError> {
    let recorded = latest.and_then(|tx| tx.external_id());
    match (recorded, request.external_id.as_deref()) {
        (Some(recorded), Some(supplied)) if recorded != supplied => {
            Err(LifecycleError::IdentifierMismatch {
                key: request.key.clone(),
                recorded: recorded.to_string(),
                supplied: supplied.to_string(),
            })
        }
        (Some(recorded), _) => {
            request.external_id = Some(recorded.to_string());
            Ok(request)
        }
        (None, _) => Ok(request),
    }
}

/// Take the identifier from an authority receipt. An issued identifier never
/// changes, so a different one is a protocol failure.
fn adopt_identifier(
    request: &mut DoiRequest,
    receipt: &AuthorityReceipt,
) -> Result<(), LifecycleError> {
    match (&request.external_id, &receipt.external_id) {
        (Some(recorded), Some(returned)) if recorded != returned => {
            Err(LifecycleError::RegistrationUnavailable {
                key: request.key.clone(),
                reason: format!(
                    "authority returned identifier {} but {} is recorded",
                    returned, recorded
                ),
            })
        }
        (None, Some(returned)) => {
            request.external_id = Some(returned.clone());
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidatorConfig;
    use crate::ledger::SqliteTransactionLog;
    use crate::testing::{fixtures, MockLandingPageProbe, MockRegistrationAuthority};

    struct Harness {
        manager: LifecycleManager,
        authority: Arc<MockRegistrationAuthority>,
        probe: Arc<MockLandingPageProbe>,
    }

    fn harness() -> Harness {
        let authority = Arc::new(MockRegistrationAuthority::new());
        let probe = Arc::new(MockLandingPageProbe::new());
        let log = Arc::new(SqliteTransactionLog::in_memory().unwrap());
        let validator = Arc::new(Validator::new(probe.clone(), ValidatorConfig::default()));
        let manager = LifecycleManager::new(
            LifecycleConfig::default(),
            log,
            authority.clone(),
            validator,
        );
        Harness {
            manager,
            authority,
            probe,
        }
    }

    fn states(manager: &LifecycleManager, key: &str) -> Vec<(Option<DoiState>, DoiState)> {
        manager
            .history(key)
            .unwrap()
            .iter()
            .map(|tx| (tx.previous_state, tx.new_state))
            .collect()
    }

    #[tokio::test]
    async fn test_draft_creates_record_without_authority_call() {
        let h = harness();
        let record = h
            .manager
            .draft(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();

        assert_eq!(record.state, DoiState::Draft);
        assert_eq!(record.submitter, "alice");
        assert_eq!(record.publisher, LifecycleConfig::default().publisher);
        assert!(record.payload.is_some());
        assert!(h.authority.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_reserve_records_issued_identifier() {
        let h = harness();
        let record = h
            .manager
            .reserve(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();

        assert_eq!(record.state, DoiState::Reserved);
        let doi = record.external_id.clone().unwrap();
        assert_eq!(h.authority.issued_doi("urn:x:1").await, Some(doi.clone()));

        // Re-reserving keeps the identifier
        let again = h
            .manager
            .reserve(fixtures::doi_request("urn:x:1").with_description("more"), "alice")
            .await
            .unwrap();
        assert_eq!(again.state, DoiState::Reserved);
        assert_eq!(again.external_id, Some(doi));
        assert_eq!(
            states(&h.manager, "urn:x:1"),
            vec![
                (None, DoiState::Reserved),
                (Some(DoiState::Reserved), DoiState::Reserved)
            ]
        );
    }

    #[tokio::test]
    async fn test_reserve_without_identifier_in_receipt() {
        let h = harness();
        h.authority.set_issue_identifiers(false).await;

        let record = h
            .manager
            .reserve(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();
        assert_eq!(record.state, DoiState::Reserved);
        assert!(record.external_id.is_none());
    }

    #[tokio::test]
    async fn test_register_requires_existing_record() {
        let h = harness();
        let err = h
            .manager
            .register(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition { state: None, .. }
        ));
        assert!(h.authority.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_register_from_draft_goes_pending() {
        let h = harness();
        h.manager
            .draft(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();
        let record = h
            .manager
            .register(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();

        assert_eq!(record.state, DoiState::PendingRegistration);
        assert!(record.external_id.is_some());
        assert_eq!(h.probe.probed_urls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_register_validation_failure_makes_no_call() {
        let h = harness();
        h.manager
            .draft(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();

        let mut incomplete = fixtures::doi_request("urn:x:1");
        incomplete.publication_date = None;
        let err = h.manager.register(incomplete, "alice").await.unwrap_err();

        assert_eq!(err.violations().len(), 1);
        assert_eq!(err.violations()[0].field, "publication_date");
        assert!(h.authority.calls().await.is_empty());
        assert_eq!(states(&h.manager, "urn:x:1").len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_moves_to_error() {
        let h = harness();
        h.manager
            .draft(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();
        h.authority
            .set_next_error(RegistrationError::Rejected("schema violation".to_string()))
            .await;

        let err = h
            .manager
            .register(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::RegistrationRejected { .. }));

        let record = h.manager.status("urn:x:1").unwrap();
        assert_eq!(record.state, DoiState::Error);
        assert!(record.message.unwrap().contains("schema violation"));
    }

    #[tokio::test]
    async fn test_error_status_in_receipt_is_rejection() {
        let h = harness();
        h.manager
            .draft(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();
        h.authority
            .set_submit_status(RemoteStatus::Error {
                message: "duplicate title".to_string(),
            })
            .await;

        let err = h
            .manager
            .register(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::RegistrationRejected { ref reason, .. } if reason == "duplicate title"));
        assert_eq!(h.manager.status("urn:x:1").unwrap().state, DoiState::Error);
    }

    #[tokio::test]
    async fn test_unavailable_leaves_state_unchanged() {
        let h = harness();
        h.manager
            .reserve(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();
        h.authority
            .set_next_error(RegistrationError::Unavailable("HTTP 503".to_string()))
            .await;

        let err = h
            .manager
            .register(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::RegistrationUnavailable { .. }));
        assert!(err.is_retryable());
        assert_eq!(h.manager.status("urn:x:1").unwrap().state, DoiState::Reserved);

        // Same transition succeeds once the authority is back
        let record = h
            .manager
            .register(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();
        assert_eq!(record.state, DoiState::PendingRegistration);
    }

    #[tokio::test]
    async fn test_identifier_mismatch_refused() {
        let h = harness();
        let reserved = h
            .manager
            .reserve(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();
        assert_ne!(reserved.external_id.as_deref(), Some("10.99999/other"));

        let err = h
            .manager
            .register(
                fixtures::doi_request("urn:x:1").with_external_id("10.99999/other"),
                "alice",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::IdentifierMismatch { .. }));
        assert!(h.authority.calls_for("submit").await.is_empty());
    }

    #[tokio::test]
    async fn test_registered_update_field_rules() {
        let h = harness();
        h.manager
            .draft(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();
        let pending = h
            .manager
            .register(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();
        let observed = h.manager.log().latest("urn:x:1").unwrap().unwrap();
        h.manager
            .apply_remote_status(&observed, &RemoteStatus::Registered, "reconciler")
            .unwrap();

        // Moving to another node is not an allowed update
        let mut moved = fixtures::doi_request("urn:x:1");
        moved.node = "geo".to_string();
        let err = h.manager.register(moved, "alice").await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::UpdateNotAllowed { ref fields, .. } if fields == &vec![RecordField::Node]
        ));

        // A new landing page is
        let mut updated = fixtures::doi_request("urn:x:1");
        updated.landing_page = Some("https://valid.example/moved".to_string());
        let record = h.manager.register(updated, "alice").await.unwrap();
        assert_eq!(record.state, DoiState::PendingRegistration);
        assert_eq!(record.external_id, pending.external_id);
    }

    #[tokio::test]
    async fn test_retry_returns_to_last_stable_state() {
        let h = harness();
        h.manager
            .reserve(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();
        let pending = h
            .manager
            .register(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();
        let observed = h.manager.log().latest("urn:x:1").unwrap().unwrap();
        h.manager
            .apply_remote_status(
                &observed,
                &RemoteStatus::Error {
                    message: "broken".to_string(),
                },
                "reconciler",
            )
            .unwrap();

        let record = h.manager.retry("urn:x:1", "alice").await.unwrap();
        assert_eq!(record.state, DoiState::Reserved);
        assert_eq!(record.external_id, pending.external_id);

        let err = h.manager.retry("urn:x:1", "alice").await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_retry_without_stable_state_goes_to_draft() {
        let h = harness();
        h.authority
            .set_next_error(RegistrationError::Rejected("no".to_string()))
            .await;
        h.manager
            .reserve(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap_err();

        let record = h.manager.retry("urn:x:1", "alice").await.unwrap();
        assert_eq!(record.state, DoiState::Draft);
    }

    #[tokio::test]
    async fn test_draft_moves_reserved_back() {
        let h = harness();
        let reserved = h
            .manager
            .reserve(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();
        let record = h
            .manager
            .draft(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();
        assert_eq!(record.state, DoiState::Draft);
        assert_eq!(record.external_id, reserved.external_id);
        assert_eq!(record.message.as_deref(), Some("moved back to draft from reserved"));
    }

    #[tokio::test]
    async fn test_draft_refused_while_pending() {
        let h = harness();
        h.manager
            .draft(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();
        h.manager
            .register(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();

        let err = h
            .manager
            .draft(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition {
                state: Some(DoiState::PendingRegistration),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_apply_remote_status_detects_stale_observation() {
        let h = harness();
        h.manager
            .draft(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();
        h.manager
            .register(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();
        let observed = h.manager.log().latest("urn:x:1").unwrap().unwrap();
        h.manager
            .apply_remote_status(
                &observed,
                &RemoteStatus::Error {
                    message: "broken".to_string(),
                },
                "reconciler",
            )
            .unwrap();

        let err = h
            .manager
            .apply_remote_status(&observed, &RemoteStatus::Registered, "reconciler")
            .unwrap_err();
        assert!(matches!(err, LifecycleError::ConcurrentModification { .. }));
        assert_eq!(h.manager.status("urn:x:1").unwrap().state, DoiState::Error);
    }

    #[tokio::test]
    async fn test_apply_remote_status_refuses_same_state_rewrite() {
        let h = harness();
        h.manager
            .reserve(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();
        let observed = h.manager.log().latest("urn:x:1").unwrap().unwrap();

        // A re-reservation keeps the state but supersedes the observation
        h.manager
            .reserve(
                fixtures::doi_request("urn:x:1").with_description("fresh"),
                "alice",
            )
            .await
            .unwrap();

        let err = h
            .manager
            .apply_remote_status(
                &observed,
                &RemoteStatus::Error {
                    message: "stale".to_string(),
                },
                "reconciler",
            )
            .unwrap_err();
        assert!(matches!(err, LifecycleError::ConcurrentModification { .. }));

        let record = h.manager.status("urn:x:1").unwrap();
        assert_eq!(record.state, DoiState::Reserved);
        assert_eq!(record.description.as_deref(), Some("fresh"));
        assert_eq!(h.manager.history("urn:x:1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_dry_run_validates_without_side_effects() {
        let h = harness();

        let preview = h
            .manager
            .dry_run(fixtures::doi_request("urn:x:1"), SubmitMode::Reserve, "alice")
            .await
            .unwrap();
        assert_eq!(preview.state, DoiState::Reserved);
        assert!(preview.external_id.is_none());
        assert!(preview.payload.is_some());
        assert!(h.authority.calls().await.is_empty());
        assert!(h.manager.log().latest("urn:x:1").unwrap().is_none());

        // Same checks as the real transition
        let err = h
            .manager
            .dry_run(fixtures::doi_request("urn:x:1"), SubmitMode::Register, "alice")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition { state: None, .. }
        ));

        let mut incomplete = fixtures::doi_request("urn:x:1");
        incomplete.contributors.clear();
        let err = h
            .manager
            .dry_run(incomplete, SubmitMode::Draft, "alice")
            .await
            .unwrap_err();
        assert_eq!(err.violations()[0].field, "contributors");
    }

    #[tokio::test]
    async fn test_dry_run_register_uses_full_rules_and_keeps_identifier() {
        let h = harness();
        let reserved = h
            .manager
            .reserve(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();

        let preview = h
            .manager
            .dry_run(fixtures::doi_request("urn:x:1"), SubmitMode::Register, "alice")
            .await
            .unwrap();
        assert_eq!(preview.state, DoiState::PendingRegistration);
        assert_eq!(preview.external_id, reserved.external_id);
        assert_eq!(h.probe.probed_urls().await.len(), 1);
        assert!(h.authority.calls_for("submit").await.is_empty());
        assert_eq!(states(&h.manager, "urn:x:1").len(), 1);

        let mut undated = fixtures::doi_request("urn:x:1");
        undated.publication_date = None;
        let err = h
            .manager
            .dry_run(undated, SubmitMode::Register, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::ValidationFailed { .. }));
    }

    #[tokio::test]
    async fn test_register_without_issued_identifier_is_unavailable() {
        let h = harness();
        h.authority.set_issue_identifiers(false).await;
        h.manager
            .draft(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();

        let err = h
            .manager
            .register(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::RegistrationUnavailable { .. }));
        assert!(err.is_retryable());
        assert_eq!(states(&h.manager, "urn:x:1"), vec![(None, DoiState::Draft)]);

        // Once the authority issues identifiers again the same call succeeds
        h.authority.set_issue_identifiers(true).await;
        let record = h
            .manager
            .register(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();
        assert_eq!(record.state, DoiState::PendingRegistration);
        assert!(record.external_id.is_some());
    }

    #[tokio::test]
    async fn test_apply_remote_status_ignores_registered_for_reserved() {
        let h = harness();
        h.manager
            .reserve(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();

        let observed = h.manager.log().latest("urn:x:1").unwrap().unwrap();
        let result = h
            .manager
            .apply_remote_status(&observed, &RemoteStatus::Registered, "reconciler")
            .unwrap();
        assert!(result.is_none());
        assert_eq!(h.manager.status("urn:x:1").unwrap().state, DoiState::Reserved);
    }

    #[tokio::test]
    async fn test_external_call_timeout_is_unavailable() {
        let authority = Arc::new(MockRegistrationAuthority::new());
        authority
            .set_delay(std::time::Duration::from_millis(1500))
            .await;
        let probe = Arc::new(MockLandingPageProbe::new());
        let manager = LifecycleManager::new(
            LifecycleConfig {
                external_call_timeout_secs: 1,
                ..LifecycleConfig::default()
            },
            Arc::new(SqliteTransactionLog::in_memory().unwrap()),
            authority,
            Arc::new(Validator::new(probe, ValidatorConfig::default())),
        );

        let err = manager
            .reserve(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::RegistrationUnavailable { .. }));
        assert!(matches!(
            manager.status("urn:x:1"),
            Err(LifecycleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_status_and_history_not_found() {
        let h = harness();
        assert!(matches!(
            h.manager.status("missing"),
            Err(LifecycleError::NotFound(_))
        ));
        assert!(matches!(
            h.manager.history("missing"),
            Err(LifecycleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_dispatches_on_mode() {
        let h = harness();
        let record = h
            .manager
            .submit(fixtures::doi_request("a"), SubmitMode::Draft, "alice")
            .await
            .unwrap();
        assert_eq!(record.state, DoiState::Draft);

        let record = h
            .manager
            .submit(fixtures::doi_request("b"), SubmitMode::Reserve, "alice")
            .await
            .unwrap();
        assert_eq!(record.state, DoiState::Reserved);

        let record = h
            .manager
            .submit(fixtures::doi_request("b"), SubmitMode::Register, "alice")
            .await
            .unwrap();
        assert_eq!(record.state, DoiState::PendingRegistration);
    }
}
