use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ReconcilerConfig;
use crate::lifecycle::{LifecycleError, LifecycleManager};
use crate::metrics;

/// Actor recorded on transitions appended by the reconciler.
pub const RECONCILER_ACTOR: &str = "reconciler";

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// In-flight keys found.
    pub examined: usize,
    /// Keys that moved to `registered` or `error`.
    pub advanced: usize,
    pub still_pending: usize,
    /// Keys with no external identifier to query.
    pub skipped: usize,
    /// Keys whose status query failed transiently.
    pub unavailable: usize,
    /// Keys whose state changed underneath the sweep.
    pub conflicts: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyOutcome {
    Advanced,
    StillPending,
    Skipped,
    Unavailable,
    Conflict,
    Failed,
}

impl KeyOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            KeyOutcome::Advanced => "advanced",
            KeyOutcome::StillPending => "still_pending",
            KeyOutcome::Skipped => "skipped",
            KeyOutcome::Unavailable => "unavailable",
            KeyOutcome::Conflict => "conflict",
            KeyOutcome::Failed => "failed",
        }
    }
}

impl ReconcileReport {
    fn record(&mut self, outcome: KeyOutcome) {
        match outcome {
            KeyOutcome::Advanced => self.advanced += 1,
            KeyOutcome::StillPending => self.still_pending += 1,
            KeyOutcome::Skipped => self.skipped += 1,
            KeyOutcome::Unavailable => self.unavailable += 1,
            KeyOutcome::Conflict => self.conflicts += 1,
            KeyOutcome::Failed => self.failed += 1,
        }
    }
}

/// Polls the authority for every in-flight key and advances the ones that
/// reached a terminal status.
pub struct PendingReconciler {
    manager: Arc<LifecycleManager>,
    config: ReconcilerConfig,
}

impl PendingReconciler {
    pub fn new(manager: Arc<LifecycleManager>, config: ReconcilerConfig) -> Self {
        Self { manager, config }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run one sweep.
    ///
    /// Safe to interleave with submissions and with other sweeps: a status is
    /// only applied if the key's latest transaction is still the one read
    /// before the query. A key written in the meantime is counted as a
    /// conflict and left alone.
    pub async fn reconcile(&self) -> Result<ReconcileReport, LifecycleError> {
        let start = Instant::now();
        let keys = self.manager.log().pending_keys()?;

        let mut report = ReconcileReport {
            examined: keys.len(),
            ..ReconcileReport::default()
        };

        let outcomes: Vec<KeyOutcome> = stream::iter(keys)
            .map(|key| async move { self.reconcile_key(&key).await })
            .buffer_unordered(self.config.max_concurrent_queries.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            metrics::RECONCILE_OUTCOMES
                .with_label_values(&[outcome.as_str()])
                .inc();
            report.record(outcome);
        }
        metrics::RECONCILE_RUNS.inc();

        info!(
            examined = report.examined,
            advanced = report.advanced,
            still_pending = report.still_pending,
            skipped = report.skipped,
            unavailable = report.unavailable,
            conflicts = report.conflicts,
            failed = report.failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Reconcile sweep finished"
        );

        Ok(report)
    }

    async fn reconcile_key(&self, key: &str) -> KeyOutcome {
        let latest = match self.manager.log().latest(key) {
            Ok(Some(tx)) => tx,
            Ok(None) => return KeyOutcome::Conflict,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read key during reconcile");
                return KeyOutcome::Failed;
            }
        };

        let observed = latest.new_state;
        if !observed.is_in_flight() {
            return KeyOutcome::Conflict;
        }

        let Some(external_id) = latest.external_id().map(str::to_string) else {
            debug!(key = %key, state = %observed, "No external identifier to query");
            return KeyOutcome::Skipped;
        };

        let status = match self
            .manager
            .call_authority(
                "query_status",
                key,
                self.manager.authority().query_status(&external_id),
            )
            .await
        {
            Ok(status) => status,
            Err(e) => {
                warn!(key = %key, external_id = %external_id, error = %e, "Status query failed");
                return KeyOutcome::Unavailable;
            }
        };

        debug!(
            key = %key,
            external_id = %external_id,
            remote = status.as_str(),
            "Authority status"
        );

        match self
            .manager
            .apply_remote_status(&latest, &status, RECONCILER_ACTOR)
        {
            Ok(Some(_)) => KeyOutcome::Advanced,
            Ok(None) => KeyOutcome::StillPending,
            Err(
                LifecycleError::ConcurrentModification { .. }
                | LifecycleError::InvalidTransition { .. },
            ) => KeyOutcome::Conflict,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to record authority status");
                KeyOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{RegistrationError, RemoteStatus};
    use crate::ledger::SqliteTransactionLog;
    use crate::record::DoiState;
    use crate::testing::{fixtures, MockLandingPageProbe, MockRegistrationAuthority};
    use std::time::Duration;

    struct Harness {
        manager: Arc<LifecycleManager>,
        authority: Arc<MockRegistrationAuthority>,
        reconciler: PendingReconciler,
    }

    fn harness() -> Harness {
        let authority = Arc::new(MockRegistrationAuthority::new());
        let manager = Arc::new(fixtures::lifecycle_manager(
            Arc::new(SqliteTransactionLog::in_memory().unwrap()),
            authority.clone(),
            Arc::new(MockLandingPageProbe::new()),
        ));
        let reconciler = PendingReconciler::new(manager.clone(), ReconcilerConfig::default());
        Harness {
            manager,
            authority,
            reconciler,
        }
    }

    async fn pending(h: &Harness, key: &str) -> String {
        h.manager
            .draft(fixtures::doi_request(key), "alice")
            .await
            .unwrap();
        h.manager
            .register(fixtures::doi_request(key), "alice")
            .await
            .unwrap()
            .external_id
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_sweep() {
        let h = harness();
        let report = h.reconciler.reconcile().await.unwrap();
        assert_eq!(report, ReconcileReport::default());
    }

    #[tokio::test]
    async fn test_advances_terminal_keys_only() {
        let h = harness();
        let done = pending(&h, "urn:x:1").await;
        let failed = pending(&h, "urn:x:2").await;
        pending(&h, "urn:x:3").await;

        h.authority
            .set_remote_status(&done, RemoteStatus::Registered)
            .await;
        h.authority
            .set_remote_status(
                &failed,
                RemoteStatus::Error {
                    message: "bad landing page".to_string(),
                },
            )
            .await;

        let report = h.reconciler.reconcile().await.unwrap();
        assert_eq!(report.examined, 3);
        assert_eq!(report.advanced, 2);
        assert_eq!(report.still_pending, 1);

        assert_eq!(h.manager.status("urn:x:1").unwrap().state, DoiState::Registered);
        let errored = h.manager.status("urn:x:2").unwrap();
        assert_eq!(errored.state, DoiState::Error);
        assert_eq!(errored.message.as_deref(), Some("bad landing page"));
        assert_eq!(errored.submitter, RECONCILER_ACTOR);
        assert_eq!(
            h.manager.status("urn:x:3").unwrap().state,
            DoiState::PendingRegistration
        );
    }

    #[tokio::test]
    async fn test_second_sweep_is_noop() {
        let h = harness();
        let doi = pending(&h, "urn:x:1").await;
        pending(&h, "urn:x:2").await;
        h.authority
            .set_remote_status(&doi, RemoteStatus::Registered)
            .await;

        h.reconciler.reconcile().await.unwrap();
        let before = h.manager.history("urn:x:2").unwrap().len();

        let report = h.reconciler.reconcile().await.unwrap();
        assert_eq!(report.advanced, 0);
        assert_eq!(report.examined, 1);
        assert_eq!(h.manager.history("urn:x:2").unwrap().len(), before);
        assert_eq!(h.manager.history("urn:x:1").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_authority_changes_nothing() {
        let h = harness();
        pending(&h, "urn:x:1").await;
        h.authority
            .set_next_error(RegistrationError::Unavailable("HTTP 502".to_string()))
            .await;

        let report = h.reconciler.reconcile().await.unwrap();
        assert_eq!(report.unavailable, 1);
        assert_eq!(
            h.manager.status("urn:x:1").unwrap().state,
            DoiState::PendingRegistration
        );
    }

    #[tokio::test]
    async fn test_reserved_without_identifier_skipped() {
        let h = harness();
        h.authority.set_issue_identifiers(false).await;
        h.manager
            .reserve(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap();

        let report = h.reconciler.reconcile().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert!(h.authority.calls_for("query_status").await.is_empty());
    }

    #[tokio::test]
    async fn test_status_from_before_a_rereservation_is_not_applied() {
        let h = harness();
        let doi = h
            .manager
            .reserve(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap()
            .external_id
            .unwrap();
        h.authority
            .set_remote_status(
                &doi,
                RemoteStatus::Error {
                    message: "withdrawn".to_string(),
                },
            )
            .await;
        h.authority.set_delay(Duration::from_millis(300)).await;

        let rereserve = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            h.authority.set_delay(Duration::ZERO).await;
            h.manager
                .reserve(
                    fixtures::doi_request("urn:x:1").with_description("fresh"),
                    "bob",
                )
                .await
        };
        let (report, rereserved) = tokio::join!(h.reconciler.reconcile(), rereserve);

        assert_eq!(rereserved.unwrap().state, DoiState::Reserved);
        let report = report.unwrap();
        assert_eq!(report.advanced, 0);
        assert_eq!(report.conflicts, 1);

        let history = h.manager.history("urn:x:1").unwrap();
        assert_eq!(history.len(), 2);
        let record = h.manager.status("urn:x:1").unwrap();
        assert_eq!(record.state, DoiState::Reserved);
        assert_eq!(record.submitter, "bob");
        assert_eq!(record.description.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_reserved_key_errors_but_never_registers() {
        let h = harness();
        let doi = h
            .manager
            .reserve(fixtures::doi_request("urn:x:1"), "alice")
            .await
            .unwrap()
            .external_id
            .unwrap();
        h.authority
            .set_remote_status(&doi, RemoteStatus::Registered)
            .await;

        let report = h.reconciler.reconcile().await.unwrap();
        assert_eq!(report.still_pending, 1);
        assert_eq!(h.manager.status("urn:x:1").unwrap().state, DoiState::Reserved);

        h.authority
            .set_remote_status(
                &doi,
                RemoteStatus::Error {
                    message: "withdrawn".to_string(),
                },
            )
            .await;
        let report = h.reconciler.reconcile().await.unwrap();
        assert_eq!(report.advanced, 1);
        assert_eq!(h.manager.status("urn:x:1").unwrap().state, DoiState::Error);
    }
}
