//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Lifecycle transitions and failures
//! - Metadata validation
//! - Registration authority calls
//! - Batch processing and reconciliation

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Lifecycle
// =============================================================================

/// Transactions appended, by source and target state.
pub static TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "registrar_transitions_total",
            "Total lifecycle transitions appended to the transaction log",
        ),
        &["from", "to"],
    )
    .unwrap()
});

/// Failed lifecycle operations by operation and error kind.
pub static LIFECYCLE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "registrar_lifecycle_failures_total",
            "Total lifecycle operations that returned an error",
        ),
        &["operation", "kind"], // kind: "validation_failed", "registration_unavailable", ...
    )
    .unwrap()
});

// =============================================================================
// Validation
// =============================================================================

/// Validation violations by rule set and rule.
pub static VALIDATION_VIOLATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "registrar_validation_violations_total",
            "Total metadata validation violations",
        ),
        &["rule_set", "rule"],
    )
    .unwrap()
});

// =============================================================================
// Registration authority
// =============================================================================

/// Authority calls by operation and outcome.
pub static AUTHORITY_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "registrar_authority_requests_total",
            "Total registration authority requests",
        ),
        &["operation", "outcome"], // outcome: "ok", "unavailable", "timeout", "rejected", "protocol"
    )
    .unwrap()
});

/// Authority call latency.
pub static AUTHORITY_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "registrar_authority_request_duration_seconds",
            "Duration of registration authority requests",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["operation"],
    )
    .unwrap()
});

// =============================================================================
// Batch & reconciliation
// =============================================================================

/// Batch record outcomes.
pub static BATCH_RECORDS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "registrar_batch_records_total",
            "Total records processed by batch jobs",
        ),
        &["mode", "outcome"], // outcome: "accepted", "rejected"
    )
    .unwrap()
});

/// Completed reconcile sweeps.
pub static RECONCILE_RUNS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "registrar_reconcile_runs_total",
        "Total pending reconciler sweeps",
    )
    .unwrap()
});

/// Per-key reconcile outcomes.
pub static RECONCILE_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "registrar_reconcile_outcomes_total",
            "Per-key outcomes of pending reconciler sweeps",
        ),
        &["outcome"], // "advanced", "still_pending", "skipped", "unavailable", "conflict", "failed"
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Lifecycle
        Box::new(TRANSITIONS.clone()),
        Box::new(LIFECYCLE_FAILURES.clone()),
        // Validation
        Box::new(VALIDATION_VIOLATIONS.clone()),
        // Authority
        Box::new(AUTHORITY_REQUESTS.clone()),
        Box::new(AUTHORITY_REQUEST_DURATION.clone()),
        // Batch & reconcile
        Box::new(BATCH_RECORDS.clone()),
        Box::new(RECONCILE_RUNS.clone()),
        Box::new(RECONCILE_OUTCOMES.clone()),
    ]
}
