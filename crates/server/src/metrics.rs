//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the registrar server:
//! - HTTP request metrics (latency, counts, in flight)
//! - Identifier counts by lifecycle state (collected dynamically)
//! - Everything registered by `registrar_core::metrics`

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use regex_lite::Regex;
use tracing::warn;

use registrar_core::{DoiState, RecordFilter};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "registrar_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("registrar_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "registrar_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Identifier Metrics
// =============================================================================

/// Identifiers by current state (collected dynamically).
pub static DOIS_BY_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("registrar_dois_by_state", "Current identifier count by state"),
        &["state"],
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Identifiers
    registry.register(Box::new(DOIS_BY_STATE.clone())).unwrap();

    // Core metrics (lifecycle, validation, authority, batch, reconcile)
    for metric in registrar_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Refresh gauges derived from the transaction log.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    for doi_state in DoiState::ALL {
        let filter = RecordFilter::new().with_state(doi_state);
        if let Ok(count) = state.manager().count(&filter) {
            DOIS_BY_STATE
                .with_label_values(&[doi_state.as_str()])
                .set(count);
        }
    }
}

static DOI_KEY_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/api/v1/dois/([^/]+)").unwrap());

/// Normalize a path for metric labels (replace record keys with a placeholder).
pub fn normalize_path(path: &str) -> String {
    if let Some(caps) = DOI_KEY_SEGMENT.captures(path) {
        if let (Some(whole), Some(segment)) = (caps.get(0), caps.get(1)) {
            if !matches!(segment.as_str(), "batch" | "reserve") {
                return format!("/api/v1/dois/{{key}}{}", &path[whole.end()..]);
            }
        }
    }
    path.to_string()
}
