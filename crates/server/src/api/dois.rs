//! Identifier API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use registrar_core::{
    BatchJob, DoiRequest, DoiState, IdentifierRecord, LifecycleError, RecordFilter,
    ReconcileReport, SubmitMode, Transaction, Violation,
};

use crate::state::AppState;

/// Maximum allowed limit for list queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for list queries
const DEFAULT_LIMIT: i64 = 100;

/// Actor recorded when the caller does not name one
const ANONYMOUS: &str = "anonymous";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting one record
#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    #[serde(default = "default_mode")]
    pub mode: SubmitMode,
    /// Validate only; nothing is sent or recorded
    #[serde(default)]
    pub dry_run: bool,
    pub submitter: Option<String>,
    pub record: DoiRequest,
}

/// Request body for submitting a batch
#[derive(Debug, Deserialize)]
pub struct BatchBody {
    #[serde(default = "default_mode")]
    pub mode: SubmitMode,
    #[serde(default)]
    pub dry_run: bool,
    pub submitter: Option<String>,
    pub records: Vec<DoiRequest>,
}

/// Request body for reserving a batch
#[derive(Debug, Deserialize)]
pub struct ReserveBatchBody {
    #[serde(default)]
    pub dry_run: bool,
    pub submitter: Option<String>,
    pub records: Vec<DoiRequest>,
}

fn default_mode() -> SubmitMode {
    SubmitMode::Draft
}

/// Query parameters for listing identifiers
#[derive(Debug, Deserialize)]
pub struct ListDoisParams {
    pub state: Option<String>,
    pub node: Option<String>,
    pub submitter: Option<String>,
    pub external_id: Option<String>,
    pub modified_after: Option<DateTime<Utc>>,
    pub modified_before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Query parameters naming the acting user
#[derive(Debug, Deserialize)]
pub struct ActorParams {
    pub submitter: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListDoisResponse {
    pub records: Vec<IdentifierRecord>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub key: String,
    pub transactions: Vec<Transaction>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// HTTP status for a lifecycle error.
pub fn status_for(err: &LifecycleError) -> StatusCode {
    match err {
        LifecycleError::ValidationFailed { .. }
        | LifecycleError::IdentifierMismatch { .. }
        | LifecycleError::UpdateNotAllowed { .. } => StatusCode::BAD_REQUEST,
        LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
        LifecycleError::ConcurrentModification { .. }
        | LifecycleError::InvalidTransition { .. } => StatusCode::CONFLICT,
        LifecycleError::RegistrationRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        LifecycleError::RegistrationUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        LifecycleError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn lifecycle_error(err: LifecycleError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(error = %err, "Request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            kind: err.kind().to_string(),
            retryable: err.is_retryable(),
            violations: err.violations().to_vec(),
        }),
    )
}

fn bad_request(message: String) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message,
            kind: "bad_request".to_string(),
            retryable: false,
            violations: Vec::new(),
        }),
    )
}

fn actor(submitter: Option<String>) -> String {
    submitter
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| ANONYMOUS.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit one record with the requested mode
pub async fn submit_doi(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitBody>,
) -> Result<Json<IdentifierRecord>, ApiError> {
    let actor = actor(body.submitter);
    let manager = state.manager();
    let result = if body.dry_run {
        manager.dry_run(body.record, body.mode, &actor).await
    } else {
        manager.submit(body.record, body.mode, &actor).await
    };
    result.map(Json).map_err(lifecycle_error)
}

/// Submit a batch of records with one mode
pub async fn submit_batch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatchBody>,
) -> Json<BatchJob> {
    let actor = actor(body.submitter);
    let batch = state.batch();
    let job = if body.dry_run {
        batch.dry_run(body.records, body.mode, &actor).await
    } else {
        batch.process(body.records, body.mode, &actor).await
    };
    Json(job)
}

/// Reserve identifiers for a batch of records
pub async fn reserve_batch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReserveBatchBody>,
) -> Json<BatchJob> {
    let actor = actor(body.submitter);
    let batch = state.batch();
    let job = if body.dry_run {
        batch.dry_run(body.records, SubmitMode::Reserve, &actor).await
    } else {
        batch.process(body.records, SubmitMode::Reserve, &actor).await
    };
    Json(job)
}

/// List latest records with optional filters
pub async fn list_dois(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListDoisParams>,
) -> Result<Json<ListDoisResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = RecordFilter::new()
        .with_modified_range(params.modified_after, params.modified_before);

    if let Some(ref raw) = params.state {
        let doi_state: DoiState = raw.parse().map_err(bad_request)?;
        filter = filter.with_state(doi_state);
    }
    if let Some(node) = params.node {
        filter = filter.with_node(node);
    }
    if let Some(submitter) = params.submitter {
        filter = filter.with_submitter(submitter);
    }
    if let Some(external_id) = params.external_id {
        filter = filter.with_external_id(external_id);
    }

    let manager = state.manager();
    let total = manager.count(&filter).map_err(lifecycle_error)?;
    let records = manager
        .list(&filter.with_limit(limit).with_offset(offset))
        .map_err(lifecycle_error)?;

    Ok(Json(ListDoisResponse {
        records,
        total,
        limit,
        offset,
    }))
}

/// Current record for a key
pub async fn get_doi(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<IdentifierRecord>, ApiError> {
    state
        .manager()
        .status(&key)
        .map(Json)
        .map_err(lifecycle_error)
}

/// Full transaction history for a key
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let transactions = state.manager().history(&key).map_err(lifecycle_error)?;
    Ok(Json(HistoryResponse { key, transactions }))
}

/// Move an `error` record back to its last stable state
pub async fn retry_doi(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(params): Query<ActorParams>,
) -> Result<Json<IdentifierRecord>, ApiError> {
    let actor = actor(params.submitter);
    state
        .manager()
        .retry(&key, &actor)
        .await
        .map(Json)
        .map_err(lifecycle_error)
}

/// Run a reconcile sweep now
pub async fn reconcile_now(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReconcileReport>, ApiError> {
    state
        .reconciler()
        .reconcile()
        .await
        .map(Json)
        .map_err(lifecycle_error)
}
