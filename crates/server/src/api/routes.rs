use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{dois, handlers, middleware::metrics_middleware};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Identifiers
        .route("/dois", post(dois::submit_doi))
        .route("/dois", get(dois::list_dois))
        .route("/dois/batch", post(dois::submit_batch))
        .route("/dois/reserve", post(dois::reserve_batch))
        .route("/dois/{key}", get(dois::get_doi))
        .route("/dois/{key}/history", get(dois::get_history))
        .route("/dois/{key}/retry", post(dois::retry_doi))
        // Reconciliation
        .route("/reconcile", post(dois::reconcile_now));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
