//! HTTP API for the larynx service.
//!
//! This module provides the REST API endpoints for:
//! - Health and metrics monitoring
//! - Session lifecycle, catalog browsing and selection
//! - Report generation and observation write-back
//! - Serving resource handles

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::service::LarynxService;

pub mod blobs;
pub mod sessions;
use blobs::get_blob_handler;
use sessions::{
    back_handler, close_session_handler, create_session_handler, generate_report_handler,
    get_session_handler, list_image_labels_handler, list_models_handler, reload_catalog_handler,
    save_observation_handler, submit_handler,
};

/// Application state
pub struct AppState {
    pub service: Arc<LarynxService>,
    pub start_time: Instant,
    /// Absent when no recorder is installed (tests).
    pub metrics: Option<PrometheusHandle>,
}

/// Build the API router
pub fn router(service: Arc<LarynxService>, metrics: Option<PrometheusHandle>) -> Router {
    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
        metrics,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Session endpoints
        .route("/sessions", post(create_session_handler))
        .route(
            "/sessions/{id}",
            get(get_session_handler).delete(close_session_handler),
        )
        .route("/sessions/{id}/catalog/reload", post(reload_catalog_handler))
        .route("/sessions/{id}/models", get(list_models_handler))
        .route(
            "/sessions/{id}/models/{model}/images",
            get(list_image_labels_handler),
        )
        .route("/sessions/{id}/submit", post(submit_handler))
        .route("/sessions/{id}/back", post(back_handler))
        .route("/sessions/{id}/report", post(generate_report_handler))
        .route("/sessions/{id}/observation", post(save_observation_handler))
        // Resource handles
        .route("/blobs/{id}", get(get_blob_handler));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Health & Metrics ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        active_sessions: state.service.session_count(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    active_sessions: usize,
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
