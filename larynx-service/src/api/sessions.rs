//! Session API endpoints.
//!
//! Handlers for the session lifecycle, catalog browsing, selection,
//! report generation and observation write-back.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::service::{
    CatalogSummary, ExamMetadata, ReportLink, SessionPhase, SessionView, ShownResult,
};

use super::AppState;

/// Selection form submission
#[derive(Deserialize)]
pub struct SubmitRequest {
    pub metadata: ExamMetadata,
    pub model: String,
    pub image_label: String,
}

/// Listing of models or image labels
#[derive(Serialize)]
pub struct ListResponse {
    pub items: Vec<String>,
}

#[derive(Serialize)]
pub struct PhaseResponse {
    pub phase: SessionPhase,
}

#[derive(Serialize)]
pub struct ObservationResponse {
    pub observation_id: String,
}

/// Open a session over a freshly searched catalog
pub async fn create_session_handler(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<CatalogSummary>), ServiceError> {
    let summary = state.service.create_session().await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

pub async fn get_session_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ServiceError> {
    Ok(Json(state.service.session_view(&id).await?))
}

/// Close a session and revoke all of its handles
pub async fn close_session_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state.service.close_session(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reload_catalog_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CatalogSummary>, ServiceError> {
    Ok(Json(state.service.reload_catalog(&id).await?))
}

pub async fn list_models_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ListResponse>, ServiceError> {
    let items = state.service.list_models(&id).await?;
    Ok(Json(ListResponse { items }))
}

pub async fn list_image_labels_handler(
    State(state): State<Arc<AppState>>,
    Path((id, model)): Path<(Uuid, String)>,
) -> Result<Json<ListResponse>, ServiceError> {
    let items = state.service.list_image_labels(&id, &model).await?;
    Ok(Json(ListResponse { items }))
}

/// Submit a selection and show its result
pub async fn submit_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<ShownResult>, ServiceError> {
    if request.model.trim().is_empty() || request.image_label.trim().is_empty() {
        return Err(ServiceError::InvalidRequest {
            message: "model and image_label are required".to_string(),
        });
    }

    let result = state
        .service
        .submit(&id, request.metadata, &request.model, &request.image_label)
        .await?;
    Ok(Json(result))
}

pub async fn back_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PhaseResponse>, ServiceError> {
    let phase = state.service.back(&id).await?;
    Ok(Json(PhaseResponse { phase }))
}

/// Assemble a report for the shown result
pub async fn generate_report_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReportLink>, ServiceError> {
    Ok(Json(state.service.generate_report(&id).await?))
}

/// Write the analysis back as a FHIR Observation
pub async fn save_observation_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<ObservationResponse>), ServiceError> {
    let observation_id = state.service.save_observation(&id).await?;
    Ok((StatusCode::CREATED, Json(ObservationResponse { observation_id })))
}
