//! Resource handle endpoint.

use axum::{
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ServiceError;

use super::AppState;

/// Serve the bytes behind a live handle with their stored content type
pub async fn get_blob_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let blob = state.service.get_blob(&id)?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, blob.content_type),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        blob.data,
    )
        .into_response())
}
