use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Resource handle not found: {handle_id}")]
    BlobNotFound { handle_id: String },

    #[error("No catalog entry for model {model} and image {image_label}")]
    SelectionNotFound { model: String, image_label: String },

    #[error("Selection of {model}/{image_label} was superseded by a newer one")]
    SelectionSuperseded { model: String, image_label: String },

    #[error("{message}")]
    ReportPrecondition { message: String },

    #[error("{message}")]
    ObservationPrecondition { message: String },

    #[error("{0}")]
    Fhir(#[from] FhirError),

    #[error("Report generation failed: {0}")]
    Report(#[from] ReportError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// FHIR server client errors
#[derive(Error, Debug)]
pub enum FhirError {
    #[error("Connection failed to FHIR server at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("FHIR request failed (status {status}): {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response from FHIR server at {url}")]
    InvalidResponse {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Binary {binary_id} carries invalid base64 data")]
    InvalidBinaryData {
        binary_id: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("Created resource has no id")]
    MissingResourceId,
}

/// Report assembly errors
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("PDF renderer unavailable: {message}")]
    RendererUnavailable { message: String },

    #[error("Cannot open source document: {message}")]
    DocumentOpen { message: String },

    #[error("Failed to render page {page}: {message}")]
    PageRender { page: usize, message: String },

    #[error("Failed to capture summary view: {message}")]
    Snapshot { message: String },

    #[error("Invalid page layout: {message}")]
    Layout { message: String },

    #[error("Image encoding failed")]
    Encode(#[from] image::ImageError),

    #[error("PDF serialization failed")]
    Pdf(#[from] lopdf::Error),

    #[error("Failed to write report output")]
    Io(#[from] std::io::Error),

    #[error("Report task failed: {message}")]
    Task { message: String },
}

/// API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::SessionNotFound { .. }
            | ServiceError::BlobNotFound { .. }
            | ServiceError::SelectionNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::SelectionSuperseded { .. }
            | ServiceError::ReportPrecondition { .. }
            | ServiceError::ObservationPrecondition { .. } => StatusCode::CONFLICT,
            ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Fhir(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Report(ReportError::DocumentOpen { .. })
            | ServiceError::Report(ReportError::PageRender { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::SessionNotFound { .. } => "session_not_found",
            ServiceError::BlobNotFound { .. } => "blob_not_found",
            ServiceError::SelectionNotFound { .. } => "selection_not_found",
            ServiceError::SelectionSuperseded { .. } => "selection_superseded",
            ServiceError::ReportPrecondition { .. } => "report_precondition",
            ServiceError::ObservationPrecondition { .. } => "observation_precondition",
            ServiceError::Fhir(FhirError::Connection { .. }) => "fhir_connection",
            ServiceError::Fhir(FhirError::Status { .. }) => "fhir_status",
            ServiceError::Fhir(FhirError::InvalidResponse { .. }) => "fhir_invalid_response",
            ServiceError::Fhir(FhirError::InvalidBinaryData { .. }) => "fhir_invalid_binary",
            ServiceError::Fhir(FhirError::MissingResourceId) => "fhir_missing_id",
            ServiceError::Report(ReportError::DocumentOpen { .. })
            | ServiceError::Report(ReportError::PageRender { .. }) => "report_render_failed",
            ServiceError::Report(ReportError::Snapshot { .. }) => "report_snapshot_failed",
            ServiceError::Report(_) => "report_error",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::Config { .. } => "config_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();

        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(code),
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Format an error and its source chain on one line, for status text and logs.
pub fn format_error_chain_ref(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_maps_to_conflict() {
        let err = ServiceError::ReportPrecondition {
            message: "No report document".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.error_code(), "report_precondition");
    }

    #[test]
    fn test_render_failure_code() {
        let err = ServiceError::Report(ReportError::DocumentOpen {
            message: "bad header".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.error_code(), "report_render_failed");
    }

    #[test]
    fn test_format_error_chain_includes_sources() {
        let err = ServiceError::Report(ReportError::DocumentOpen {
            message: "bad header".to_string(),
        });
        let formatted = format_error_chain_ref(&err);
        assert!(formatted.starts_with("Report generation failed"));
        assert!(formatted.contains("bad header"));
    }

    #[test]
    fn test_report_io_error_is_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::WriteZero, "disk full");
        let err = ServiceError::from(ReportError::from(io));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_code(), "report_error");
        assert!(format_error_chain_ref(&err).contains("disk full"));
    }
}
