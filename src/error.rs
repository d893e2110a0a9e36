use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid request payload or parameters
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed request (missing upload, wrong content type, ...)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Batch input rejected as a whole before any row was scored
    #[error("Batch rejected: {0}")]
    BatchRejected(String),

    /// Model artifacts are missing or could not be loaded
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Model, feature schema and pipeline identifier do not belong together
    #[error("Artifact mismatch: {0}")]
    ArtifactMismatch(String),

    /// Aligned feature matrix does not match the frozen schema
    #[error("Schema drift: {0}")]
    SchemaDrift(String),

    /// Attribution computation failed
    #[error("Explanation error: {0}")]
    Explanation(String),

    /// Chart rendering failed
    #[error("Chart error: {0}")]
    Chart(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::BatchRejected(_) => StatusCode::BAD_REQUEST,
            AppError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ArtifactMismatch(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::SchemaDrift(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Explanation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Chart(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::BatchRejected(_) => "BATCH_REJECTED",
            AppError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            AppError::ArtifactMismatch(_) => "ARTIFACT_MISMATCH",
            AppError::SchemaDrift(_) => "SCHEMA_DRIFT",
            AppError::Explanation(_) => "EXPLANATION_ERROR",
            AppError::Chart(_) => "CHART_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Convert AppError to HTTP response
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(
                error_code = error_code,
                status_code = status.as_u16(),
                message = %message,
                "Request error"
            );
        } else {
            tracing::warn!(
                error_code = error_code,
                status_code = status.as_u16(),
                message = %message,
                "Request rejected"
            );
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from csv::Error
impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::BadRequest(format!("CSV parse error: {}", err))
    }
}

/// Conversion from validator::ValidationErrors
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
