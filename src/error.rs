//! Error handling module
//!
//! Provides unified error types and handling for the entire application.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::proposal::ProposalStatus;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Mirror sync failed: {0}")]
    Sync(String),

    #[error("Suggestion failed for {path}: {message}")]
    Generation { path: String, message: String },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: ProposalStatus,
        to: ProposalStatus,
    },

    #[error("Test runner unavailable: {0}")]
    RunnerUnavailable(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Path escapes mirror root: {0}")]
    PathEscape(String),

    #[error("Duplicate proposal for {0}")]
    DuplicateProposal(String),

    #[error("Pending proposal limit reached ({0})")]
    PendingLimit(usize),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match &self {
            AppError::Sync(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SYNC_ERROR",
                "Source mirror could not be synchronized".to_string(),
                Some(msg.clone()),
            ),
            AppError::Generation { path, message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "GENERATION_ERROR",
                format!("Suggestion failed for {}", path),
                Some(message.clone()),
            ),
            AppError::InvalidTransition { from, to } => (
                StatusCode::CONFLICT,
                "INVALID_TRANSITION",
                format!("Cannot transition proposal from {} to {}", from, to),
                None,
            ),
            AppError::RunnerUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "RUNNER_UNAVAILABLE",
                "Verification runner could not be executed".to_string(),
                Some(msg.clone()),
            ),
            AppError::Publish(msg) => (
                StatusCode::BAD_GATEWAY,
                "PUBLISH_ERROR",
                "Upstream publish failed".to_string(),
                Some(msg.clone()),
            ),
            AppError::PathEscape(path) => (
                StatusCode::BAD_REQUEST,
                "PATH_ESCAPE",
                format!("Target path {} resolves outside the mirror root", path),
                None,
            ),
            AppError::DuplicateProposal(path) => (
                StatusCode::CONFLICT,
                "DUPLICATE_PROPOSAL",
                format!("An equivalent proposal for {} already exists", path),
                None,
            ),
            AppError::PendingLimit(cap) => (
                StatusCode::TOO_MANY_REQUESTS,
                "PENDING_LIMIT",
                format!("Pending proposal limit of {} reached", cap),
                None,
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                None,
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                msg.clone(),
                None,
            ),
            AppError::Io(e) => {
                error!("I/O error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "IO_ERROR",
                    "An I/O error occurred".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Config(msg) => {
                error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    "A configuration error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(error_code.to_string()),
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;
