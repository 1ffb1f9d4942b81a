//! Error types and handling for the orchestrator.
//!
//! This module provides a unified error type [`AppError`] covering registry,
//! authorization, dispatch and persistence failures, and implements the HTTP
//! response conversion used by the API layer.

use crate::core::error_types::{
    ERROR_TYPE_API, ERROR_TYPE_AUTHORIZATION, ERROR_TYPE_DISPATCH, ERROR_TYPE_INVALID_REQUEST,
    ERROR_TYPE_NOT_FOUND, ERROR_TYPE_RATE_LIMIT, ERROR_TYPE_STORE, ERROR_TYPE_TIMEOUT,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// A service with the same name is already registered
    #[error("Service already registered: {0}")]
    DuplicateService(String),

    /// Unknown service or conversation
    #[error("Not found: {0}")]
    NotFound(String),

    /// Requested model is not in the configured allow-list
    #[error("Model not authorized: {0}")]
    ModelNotAuthorized(String),

    /// Backend failed to answer a dispatched query
    #[error("Dispatch to {service} failed: {message}")]
    Dispatch { service: String, message: String },

    /// Backend did not answer within the dispatch timeout
    #[error("Dispatch to {service} timed out after {timeout_secs} seconds")]
    Timeout { service: String, timeout_secs: f64 },

    /// The expiring key-value store could not be reached
    #[error("Conversation store unavailable: {0}")]
    StoreUnavailable(String),

    /// Client provided invalid data
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Rate limit exceeded errors
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal server errors with custom message
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status and error type label for this error.
    pub fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::DuplicateService(_) | AppError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, ERROR_TYPE_INVALID_REQUEST)
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, ERROR_TYPE_NOT_FOUND),
            AppError::ModelNotAuthorized(_) => (StatusCode::FORBIDDEN, ERROR_TYPE_AUTHORIZATION),
            AppError::Dispatch { .. } => (StatusCode::BAD_GATEWAY, ERROR_TYPE_DISPATCH),
            AppError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, ERROR_TYPE_TIMEOUT),
            AppError::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, ERROR_TYPE_STORE),
            AppError::RateLimitExceeded(_) => (StatusCode::TOO_MANY_REQUESTS, ERROR_TYPE_RATE_LIMIT),
            AppError::Config(_) | AppError::Serialization(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, ERROR_TYPE_API)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();

        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "code": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results using [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;
