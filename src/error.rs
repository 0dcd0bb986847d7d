//! Error handling module
//!
//! Provides the unified error type for the whole gateway. Every variant maps
//! to a stable machine-checkable code so callers can distinguish "your query
//! is unsafe" (policy rejection) from "the system is temporarily unavailable"
//! (availability failure) without parsing prose.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::driver::DriverError;
use crate::governance::RejectReason;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown endpoint: {0}")]
    EndpointNotFound(String),

    #[error("Endpoint '{endpoint}' is unavailable: {reason}")]
    EndpointUnavailable { endpoint: String, reason: String },

    #[error("Connection pool for endpoint '{endpoint}' is exhausted")]
    PoolExhausted { endpoint: String },

    #[error("Query rejected: {0}")]
    Rejected(#[from] RejectReason),

    #[error("Query on endpoint '{endpoint}' exceeded the {timeout_ms}ms deadline")]
    QueryTimeout { endpoint: String, timeout_ms: u64 },

    #[error("Metadata write failed in both locations (primary: {primary}; fallback: {fallback})")]
    MetadataWriteFailed { primary: String, fallback: String },

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

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

impl GatewayError {
    /// Stable machine-checkable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "CONFIG_ERROR",
            GatewayError::EndpointNotFound(_) => "ENDPOINT_NOT_FOUND",
            GatewayError::EndpointUnavailable { .. } => "ENDPOINT_UNAVAILABLE",
            GatewayError::PoolExhausted { .. } => "POOL_EXHAUSTED",
            GatewayError::Rejected(reason) => reason.code(),
            GatewayError::QueryTimeout { .. } => "QUERY_TIMEOUT",
            GatewayError::MetadataWriteFailed { .. } => "METADATA_WRITE_FAILED",
            GatewayError::Driver(_) => "DRIVER_ERROR",
            GatewayError::Validation(_) => "VALIDATION_ERROR",
            GatewayError::Unauthorized(_) => "UNAUTHORIZED",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message, details) = match &self {
            GatewayError::Config(msg) => {
                error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A configuration error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
            GatewayError::EndpointNotFound(name) => (
                StatusCode::NOT_FOUND,
                format!("No registered endpoint named '{}'", name),
                None,
            ),
            GatewayError::EndpointUnavailable { endpoint, reason } => {
                warn!(endpoint = %endpoint, "Endpoint unavailable: {}", reason);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!("Endpoint '{}' is temporarily unavailable", endpoint),
                    Some(reason.clone()),
                )
            }
            GatewayError::PoolExhausted { endpoint } => {
                warn!(endpoint = %endpoint, "Connection pool exhausted");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Connection pool exhausted, retry later".to_string(),
                    Some(format!("endpoint '{}'", endpoint)),
                )
            }
            GatewayError::Rejected(reason) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Query rejected by read-only policy".to_string(),
                Some(reason.to_string()),
            ),
            GatewayError::QueryTimeout { timeout_ms, .. } => (
                StatusCode::GATEWAY_TIMEOUT,
                format!("Query exceeded the {}ms execution deadline", timeout_ms),
                None,
            ),
            GatewayError::MetadataWriteFailed { primary, fallback } => {
                error!(
                    "Metadata write failed in both locations: primary={}, fallback={}",
                    primary, fallback
                );
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Metadata could not be persisted in any storage location".to_string(),
                    Some(format!("primary: {}; fallback: {}", primary, fallback)),
                )
            }
            GatewayError::Driver(e) => {
                error!("Driver error: {:?}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "The database driver reported an error".to_string(),
                    Some(e.to_string()),
                )
            }
            GatewayError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                msg.clone(),
                None,
            ),
            GatewayError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                msg.clone(),
                None,
            ),
            GatewayError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(code.to_string()),
        });

        (status, body).into_response()
    }
}

impl From<validator::ValidationErrors> for GatewayError {
    fn from(e: validator::ValidationErrors) -> Self {
        GatewayError::Validation(e.to_string())
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, GatewayError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> GatewayError {
    GatewayError::Validation(msg.into())
}

/// Helper function to create an internal error
pub fn internal_error(msg: impl Into<String>) -> GatewayError {
    GatewayError::Internal(msg.into())
}
