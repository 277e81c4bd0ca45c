//! Centralized error types for the castgate core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::session::SessionError;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for SessionError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidDecision(_) => "invalid_decision",
            Self::InvalidPlayerState(_) => "invalid_player_state",
            Self::PolicyViolation(_) => "policy_violation",
            Self::IdentityMismatch { .. } => "invalid_mac_or_name",
        }
    }
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum CastError {
    /// A session operation was refused.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration is invalid or incomplete.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A runtime component (event loop, listener socket) failed.
    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CastError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Session(e) => e.code(),
            Self::InvalidRequest(_) => "invalid_request",
            Self::Configuration(_) => "configuration_error",
            Self::Runtime(_) => "runtime_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Session(SessionError::PolicyViolation(_)) => StatusCode::CONFLICT,
            Self::Session(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Runtime(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for CastError {
    fn from(err: std::io::Error) -> Self {
        Self::Runtime(err.to_string())
    }
}

/// Convenient Result alias for application-wide operations.
pub type CastResult<T> = Result<T, CastError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for CastError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}
