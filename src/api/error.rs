//! API error responses
//!
//! Every error renders as `{"error": "<message>"}` with the matching status
//! code, so callers and the UI have one envelope to handle.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{AuthError, PortError, StoreError};

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Standard API error type
#[derive(Debug)]
pub enum ApiError {
    /// Malformed payload, invalid CIDR, unknown entity reference
    BadRequest(String),
    /// Missing credentials or invalid token
    Unauthorized(String),
    /// Authenticated but the role may not perform this operation
    Forbidden(String),
    /// Entity does not exist
    NotFound(String),
    /// Uniqueness violation (proxy already mapped, no free port)
    Conflict(String),
    /// Unexpected internal failure
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m),
            Self::Forbidden(m) => (StatusCode::FORBIDDEN, m),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m),
            Self::Conflict(m) => (StatusCode::CONFLICT, m),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Forbidden(_) => Self::Forbidden(err.to_string()),
            AuthError::BadCredentials => Self::Unauthorized("invalid credentials".into()),
            AuthError::BadHash(_) | AuthError::Signing(_) => Self::Internal(err.to_string()),
            _ => Self::Unauthorized(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            StoreError::MissingReference(_) => Self::BadRequest("invalid client/proxy".into()),
            StoreError::Persist(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<PortError> for ApiError {
    fn from(err: PortError) -> Self {
        match err {
            // A foreign requested port is a caller mistake, not a conflict
            PortError::InUse(_) => Self::BadRequest(err.to_string()),
            PortError::Exhausted { .. } => Self::Conflict(err.to_string()),
            PortError::Registry { .. } => Self::Internal(err.to_string()),
        }
    }
}
