//! Login endpoint and bearer-token middleware
//!
//! Two credential kinds reach the API: the admin's JWT (issued by
//! `/v1/auth/login`) and the static agent token shared with the reconciler
//! and forwarders. The middleware resolves either into a [`Role`] attached
//! to the request; handlers enforce per-route role requirements.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::debug;

use super::error::ApiError;
use super::state::AppState;
use crate::auth::{parse_token, sign_token, verify_password, Role};

/// Login request payload
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Admin login name
    pub username: String,
    /// Admin password
    pub password: String,
}

/// Login response payload
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// Bearer token for subsequent requests
    pub token: String,
    /// Granted role
    pub role: Role,
    /// Token expiry
    pub expires_at: DateTime<Utc>,
}

/// `POST /v1/auth/login`
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let cfg = &state.cfg;

    if request.username != cfg.admin_user {
        debug!(user = %request.username, "login rejected: unknown user");
        return Err(ApiError::Unauthorized("invalid credentials".into()));
    }
    verify_password(
        &request.password,
        &cfg.admin_pass,
        cfg.admin_pass_hash.as_deref(),
    )?;

    let (token, expires_at) = sign_token(
        &cfg.admin_user,
        Role::Admin,
        &cfg.jwt_secret,
        cfg.token_ttl_secs,
    )?;

    Ok(Json(LoginResponse {
        token,
        role: Role::Admin,
        expires_at,
    }))
}

/// Middleware: resolve the bearer credential into a [`Role`] extension.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;

    let role = if token
        .as_bytes()
        .ct_eq(state.cfg.agent_token.as_bytes())
        .into()
    {
        Role::Agent
    } else {
        parse_token(token, &state.cfg.jwt_secret)?.role
    };

    request.extensions_mut().insert(role);
    Ok(next.run(request).await)
}

/// Handler-side guard: admin-only routes
pub fn require_admin(role: Role) -> Result<(), ApiError> {
    if role == Role::Admin {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!("forbidden for role {role}")))
    }
}
