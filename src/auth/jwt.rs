//! HS256 bearer tokens

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::Role;
use crate::error::AuthError;

/// Registered + role claims carried by every issued token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (login name or `agent`)
    pub sub: String,
    /// Caller role
    pub role: Role,
    /// Issued-at (seconds since epoch)
    pub iat: i64,
    /// Expiry (seconds since epoch)
    pub exp: i64,
}

/// Sign a token for `subject` with `role`, valid for `ttl_secs`.
///
/// # Errors
///
/// Returns [`AuthError::Signing`] on an empty secret or encoder failure.
pub fn sign_token(
    subject: &str,
    role: Role,
    secret: &str,
    ttl_secs: u64,
) -> Result<(String, DateTime<Utc>), AuthError> {
    if secret.is_empty() {
        return Err(AuthError::Signing("empty secret".into()));
    }

    // Clamp to a century so absurd TTLs cannot overflow the arithmetic
    let ttl = i64::try_from(ttl_secs)
        .unwrap_or(i64::MAX)
        .min(100 * 365 * 24 * 3600);
    let now = Utc::now();
    let expires_at = now + Duration::seconds(ttl);
    let claims = Claims {
        sub: subject.to_string(),
        role,
        iat: now.timestamp(),
        exp: expires_at.timestamp(),
    };

    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Signing(e.to_string()))?;

    Ok((token, expires_at))
}

/// Validate a token and return its claims.
///
/// # Errors
///
/// Returns [`AuthError::TokenExpired`] or [`AuthError::TokenInvalid`].
pub fn parse_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    if token.is_empty() {
        return Err(AuthError::TokenMissing);
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["sub", "exp"]);

    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::TokenInvalid(e.to_string()),
    })?;

    Ok(data.claims)
}
