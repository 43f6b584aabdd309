//! Admin password verification
//!
//! The admin credential is either a plain password from the environment
//! (compared in constant time) or an Argon2id hash in PHC string form.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use subtle::ConstantTimeEq;

use crate::error::AuthError;

/// Hash a password into an Argon2id PHC string
/// (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`).
///
/// # Errors
///
/// Returns [`AuthError::BadHash`] on an empty password or hasher failure.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    if password.is_empty() {
        return Err(AuthError::BadHash("empty password".into()));
    }
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::BadHash(e.to_string()))
}

/// Verify `password` against either an Argon2id PHC hash (when set) or the
/// plain reference password.
///
/// # Errors
///
/// Returns [`AuthError::BadCredentials`] on mismatch and
/// [`AuthError::BadHash`] when the stored hash is malformed or not Argon2id.
pub fn verify_password(
    password: &str,
    plain: &str,
    phc_hash: Option<&str>,
) -> Result<(), AuthError> {
    match phc_hash {
        Some(hash) => {
            if !hash.starts_with("$argon2id$") {
                return Err(AuthError::BadHash("expected $argon2id$ PHC string".into()));
            }
            let parsed =
                PasswordHash::new(hash).map_err(|e| AuthError::BadHash(e.to_string()))?;
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .map_err(|_| AuthError::BadCredentials)
        }
        None => {
            if password.as_bytes().ct_eq(plain.as_bytes()).into() {
                Ok(())
            } else {
                Err(AuthError::BadCredentials)
            }
        }
    }
}
