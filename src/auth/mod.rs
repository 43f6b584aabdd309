//! Authentication for the control plane
//!
//! Bearer tokens are HS256 JWTs carrying a `role` claim; the admin logs in
//! with username/password, the reconciler and forwarders present a static
//! shared token that maps to the agent role.

mod jwt;
mod password;

use serde::{Deserialize, Serialize};

pub use jwt::{parse_token, sign_token, Claims};
pub use password::{hash_password, verify_password};

/// Caller role attached to every authenticated request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full control: entity CRUD, state writes, checks
    Admin,
    /// Reconciler/forwarder: read mappings, write mapping state, run checks
    Agent,
}

impl Role {
    /// Role name as it appears in tokens and responses
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Agent => "agent",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
