//! Error types for pgw
//!
//! This module defines the error hierarchy for the proxy gateway.
//! All errors are categorized by subsystem.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Top-level error type for pgw
#[derive(Debug, Error)]
pub enum PgwError {
    /// Configuration errors (env parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Store errors (entity lookup, persistence)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Port allocation and registry errors
    #[error("Port error: {0}")]
    Port(#[from] PortError),

    /// Authentication errors
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Upstream health-check errors
    #[error("Check error: {0}")]
    Check(#[from] CheckError),

    /// Reconciler errors
    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Forwarder errors
    #[error("Forwarder error: {0}")]
    Forwarder(#[from] ForwarderError),

    /// Control-plane client errors
    #[error("API client error: {0}")]
    Client(#[from] ClientError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable holds an unparseable value
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl ConfigError {
    /// Create an env error
    pub fn env(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvError {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entity with the given ID does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A mapping references a client or proxy that does not exist
    #[error("invalid reference: {0}")]
    MissingReference(String),

    /// Persistence failure (file backend)
    #[error("persistence failed: {0}")]
    Persist(String),
}

impl StoreError {
    /// Create a not-found error
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Port allocation and registry errors
#[derive(Debug, Error)]
pub enum PortError {
    /// Requested port is already bound to a different client
    #[error("port {0} is already used by another client")]
    InUse(u16),

    /// No free port remains in the configured range
    #[error("no free port in range {base}-{max}")]
    Exhausted { base: u16, max: u16 },

    /// Port marker I/O failure
    #[error("port registry error at {path}: {reason}")]
    Registry { path: String, reason: String },
}

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential was presented
    #[error("missing bearer token")]
    TokenMissing,

    /// Token failed validation
    #[error("invalid token: {0}")]
    TokenInvalid(String),

    /// Token has expired
    #[error("token expired")]
    TokenExpired,

    /// Username/password rejected
    #[error("invalid credentials")]
    BadCredentials,

    /// The authenticated role may not perform this operation
    #[error("forbidden for role {0}")]
    Forbidden(String),

    /// Password hash is malformed or uses an unsupported scheme
    #[error("unsupported password hash: {0}")]
    BadHash(String),

    /// Signing failure (empty secret, encoder error)
    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Upstream health-check errors
#[derive(Debug, Error)]
pub enum CheckError {
    /// TCP connect to the proxy failed
    #[error("connect to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },

    /// Proxy protocol violation during the probe
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Probe authentication rejected by the upstream
    #[error("upstream auth failed")]
    AuthFailed,

    /// Probe exceeded its deadline
    #[error("probe timed out")]
    Timeout,

    /// Every probe endpoint failed
    #[error("all endpoints failed: {0}")]
    AllEndpointsFailed(String),
}

/// Reconciler errors
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Could not load the mapping snapshot from the control plane
    #[error("fetch mappings failed: {0}")]
    Fetch(String),

    /// The nft batch was rejected or the process failed to run
    #[error("ruleset apply failed: {0}")]
    Apply(String),

    /// Per-mapping state report failed
    #[error("state report failed for mapping {id}: {reason}")]
    Report { id: String, reason: String },
}

impl ReconcileError {
    /// Whether a later cycle can be expected to succeed without intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::Report { .. } | Self::Apply(_))
    }
}

/// Forwarder errors
#[derive(Debug, Error)]
pub enum ForwarderError {
    /// Failed to bind the local redirect port
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: SocketAddr, reason: String },

    /// No active mapping matches this forwarder's local port
    #[error("no enabled mapping for local port {0}")]
    NoMapping(u16),

    /// Failed to retrieve the pre-NAT destination
    #[error("failed to get original destination: {0}")]
    OriginalDst(String),

    /// Upstream dial or handshake failure
    #[error("upstream dial failed: {0}")]
    Upstream(String),

    /// The upstream rejected the tunnel request
    #[error("upstream refused: {0}")]
    Refused(String),

    /// Splice ended with an error
    #[error("relay error: {0}")]
    Relay(String),

    /// I/O error
    #[error("forwarder I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ForwarderError {
    /// Check if this error is recoverable (connection-scoped, listener survives)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Bind { .. } | Self::NoMapping(_) => false,
            Self::OriginalDst(_) | Self::Upstream(_) | Self::Refused(_) | Self::Relay(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
        }
    }
}

/// Control-plane client errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure reaching the control plane
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// Control plane answered with a non-success status
    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// Response body did not decode
    #[error("decode error from {url}: {reason}")]
    Decode { url: String, reason: String },
}

/// Type alias for Result with `PgwError`
pub type Result<T> = std::result::Result<T, PgwError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PortError::InUse(15001);
        assert_eq!(
            err.to_string(),
            "port 15001 is already used by another client"
        );

        let err = PortError::Exhausted {
            base: 15001,
            max: 15999,
        };
        assert!(err.to_string().contains("no free port in range"));

        let err = ForwarderError::NoMapping(15002);
        assert!(err.to_string().contains("15002"));
    }

    #[test]
    fn test_forwarder_recovery_classification() {
        let bind_err = ForwarderError::Bind {
            addr: "127.0.0.1:15001".parse().unwrap(),
            reason: "in use".into(),
        };
        assert!(!bind_err.is_recoverable());

        assert!(ForwarderError::Upstream("refused".into()).is_recoverable());
        assert!(!ForwarderError::NoMapping(15001).is_recoverable());
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::TimedOut, "timeout");
        let err: PgwError = io_err.into();
        assert!(matches!(err, PgwError::Io(_)));

        let store_err = StoreError::not_found("proxy", "p1");
        let err: PgwError = store_err.into();
        assert!(err.to_string().contains("proxy not found"));
    }
}
