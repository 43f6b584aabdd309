//! Configuration for the gateway processes
//!
//! All three processes are configured from the environment with `PGW_*`
//! variables; each binary loads only its own section. Values are validated
//! at startup so a bad deployment fails fast instead of mid-reconcile.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default local redirect port range
pub const DEFAULT_PORT_BASE: u16 = 15001;
/// Default upper bound of the redirect port range (inclusive)
pub const DEFAULT_PORT_MAX: u16 = 15999;

/// Which store backend the control plane uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Volatile in-process store
    Memory,
    /// JSON document persisted with atomic replace
    File,
}

/// How forwarder instances are started and stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorKind {
    /// systemd template units (`pgw-fwd@<port>`)
    Systemd,
    /// No-op; an external process manager owns forwarder lifecycle
    None,
}

/// Control-plane (API) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Listen address for the REST API
    pub addr: SocketAddr,
    /// Store backend selection
    pub store_backend: StoreBackend,
    /// JSON document path for the file backend
    pub store_path: PathBuf,
    /// Directory holding one marker file per allocated port
    pub ports_dir: PathBuf,
    /// HS256 signing secret for bearer tokens
    pub jwt_secret: String,
    /// Issued-token lifetime in seconds
    pub token_ttl_secs: u64,
    /// Admin login name
    pub admin_user: String,
    /// Admin password, plain (ignored when a hash is set)
    pub admin_pass: String,
    /// Admin password as an Argon2id PHC string
    pub admin_pass_hash: Option<String>,
    /// Shared token granting the agent role
    pub agent_token: String,
    /// Base URL of the reconciler's trigger endpoint
    pub agent_url: String,
    /// Health ticker interval in seconds
    pub health_interval_secs: u64,
    /// First local redirect port the allocator hands out
    pub port_base: u16,
    /// Last local redirect port (inclusive)
    pub port_max: u16,
    /// Forwarder supervisor selection
    pub supervisor: SupervisorKind,
    /// systemd template unit name (instantiated per port)
    pub fwd_unit: String,
}

impl ApiConfig {
    /// Load from `PGW_*` environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a variable holds an unparseable value or
    /// validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        let cfg = Self {
            addr: env_parse("PGW_API_ADDR", "0.0.0.0:8080")?,
            store_backend: match env_str("PGW_STORE_BACKEND", "memory").as_str() {
                "memory" => StoreBackend::Memory,
                "file" => StoreBackend::File,
                other => {
                    return Err(ConfigError::env(
                        "PGW_STORE_BACKEND",
                        format!("expected memory|file, got {other}"),
                    ))
                }
            },
            store_path: PathBuf::from(env_str("PGW_STORE_PATH", "/var/lib/pgw/state.json")),
            ports_dir: PathBuf::from(env_str("PGW_PORTS_DIR", "/var/lib/pgw/ports")),
            jwt_secret: env_str("PGW_JWT_SECRET", "dev-change-me"),
            token_ttl_secs: env_parse("PGW_TOKEN_TTL_SECS", "43200")?,
            admin_user: env_str("PGW_ADMIN_USER", "admin"),
            admin_pass: env_str("PGW_ADMIN_PASS", "admin"),
            admin_pass_hash: std::env::var("PGW_ADMIN_PASS_HASH").ok().filter(|s| !s.is_empty()),
            agent_token: env_str("PGW_AGENT_TOKEN", "dev-agent-token"),
            agent_url: env_str("PGW_AGENT_URL", "http://127.0.0.1:9090"),
            health_interval_secs: env_parse("PGW_HEALTH_INTERVAL_SECS", "30")?,
            port_base: env_parse("PGW_FWD_PORT_BASE", "15001")?,
            port_max: env_parse("PGW_FWD_PORT_MAX", "15999")?,
            supervisor: match env_str("PGW_SUPERVISOR", "systemd").as_str() {
                "systemd" => SupervisorKind::Systemd,
                "none" => SupervisorKind::None,
                other => {
                    return Err(ConfigError::env(
                        "PGW_SUPERVISOR",
                        format!("expected systemd|none, got {other}"),
                    ))
                }
            },
            fwd_unit: env_str("PGW_FWD_UNIT", "pgw-fwd"),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate invariants between fields.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` on an empty port range or a
    /// zero health interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port_base == 0 || self.port_base > self.port_max {
            return Err(ConfigError::ValidationError(format!(
                "invalid port range {}-{}",
                self.port_base, self.port_max
            )));
        }
        if self.health_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "health interval must be positive".into(),
            ));
        }
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::ValidationError("empty JWT secret".into()));
        }
        Ok(())
    }

    /// Health ticker interval
    #[must_use]
    pub const fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}

/// Reconciler (agent) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Listen address for the trigger endpoint
    pub addr: SocketAddr,
    /// Control-plane base URL
    pub api_url: String,
    /// Token presented to the control plane (agent role)
    pub agent_token: String,
    /// WAN-facing interface (egress drops)
    pub wan_iface: String,
    /// LAN-facing interface (redirect match)
    pub lan_iface: String,
    /// Periodic reconcile interval in seconds
    pub reconcile_interval_secs: u64,
}

impl AgentConfig {
    /// Load from `PGW_*` environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a variable holds an unparseable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let cfg = Self {
            addr: env_parse("PGW_AGENT_ADDR", "0.0.0.0:9090")?,
            api_url: env_str("PGW_API_URL", "http://127.0.0.1:8080"),
            agent_token: env_str("PGW_AGENT_TOKEN", "dev-agent-token"),
            wan_iface: env_str("PGW_WAN_IFACE", "eth0"),
            lan_iface: env_str("PGW_LAN_IFACE", "ens19"),
            reconcile_interval_secs: env_parse("PGW_RECONCILE_INTERVAL_SECS", "15")?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate interface names and the interval.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` on empty interface names or a
    /// zero interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wan_iface.is_empty() || self.lan_iface.is_empty() {
            return Err(ConfigError::ValidationError(
                "WAN and LAN interface names must be set".into(),
            ));
        }
        if self.reconcile_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "reconcile interval must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Periodic reconcile interval
    #[must_use]
    pub const fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

/// Forwarder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FwdConfig {
    /// Listen address; its port is the mapping's local redirect port
    pub addr: SocketAddr,
    /// Control-plane base URL for upstream resolution
    pub api_url: String,
    /// Token presented to the control plane (agent role)
    pub agent_token: String,
}

impl FwdConfig {
    /// Load from `PGW_*` environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when `PGW_FWD_ADDR` does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            addr: env_parse("PGW_FWD_ADDR", "127.0.0.1:15001")?,
            api_url: env_str("PGW_API_URL", "http://127.0.0.1:8080"),
            agent_token: env_str("PGW_AGENT_TOKEN", "dev-agent-token"),
        })
    }

    /// The local redirect port this instance serves
    #[must_use]
    pub const fn local_port(&self) -> u16 {
        self.addr.port()
    }
}

fn env_str(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default.to_string(),
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    let raw = env_str(name, default);
    raw.parse()
        .map_err(|_| ConfigError::env(name, format!("cannot parse {raw:?}")))
}
