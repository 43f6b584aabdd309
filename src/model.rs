//! Entity model for the proxy gateway
//!
//! Three entities share the store: upstream proxies, LAN clients, and the
//! mappings that bind one client's traffic to one proxy. `MappingView` is the
//! read projection handed to the reconciler and the forwarders.

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upstream proxy protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    /// HTTP CONNECT proxy
    Http,
    /// SOCKS5 proxy (RFC 1928)
    Socks5,
}

impl ProxyKind {
    /// Protocol name as stored on the wire
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Socks5 => "socks5",
        }
    }
}

/// Advisory health classification of an upstream proxy
///
/// Telemetry never gates rule emission; it only informs the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProxyStatus {
    /// Probe succeeded with low latency
    Ok,
    /// Probe succeeded but slowly
    Degraded,
    /// Probe failed or has never succeeded
    Down,
}

/// Mapping lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MappingState {
    /// Created, rules not yet confirmed
    Pending,
    /// Kernel rule present and forwarder alive
    Applied,
    /// Reconcile or upstream health failure; sticky until an explicit write
    Failed,
}

/// An upstream relay through which a client's traffic egresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proxy {
    /// Stable opaque ID (UUID)
    #[serde(default)]
    pub id: String,
    /// Operator label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Proxy protocol
    #[serde(rename = "type")]
    pub kind: ProxyKind,
    /// Proxy host (IP or name)
    pub host: String,
    /// Proxy port
    pub port: u16,
    /// Optional username for upstream auth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Optional password for upstream auth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Whether mappings through this proxy are eligible for forwarding
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Advisory health status
    #[serde(default = "ProxyStatus::down")]
    pub status: ProxyStatus,
    /// Last observed probe latency in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Last observed egress IP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_ip: Option<String>,
    /// When the proxy was last probed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Proxy {
    /// Validate host/port/type constraints at ingress
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` on empty host or zero port.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::ValidationError("proxy host is empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::ValidationError(
                "proxy port must be in 1..=65535".into(),
            ));
        }
        Ok(())
    }

    /// `host:port` form used for dialing
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether upstream credentials are configured
    ///
    /// Either field being non-empty counts: some upstreams issue
    /// password-only accounts.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty())
            || self.password.as_deref().is_some_and(|p| !p.is_empty())
    }
}

impl ProxyStatus {
    const fn down() -> Self {
        Self::Down
    }
}

const fn default_true() -> bool {
    true
}

/// A LAN source address whose egress is steered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    /// Stable opaque ID (UUID)
    #[serde(default)]
    pub id: String,
    /// IPv4 host in `a.b.c.d/32` form (normalised at ingress)
    pub ip_cidr: String,
    /// Operator note
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub note: String,
    /// Whether this client participates in redirection
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Client {
    /// The bare IPv4 host address, if `ip_cidr` is well-formed
    #[must_use]
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        self.ip_cidr
            .split('/')
            .next()
            .and_then(|s| s.parse().ok())
    }
}

/// Directs traffic from one client through one proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    /// Stable opaque ID (UUID)
    #[serde(default)]
    pub id: String,
    /// Referenced client
    pub client_id: String,
    /// Referenced proxy (unique across mappings)
    pub proxy_id: String,
    /// Upstream protocol recorded at creation
    #[serde(default = "ProxyKind::http")]
    pub protocol: ProxyKind,
    /// Local redirect port; 0 until allocated
    #[serde(default)]
    pub local_redirect_port: u16,
    /// Lifecycle state
    #[serde(default = "MappingState::pending")]
    pub state: MappingState,
    /// When the reconciler last confirmed or failed this mapping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_at: Option<DateTime<Utc>>,
}

impl ProxyKind {
    const fn http() -> Self {
        Self::Http
    }
}

impl MappingState {
    const fn pending() -> Self {
        Self::Pending
    }
}

/// Read projection of a mapping with inlined client and proxy records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingView {
    /// Mapping ID
    pub id: String,
    /// Inlined client record
    pub client: Client,
    /// Inlined proxy record
    pub proxy: Proxy,
    /// Mapping state (possibly derived by the caller)
    pub state: MappingState,
    /// Allocated local redirect port
    pub local_redirect_port: u16,
}

/// Normalise a client source into IPv4 `/32` CIDR form.
///
/// Accepts a bare `a.b.c.d` (suffixed with `/32`) or `a.b.c.d/32`. Any other
/// prefix length and any non-IPv4 input is rejected.
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` for empty, non-IPv4, or non-`/32`
/// input.
pub fn normalize_ipv4_host(input: &str) -> Result<String, ConfigError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ConfigError::ValidationError("empty ip_cidr".into()));
    }

    match s.split_once('/') {
        None => {
            let ip: Ipv4Addr = s
                .parse()
                .map_err(|_| ConfigError::ValidationError(format!("invalid IPv4: {s}")))?;
            Ok(format!("{ip}/32"))
        }
        Some((addr, prefix)) => {
            let ip: Ipv4Addr = addr
                .parse()
                .map_err(|_| ConfigError::ValidationError(format!("invalid IPv4 CIDR: {s}")))?;
            if prefix != "32" {
                return Err(ConfigError::ValidationError(format!(
                    "only /32 allowed, got /{prefix}"
                )));
            }
            Ok(format!("{ip}/32"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bare_address() {
        assert_eq!(normalize_ipv4_host("10.0.0.1").unwrap(), "10.0.0.1/32");
        assert_eq!(
            normalize_ipv4_host(" 192.168.2.3 ").unwrap(),
            "192.168.2.3/32"
        );
    }

    #[test]
    fn test_normalize_slash32() {
        assert_eq!(normalize_ipv4_host("10.0.0.1/32").unwrap(), "10.0.0.1/32");
    }

    #[test]
    fn test_normalize_rejects_other_prefixes() {
        assert!(normalize_ipv4_host("10.0.0.0/24").is_err());
        assert!(normalize_ipv4_host("10.0.0.0/0").is_err());
        assert!(normalize_ipv4_host("10.0.0.1/33").is_err());
    }

    #[test]
    fn test_normalize_rejects_non_ipv4() {
        assert!(normalize_ipv4_host("::1").is_err());
        assert!(normalize_ipv4_host("fe80::1/32").is_err());
        assert!(normalize_ipv4_host("example.com").is_err());
        assert!(normalize_ipv4_host("").is_err());
        assert!(normalize_ipv4_host("10.0.0").is_err());
    }

    #[test]
    fn test_proxy_serde_round_trip() {
        let json = r#"{
            "id": "p1",
            "type": "socks5",
            "host": "10.0.0.2",
            "port": 1080,
            "enabled": true,
            "status": "DOWN"
        }"#;
        let p: Proxy = serde_json::from_str(json).unwrap();
        assert_eq!(p.kind, ProxyKind::Socks5);
        assert_eq!(p.addr(), "10.0.0.2:1080");
        assert!(!p.has_credentials());

        let out = serde_json::to_string(&p).unwrap();
        assert!(out.contains("\"type\":\"socks5\""));
        assert!(out.contains("\"status\":\"DOWN\""));
        // Cleared telemetry fields stay off the wire
        assert!(!out.contains("latency_ms"));
    }

    #[test]
    fn test_proxy_credentials_gate() {
        let mut p: Proxy = serde_json::from_str(
            r#"{"type":"http","host":"h","port":3128,"enabled":true,"status":"DOWN"}"#,
        )
        .unwrap();
        assert!(!p.has_credentials());

        p.username = Some(String::new());
        assert!(!p.has_credentials());

        // Password-only accounts still advertise auth
        p.password = Some("secret".into());
        assert!(p.has_credentials());
    }

    #[test]
    fn test_proxy_validate() {
        let p: Proxy = serde_json::from_str(
            r#"{"type":"http","host":" ","port":3128,"enabled":true,"status":"DOWN"}"#,
        )
        .unwrap();
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_mapping_defaults() {
        let m: Mapping =
            serde_json::from_str(r#"{"client_id":"c1","proxy_id":"p1"}"#).unwrap();
        assert_eq!(m.protocol, ProxyKind::Http);
        assert_eq!(m.state, MappingState::Pending);
        assert_eq!(m.local_redirect_port, 0);
    }

    #[test]
    fn test_mapping_state_wire_names() {
        assert_eq!(
            serde_json::to_string(&MappingState::Applied).unwrap(),
            "\"APPLIED\""
        );
        assert_eq!(
            serde_json::to_string(&MappingState::Failed).unwrap(),
            "\"FAILED\""
        );
    }

    #[test]
    fn test_client_ipv4() {
        let c = Client {
            id: "c1".into(),
            ip_cidr: "192.168.2.3/32".into(),
            note: String::new(),
            enabled: true,
        };
        assert_eq!(c.ipv4(), Some("192.168.2.3".parse().unwrap()));
    }
}
