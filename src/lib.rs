//! pgw: LAN-edge transparent proxy gateway
//!
//! A router-resident appliance that transparently redirects selected LAN
//! clients' outbound TCP traffic (ports 80/443) through per-client upstream
//! HTTP/SOCKS5 proxies, so each client's egress IP can be controlled without
//! any client-side configuration.
//!
//! # Architecture
//!
//! ```text
//! LAN client ── nftables redirect ── pgw-fwd (per port) ── upstream proxy ── internet
//!                      ▲                   ▲
//!                 pgw-agent            pgw-api
//!               (reconciler)        (control plane)
//! ```
//!
//! Three cooperating processes share one authoritative store:
//!
//! - **pgw-api** (control plane): entity CRUD, port allocation, mapping
//!   lifecycle, health telemetry, derived state.
//! - **pgw-agent** (reconciler): transforms the mapping set into a complete
//!   nftables ruleset and applies it atomically; single writer of the
//!   packet-filter tables.
//! - **pgw-fwd** (forwarder): one instance per allocated local port; recovers
//!   the pre-NAT destination, tunnels through the mapped upstream, splices.
//!
//! # Modules
//!
//! - [`api`]: Control-plane REST API and derived state
//! - [`auth`]: Bearer tokens and password verification
//! - [`check`]: Upstream health probes and the background ticker
//! - [`client`]: HTTP clients between the gateway processes
//! - [`config`]: Environment-driven configuration
//! - [`error`]: Error types
//! - [`fwd`]: Per-port transparent forwarder
//! - [`io`]: Bidirectional splice with idle deadlines
//! - [`model`]: Entities (Proxy, Client, Mapping)
//! - [`ports`]: Port allocation and the marker registry
//! - [`reconcile`]: Ruleset construction and atomic apply
//! - [`sniff`]: Protocol sniffing (HTTP Host, TLS SNI)
//! - [`store`]: Concurrency-safe entity store (memory, file)
//! - [`supervisor`]: Forwarder instance lifecycle

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod auth;
pub mod check;
pub mod client;
pub mod config;
pub mod error;
pub mod fwd;
pub mod io;
pub mod model;
pub mod ports;
pub mod reconcile;
pub mod sniff;
pub mod store;
pub mod supervisor;

// Re-export commonly used types at the crate root
pub use client::{AgentClient, ApiClient};
pub use config::{AgentConfig, ApiConfig, FwdConfig, StoreBackend, SupervisorKind};
pub use error::{
    AuthError, CheckError, ClientError, ConfigError, ForwarderError, PgwError, PortError,
    ReconcileError, StoreError,
};
pub use model::{
    normalize_ipv4_host, Client, Mapping, MappingState, MappingView, Proxy, ProxyKind,
    ProxyStatus,
};
pub use ports::{choose_port_for_client, PortRange, PortRegistry};
pub use store::{FileStore, MemoryStore, Store, Telemetry};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging for a gateway binary.
///
/// Level priority: `RUST_LOG` (standard directives), then `PGW_LOG_LEVEL`,
/// then `info`.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let level = std::env::var("PGW_LOG_LEVEL").unwrap_or_else(|_| "info".into());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level))
        // Reduce noise from dependencies
        .add_directive("hyper=warn".parse().expect("static directive"))
        .add_directive("reqwest=warn".parse().expect("static directive"))
        .add_directive("tokio=warn".parse().expect("static directive"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
