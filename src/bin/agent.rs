//! pgw-agent: rule reconciler process
//!
//! Single writer of the managed nftables tables. Runs a periodic reconcile
//! cycle and serves the synchronous trigger endpoint for the control plane.
//!
//! # Usage
//!
//! ```bash
//! PGW_LAN_IFACE=ens19 PGW_WAN_IFACE=eth0 \
//!   PGW_API_URL=http://127.0.0.1:8080 pgw-agent
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use pgw::config::AgentConfig;
use pgw::reconcile::{self, NftApplier, Reconciler};
use pgw::ApiClient;

#[tokio::main]
async fn main() -> Result<()> {
    pgw::init_logging();

    let cfg = AgentConfig::from_env().context("loading configuration")?;
    info!(
        version = pgw::VERSION,
        addr = %cfg.addr,
        lan = %cfg.lan_iface,
        wan = %cfg.wan_iface,
        "pgw-agent starting"
    );

    let api = ApiClient::new(cfg.api_url.clone(), cfg.agent_token.clone())
        .context("building API client")?;
    let reconciler = Arc::new(Reconciler::new(&cfg, api, Arc::new(NftApplier::new())));

    tokio::spawn(Arc::clone(&reconciler).run_periodic(cfg.reconcile_interval()));

    reconcile::serve(cfg.addr, reconciler)
        .await
        .context("agent server failed")
}
