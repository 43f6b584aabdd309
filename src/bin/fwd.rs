//! pgw-fwd: per-port transparent forwarder
//!
//! One instance per allocated local redirect port (systemd template unit
//! `pgw-fwd@<port>`). The upstream binding is resolved once at startup; a
//! restart picks up a new binding. Startup failures exit non-zero and leave
//! recovery to the supervisor's restart policy.
//!
//! # Usage
//!
//! ```bash
//! PGW_FWD_ADDR=127.0.0.1:15001 PGW_API_URL=http://127.0.0.1:8080 pgw-fwd
//! ```

use anyhow::{Context, Result};
use tracing::info;

use pgw::config::FwdConfig;
use pgw::fwd::Forwarder;
use pgw::ApiClient;

#[tokio::main]
async fn main() -> Result<()> {
    pgw::init_logging();

    let cfg = FwdConfig::from_env().context("loading configuration")?;
    info!(
        version = pgw::VERSION,
        addr = %cfg.addr,
        port = cfg.local_port(),
        "pgw-fwd starting"
    );

    let api = ApiClient::new(cfg.api_url.clone(), cfg.agent_token.clone())
        .context("building API client")?;

    let forwarder = Forwarder::bind(cfg.addr, &api)
        .await
        .context("forwarder startup failed")?;

    forwarder.run().await.context("accept loop failed")
}
