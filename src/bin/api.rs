//! pgw-api: control-plane process
//!
//! Serves the REST API, runs the background health ticker, and drives the
//! convergence loop (port allocation, forwarder supervision, reconcile
//! triggers).
//!
//! # Usage
//!
//! ```bash
//! PGW_API_ADDR=0.0.0.0:8080 PGW_STORE_BACKEND=file \
//!   PGW_STORE_PATH=/var/lib/pgw/state.json pgw-api
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use pgw::api::{AppState, NftNatProbe};
use pgw::check::{run_health_ticker, LiveProber};
use pgw::config::{ApiConfig, StoreBackend, SupervisorKind};
use pgw::ports::PortRegistry;
use pgw::store::{FileStore, MemoryStore, Store};
use pgw::supervisor::{NoopSupervisor, Supervisor, SystemdSupervisor};
use pgw::AgentClient;

#[tokio::main]
async fn main() -> Result<()> {
    pgw::init_logging();

    let cfg = ApiConfig::from_env().context("loading configuration")?;
    info!(version = pgw::VERSION, addr = %cfg.addr, "pgw-api starting");

    let store: Arc<dyn Store> = match cfg.store_backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::File => {
            Arc::new(FileStore::open(&cfg.store_path).context("opening store")?)
        }
    };

    let registry = PortRegistry::open(&cfg.ports_dir).context("opening port registry")?;

    let supervisor: Arc<dyn Supervisor> = match cfg.supervisor {
        SupervisorKind::Systemd => Arc::new(SystemdSupervisor::new(cfg.fwd_unit.clone())),
        SupervisorKind::None => Arc::new(NoopSupervisor),
    };

    let agent = AgentClient::new(cfg.agent_url.clone()).context("building agent client")?;

    let state = Arc::new(AppState {
        store: Arc::clone(&store),
        cfg: cfg.clone(),
        registry,
        supervisor,
        agent,
        prober: Arc::new(LiveProber),
        nat_probe: Arc::new(NftNatProbe),
    });

    tokio::spawn(run_health_ticker(store, cfg.health_interval()));

    pgw::api::serve(cfg.addr, state)
        .await
        .context("control plane server failed")
}
