//! Shared scaffolding for integration tests

// Each test binary uses a different subset of this module
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use pgw::api::{AppState, NatProbe};
use pgw::check::{CheckResult, HealthProber};
use pgw::config::{ApiConfig, StoreBackend, SupervisorKind};
use pgw::model::{Proxy, ProxyStatus};
use pgw::ports::PortRegistry;
use pgw::reconcile::RulesetApplier;
use pgw::store::MemoryStore;
use pgw::supervisor::Supervisor;
use pgw::ReconcileError;

/// Health prober answering with a fixed result
pub struct FixedProber(pub CheckResult);

#[async_trait]
impl HealthProber for FixedProber {
    async fn probe(&self, _proxy: &Proxy) -> CheckResult {
        self.0.clone()
    }
}

/// NAT probe answering with a configurable dump
#[derive(Default)]
pub struct FixedNatProbe {
    pub dump: Mutex<Option<String>>,
}

#[async_trait]
impl NatProbe for FixedNatProbe {
    async fn dump_nat(&self) -> Option<String> {
        self.dump.lock().clone()
    }
}

/// Supervisor recording start/stop calls
#[derive(Default)]
pub struct RecordingSupervisor {
    pub events: Mutex<Vec<(String, u16)>>,
}

#[async_trait]
impl Supervisor for RecordingSupervisor {
    async fn start(&self, port: u16) {
        self.events.lock().push(("start".into(), port));
    }

    async fn stop(&self, port: u16) {
        self.events.lock().push(("stop".into(), port));
    }
}

/// Applier recording rulesets; optionally failing every apply
#[derive(Default)]
pub struct RecordingApplier {
    pub applied: Mutex<Vec<String>>,
    pub teardowns: Mutex<usize>,
    pub fail_apply: bool,
}

#[async_trait]
impl RulesetApplier for RecordingApplier {
    async fn teardown(&self) {
        *self.teardowns.lock() += 1;
    }

    async fn apply(&self, ruleset: &str) -> Result<(), ReconcileError> {
        if self.fail_apply {
            return Err(ReconcileError::Apply("simulated apply failure".into()));
        }
        self.applied.lock().push(ruleset.to_string());
        Ok(())
    }
}

/// Config pointing all collaborators at harmless local defaults
pub fn test_config(ports_dir: &std::path::Path, agent_url: &str) -> ApiConfig {
    ApiConfig {
        addr: "127.0.0.1:0".parse().unwrap(),
        store_backend: StoreBackend::Memory,
        store_path: ports_dir.join("state.json"),
        ports_dir: ports_dir.to_path_buf(),
        jwt_secret: "test-secret".into(),
        token_ttl_secs: 3600,
        admin_user: "admin".into(),
        admin_pass: "hunter2".into(),
        admin_pass_hash: None,
        agent_token: "agent-token".into(),
        agent_url: agent_url.into(),
        health_interval_secs: 30,
        port_base: 15001,
        port_max: 15999,
        supervisor: SupervisorKind::None,
        fwd_unit: "pgw-fwd".into(),
    }
}

/// Fixture bundle for router-level tests
pub struct Fixture {
    pub state: Arc<AppState>,
    pub supervisor: Arc<RecordingSupervisor>,
    pub nat_probe: Arc<FixedNatProbe>,
    pub store: Arc<MemoryStore>,
    _ports_dir: tempfile::TempDir,
}

/// Build an `AppState` over a fresh memory store with recording doubles.
///
/// The agent URL points at a dead local port, so background reconcile
/// triggers fail fast and harmlessly unless a test wires a real agent.
pub fn fixture_with_agent(agent_url: &str, probe: CheckResult) -> Fixture {
    let ports_dir = tempfile::tempdir().unwrap();
    let cfg = test_config(ports_dir.path(), agent_url);

    let store = Arc::new(MemoryStore::new());
    let supervisor = Arc::new(RecordingSupervisor::default());
    let nat_probe = Arc::new(FixedNatProbe::default());

    let state = Arc::new(AppState {
        store: store.clone(),
        registry: PortRegistry::open(ports_dir.path()).unwrap(),
        supervisor: supervisor.clone(),
        agent: pgw::AgentClient::new(cfg.agent_url.clone()).unwrap(),
        prober: Arc::new(FixedProber(probe)),
        nat_probe: nat_probe.clone(),
        cfg,
    });

    Fixture {
        state,
        supervisor,
        nat_probe,
        store,
        _ports_dir: ports_dir,
    }
}

/// Fixture with a dead agent endpoint and an OK prober
pub fn fixture() -> Fixture {
    fixture_with_agent(
        "http://127.0.0.1:9",
        CheckResult {
            status: ProxyStatus::Ok,
            latency_ms: 40,
            exit_ip: "203.0.113.9".into(),
        },
    )
}
