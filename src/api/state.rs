//! Shared application state for the control plane

use std::sync::Arc;

use crate::check::HealthProber;
use crate::client::AgentClient;
use crate::config::ApiConfig;
use crate::ports::{PortRange, PortRegistry};
use crate::store::Store;
use crate::supervisor::Supervisor;

use super::derive::NatProbe;

/// Everything the handlers need, shared behind one `Arc`
pub struct AppState {
    /// Entity store
    pub store: Arc<dyn Store>,
    /// Control-plane configuration
    pub cfg: ApiConfig,
    /// Port marker registry
    pub registry: PortRegistry,
    /// Forwarder supervisor
    pub supervisor: Arc<dyn Supervisor>,
    /// Reconcile trigger client
    pub agent: AgentClient,
    /// Upstream health prober
    pub prober: Arc<dyn HealthProber>,
    /// Live NAT table probe for derived state
    pub nat_probe: Arc<dyn NatProbe>,
}

impl AppState {
    /// Redirect port range from the configuration
    #[must_use]
    pub const fn port_range(&self) -> PortRange {
        PortRange {
            base: self.cfg.port_base,
            max: self.cfg.port_max,
        }
    }
}
