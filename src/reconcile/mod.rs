//! Rule reconciliation
//!
//! The reconciler is the single writer of the packet-filter tables. Each
//! cycle tears the managed tables down, fetches the authoritative mapping
//! snapshot from the control plane, renders a complete ruleset, applies it
//! in one atomic batch, and reports APPLIED or FAILED per considered
//! mapping. Cycles are serialised under one mutex; the periodic ticker and
//! the HTTP trigger run the same code path.
//!
//! Failure semantics: a fetch failure aborts the cycle with the previous
//! tables already gone: temporary loss of redirection is preferred over
//! serving rules inconsistent with the mapping set; the next cycle retries
//! unconditionally.

mod apply;
mod rules;
mod server;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::ApiClient;
use crate::config::AgentConfig;
use crate::error::ReconcileError;
use crate::model::MappingState;

pub use apply::{dump_nat_table, NftApplier, RulesetApplier};
pub use rules::{
    build_ruleset, canonicalize, prune, render, rule, ConsideredMapping, RedirectRule,
    FILTER_TABLE, NAT_TABLE,
};
pub use server::{serve, trigger_router};

#[cfg(test)]
pub(crate) use apply::test_support::RecordingApplier;

/// Single-writer reconciler over the packet-filter state
pub struct Reconciler {
    api: ApiClient,
    applier: Arc<dyn RulesetApplier>,
    lan_iface: String,
    wan_iface: String,
    lock: Mutex<()>,
}

impl Reconciler {
    /// Create a reconciler for the given agent configuration.
    pub fn new(cfg: &AgentConfig, api: ApiClient, applier: Arc<dyn RulesetApplier>) -> Self {
        Self {
            api,
            applier,
            lan_iface: cfg.lan_iface.clone(),
            wan_iface: cfg.wan_iface.clone(),
            lock: Mutex::new(()),
        }
    }

    /// Run one reconcile cycle.
    ///
    /// Holds the process-wide mutex across tear-down, fetch, apply, and the
    /// per-mapping state reports; only one cycle executes at a time.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::Fetch`] aborts before rendering;
    /// [`ReconcileError::Apply`] is returned after every considered mapping
    /// was marked FAILED.
    pub async fn run(&self) -> Result<(), ReconcileError> {
        let _guard = self.lock.lock().await;

        self.applier.teardown().await;

        let views = self
            .api
            .list_mappings()
            .await
            .map_err(|e| ReconcileError::Fetch(e.to_string()))?;

        let (ruleset, considered) =
            rules::build_ruleset(&views, &self.lan_iface, &self.wan_iface);

        match self.applier.apply(&ruleset).await {
            Ok(()) => {
                info!(
                    mappings = considered.len(),
                    bytes = ruleset.len(),
                    "ruleset applied"
                );
                self.report(&considered, MappingState::Applied).await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "ruleset apply failed");
                self.report(&considered, MappingState::Failed).await;
                Err(e)
            }
        }
    }

    /// Report the outcome for every considered mapping, preserving each
    /// mapping's allocated port. Report failures are logged, not fatal; the
    /// rule state already landed and the next cycle re-reports.
    async fn report(&self, considered: &[ConsideredMapping], state: MappingState) {
        for mapping in considered {
            if let Err(e) = self
                .api
                .set_mapping_state(&mapping.id, state, mapping.port)
                .await
            {
                warn!(mapping = %mapping.id, error = %e, "state report failed");
            } else {
                debug!(mapping = %mapping.id, state = ?state, "state reported");
            }
        }
    }

    /// Periodic loop: one cycle every `interval` until the process exits.
    pub async fn run_periodic(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.run().await {
                warn!(error = %e, "periodic reconcile failed");
            }
        }
    }
}
