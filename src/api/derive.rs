//! Derived observable state
//!
//! A mapping is reported APPLIED when live system evidence supports it:
//! the forwarder answers on its local port AND the live NAT table carries a
//! redirect for the client's source address. Evidence can only upgrade a
//! PENDING mapping; a stored FAILED verdict is operator-visible and is never
//! cleared by derivation, which would erase the exact signal the operator
//! needs to act on.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use crate::model::{MappingState, MappingView};
use crate::reconcile::dump_nat_table;

/// Deadline for the local-port liveness probe
pub const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Source of the live NAT table text
#[async_trait]
pub trait NatProbe: Send + Sync {
    /// Dump the managed NAT table; `None` when it cannot be read
    async fn dump_nat(&self) -> Option<String>;
}

/// Production probe shelling out to nft
#[derive(Debug, Clone, Default)]
pub struct NftNatProbe;

#[async_trait]
impl NatProbe for NftNatProbe {
    async fn dump_nat(&self) -> Option<String> {
        match dump_nat_table().await {
            Ok(dump) => Some(dump),
            Err(e) => {
                trace!(error = %e, "NAT table dump failed");
                None
            }
        }
    }
}

/// Check whether a forwarder answers on `127.0.0.1:port`.
pub async fn port_ok(port: u16) -> bool {
    timeout(PORT_PROBE_TIMEOUT, TcpStream::connect(("127.0.0.1", port)))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

/// Check the dumped NAT table for a redirect from `ip_cidr` to `port`.
///
/// nft prints a `/32` source as the bare address, so both spellings match.
/// The probe is textual and tolerant of transient mid-reconcile states.
#[must_use]
pub fn nat_rule_present(dump: &str, ip_cidr: &str, port: u16) -> bool {
    let addr = ip_cidr.split('/').next().unwrap_or(ip_cidr);
    let redirect = format!("redirect to :{port}");

    dump.lines().any(|line| {
        let has_src = line
            .split("ip saddr ")
            .nth(1)
            .map(|rest| {
                let src = rest.split_whitespace().next().unwrap_or("");
                src == addr || src == format!("{addr}/32")
            })
            .unwrap_or(false);
        has_src && line.contains(&redirect)
    })
}

/// Apply derivation to one view: upgrade to APPLIED on full evidence, keep
/// the stored state otherwise. FAILED is sticky.
pub async fn derive_view_state(view: &MappingView, nat_dump: Option<&str>) -> MappingState {
    if view.state == MappingState::Failed {
        return MappingState::Failed;
    }

    let Some(dump) = nat_dump else {
        return view.state;
    };
    if !nat_rule_present(dump, &view.client.ip_cidr, view.local_redirect_port) {
        return view.state;
    }
    if !port_ok(view.local_redirect_port).await {
        return view.state;
    }

    MappingState::Applied
}
