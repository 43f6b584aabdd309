//! Upstream health probes
//!
//! A probe tunnels a tiny HTTP GET through the proxy to an IP-echo endpoint
//! and measures wall-clock latency. The result is advisory telemetry only;
//! it never gates rule emission.

pub mod http;
pub mod socks5;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CheckError;
use crate::model::{Proxy, ProxyKind, ProxyStatus};
use crate::store::{Store, Telemetry};

/// Per-probe deadline
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(12);

/// Latency below which a proxy is OK
const OK_BELOW_MS: u64 = 500;
/// Latency below which a proxy is DEGRADED (else DOWN)
const DEGRADED_BELOW_MS: u64 = 900;

/// IP-echo endpoints tried in order; first success wins
pub(crate) const ENDPOINTS: &[(&str, &str)] = &[
    ("api.ipify.org", "/?format=text"),
    ("ifconfig.me", "/ip"),
    ("icanhazip.com", "/"),
];

/// Outcome of one probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// Classification by latency (or DOWN on error)
    pub status: ProxyStatus,
    /// Observed latency in milliseconds (0 on failure)
    pub latency_ms: u64,
    /// Egress IP reported by the echo endpoint (empty on failure)
    pub exit_ip: String,
}

impl CheckResult {
    /// A failed probe: DOWN with cleared telemetry
    #[must_use]
    pub fn down() -> Self {
        Self {
            status: ProxyStatus::Down,
            latency_ms: 0,
            exit_ip: String::new(),
        }
    }
}

/// Classify a probe's wall-clock latency
#[must_use]
pub fn classify_latency(elapsed: Duration) -> ProxyStatus {
    let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    if ms < OK_BELOW_MS {
        ProxyStatus::Ok
    } else if ms < DEGRADED_BELOW_MS {
        ProxyStatus::Degraded
    } else {
        ProxyStatus::Down
    }
}

/// Probe one proxy with the protocol-appropriate checker.
///
/// # Errors
///
/// Returns [`CheckError`] when every endpoint fails; the caller converts
/// that into a DOWN result.
pub async fn check_proxy(proxy: &Proxy) -> Result<CheckResult, CheckError> {
    match proxy.kind {
        ProxyKind::Http => {
            // The per-request timeout bounds each endpoint; the outer
            // deadline bounds the whole probe across endpoints.
            tokio::time::timeout(PROBE_TIMEOUT, http::check_http(proxy, PROBE_TIMEOUT))
                .await
                .map_err(|_| CheckError::Timeout)?
        }
        ProxyKind::Socks5 => socks5::check_socks5(proxy, PROBE_TIMEOUT).await,
    }
}

/// Probe one proxy and fold errors into a DOWN result
pub async fn check_proxy_lenient(proxy: &Proxy) -> CheckResult {
    match check_proxy(proxy).await {
        Ok(result) => result,
        Err(e) => {
            debug!(proxy = %proxy.addr(), error = %e, "probe failed");
            CheckResult::down()
        }
    }
}

/// Pluggable health prober (the control plane injects a stub in tests)
#[async_trait::async_trait]
pub trait HealthProber: Send + Sync {
    /// Probe one proxy; failures fold into a DOWN result
    async fn probe(&self, proxy: &Proxy) -> CheckResult;
}

/// Production prober running real probes
#[derive(Debug, Clone, Default)]
pub struct LiveProber;

#[async_trait::async_trait]
impl HealthProber for LiveProber {
    async fn probe(&self, proxy: &Proxy) -> CheckResult {
        check_proxy_lenient(proxy).await
    }
}

/// Background health ticker: probe every enabled proxy at `interval` and
/// record telemetry. Runs until the process exits.
pub async fn run_health_ticker(store: Arc<dyn Store>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let proxies: Vec<Proxy> = store
            .list_proxies()
            .into_iter()
            .filter(|p| p.enabled)
            .collect();
        if proxies.is_empty() {
            continue;
        }
        debug!(count = proxies.len(), "health tick");

        for proxy in proxies {
            let result = check_proxy_lenient(&proxy).await;
            if result.status == ProxyStatus::Down {
                warn!(proxy = %proxy.addr(), "upstream probe DOWN");
            }
            store.set_proxy_telemetry(
                &proxy.id,
                Telemetry {
                    status: result.status,
                    latency_ms: result.latency_ms,
                    exit_ip: result.exit_ip,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_latency_thresholds() {
        assert_eq!(classify_latency(Duration::from_millis(0)), ProxyStatus::Ok);
        assert_eq!(
            classify_latency(Duration::from_millis(499)),
            ProxyStatus::Ok
        );
        assert_eq!(
            classify_latency(Duration::from_millis(500)),
            ProxyStatus::Degraded
        );
        assert_eq!(
            classify_latency(Duration::from_millis(899)),
            ProxyStatus::Degraded
        );
        assert_eq!(
            classify_latency(Duration::from_millis(900)),
            ProxyStatus::Down
        );
        assert_eq!(classify_latency(Duration::from_secs(30)), ProxyStatus::Down);
    }

    #[test]
    fn test_down_result_clears_fields() {
        let r = CheckResult::down();
        assert_eq!(r.status, ProxyStatus::Down);
        assert_eq!(r.latency_ms, 0);
        assert!(r.exit_ip.is_empty());
    }
}
