//! HTTP proxy health probe
//!
//! Builds a `reqwest` client routed through the upstream and fetches the
//! first IP-echo endpoint that answers 200. The response body is the
//! observed egress IP.

use std::time::{Duration, Instant};

use tracing::trace;

use super::{classify_latency, CheckResult, ENDPOINTS};
use crate::error::CheckError;
use crate::model::Proxy;

/// Probe an HTTP CONNECT proxy.
///
/// # Errors
///
/// Returns [`CheckError::AllEndpointsFailed`] when no endpoint produced a
/// 200, and [`CheckError::Protocol`] when the proxy URL or client cannot be
/// built.
pub async fn check_http(proxy: &Proxy, timeout: Duration) -> Result<CheckResult, CheckError> {
    let proxy_url = match (&proxy.username, &proxy.password) {
        (Some(user), _) if !user.is_empty() => format!(
            "http://{}:{}@{}",
            user,
            proxy.password.as_deref().unwrap_or(""),
            proxy.addr()
        ),
        _ => format!("http://{}", proxy.addr()),
    };

    let client = reqwest::Client::builder()
        .proxy(
            reqwest::Proxy::all(&proxy_url)
                .map_err(|e| CheckError::Protocol(format!("proxy url: {e}")))?,
        )
        .timeout(timeout)
        .user_agent("pgw-health/1.0")
        .build()
        .map_err(|e| CheckError::Protocol(format!("client build: {e}")))?;

    let mut last_err = String::new();
    for (host, path) in ENDPOINTS {
        let url = format!("https://{host}{path}");
        let start = Instant::now();

        let response = match client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                trace!(%url, error = %e, "probe endpoint failed");
                last_err = e.to_string();
                continue;
            }
        };
        if !response.status().is_success() {
            last_err = format!("non-200: {}", response.status());
            continue;
        }
        let Ok(body) = response.text().await else {
            last_err = "body read failed".into();
            continue;
        };

        let elapsed = start.elapsed();
        return Ok(CheckResult {
            status: classify_latency(elapsed),
            latency_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            exit_ip: body.trim().to_string(),
        });
    }

    Err(CheckError::AllEndpointsFailed(last_err))
}
