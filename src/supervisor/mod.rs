//! Forwarder supervisor
//!
//! The control plane addresses forwarder instances by local port only; how
//! they are actually run is a deployment detail behind this trait. A
//! `start` after a `stop` is equivalent to restarting the forwarder against
//! the current mapping set, because instances resolve their upstream at
//! startup.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// Starts and stops forwarder instances keyed by local port
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// (Re)start the instance for `port`
    async fn start(&self, port: u16);

    /// Stop the instance for `port`
    async fn stop(&self, port: u16);
}

/// systemd-backed supervisor using a template unit per port
/// (`<unit>@<port>.service`)
#[derive(Debug, Clone)]
pub struct SystemdSupervisor {
    unit: String,
}

impl SystemdSupervisor {
    /// Create a supervisor driving the given template unit name
    #[must_use]
    pub fn new(unit: impl Into<String>) -> Self {
        Self { unit: unit.into() }
    }

    fn instance(&self, port: u16) -> String {
        format!("{}@{}.service", self.unit, port)
    }

    async fn systemctl(&self, verb: &str, port: u16) {
        let instance = self.instance(port);
        match Command::new("systemctl")
            .arg(verb)
            .arg(&instance)
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                debug!(%instance, verb, "systemctl ok");
            }
            Ok(output) => {
                warn!(
                    %instance,
                    verb,
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "systemctl failed"
                );
            }
            Err(e) => {
                warn!(%instance, verb, error = %e, "systemctl exec failed");
            }
        }
    }
}

#[async_trait]
impl Supervisor for SystemdSupervisor {
    async fn start(&self, port: u16) {
        self.systemctl("restart", port).await;
    }

    async fn stop(&self, port: u16) {
        self.systemctl("stop", port).await;
    }
}

/// No-op supervisor for deployments where an external process manager owns
/// forwarder lifecycle (and for tests)
#[derive(Debug, Clone, Default)]
pub struct NoopSupervisor;

#[async_trait]
impl Supervisor for NoopSupervisor {
    async fn start(&self, port: u16) {
        debug!(port, "supervisor disabled; start ignored");
    }

    async fn stop(&self, port: u16) {
        debug!(port, "supervisor disabled; stop ignored");
    }
}
