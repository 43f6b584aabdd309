//! Ruleset application via the nft tool
//!
//! The rendered script goes to `nft -f -` on stdin as one atomic batch:
//! either the whole ruleset lands or none of it does. Tear-down deletes the
//! two managed tables and ignores not-found errors, so the first run on a
//! clean system behaves the same as any later run.
//!
//! The applier sits behind a trait so the reconcile cycle can be exercised
//! in tests with a recording implementation instead of a root shell.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use super::rules::{FILTER_TABLE, NAT_TABLE};
use crate::error::ReconcileError;

/// Applies rendered rulesets to the packet filter
#[async_trait]
pub trait RulesetApplier: Send + Sync {
    /// Delete both managed tables, ignoring not-found errors
    async fn teardown(&self);

    /// Install a rendered ruleset as one atomic batch.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Apply`] when the batch is rejected or the
    /// tool cannot be run.
    async fn apply(&self, ruleset: &str) -> Result<(), ReconcileError>;
}

/// Production applier shelling out to `nft`
#[derive(Debug, Clone, Default)]
pub struct NftApplier;

impl NftApplier {
    /// Create the nft-backed applier
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RulesetApplier for NftApplier {
    async fn teardown(&self) {
        for (family, table) in [("ip", NAT_TABLE), ("inet", FILTER_TABLE)] {
            match Command::new("nft")
                .args(["delete", "table", family, table])
                .output()
                .await
            {
                Ok(output) if output.status.success() => {
                    debug!(family, table, "table deleted");
                }
                Ok(output) => {
                    // Not-found is the normal first-run case
                    trace!(
                        family,
                        table,
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "table delete skipped"
                    );
                }
                Err(e) => {
                    warn!(family, table, error = %e, "nft delete exec failed");
                }
            }
        }
    }

    async fn apply(&self, ruleset: &str) -> Result<(), ReconcileError> {
        let mut child = Command::new("nft")
            .arg("-f")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ReconcileError::Apply(format!("spawn nft: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ReconcileError::Apply("nft stdin unavailable".into()))?;
        stdin
            .write_all(ruleset.as_bytes())
            .await
            .map_err(|e| ReconcileError::Apply(format!("write ruleset: {e}")))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ReconcileError::Apply(format!("wait nft: {e}")))?;

        if !output.status.success() {
            return Err(ReconcileError::Apply(format!(
                "nft exited {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        debug!(bytes = ruleset.len(), "ruleset applied");
        Ok(())
    }
}

/// Dump the live managed NAT table as text (for derived-state probes).
///
/// # Errors
///
/// Returns [`ReconcileError::Apply`] when nft cannot be run or the table
/// cannot be listed (a missing table is an error here: no table means no
/// redirect rule).
pub async fn dump_nat_table() -> Result<String, ReconcileError> {
    let output = Command::new("nft")
        .args(["list", "table", "ip", NAT_TABLE])
        .output()
        .await
        .map_err(|e| ReconcileError::Apply(format!("spawn nft list: {e}")))?;

    if !output.status.success() {
        return Err(ReconcileError::Apply(format!(
            "nft list exited {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    String::from_utf8(output.stdout)
        .map_err(|e| ReconcileError::Apply(format!("nft output decode failed: {e}")))
}
