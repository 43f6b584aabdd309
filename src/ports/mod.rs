//! Local redirect port allocation and the port marker registry
//!
//! Ports are not tracked in a separate table; the mapping set itself is the
//! ledger. Allocation scans the current mappings, which keeps the port
//! assignment a pure function of store contents and makes the invariants
//! (one port per client, no port shared across clients) directly testable.
//!
//! Allocation is first-fit, not balanced. That keeps assignment
//! deterministic; the range is far larger than any realistic client fleet.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::PortError;
use crate::model::Mapping;

/// Inclusive port range the allocator draws from
#[derive(Debug, Clone, Copy)]
pub struct PortRange {
    /// First candidate port
    pub base: u16,
    /// Last candidate port (inclusive)
    pub max: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            base: crate::config::DEFAULT_PORT_BASE,
            max: crate::config::DEFAULT_PORT_MAX,
        }
    }
}

/// Pick the local redirect port a new mapping for `client_id` will use.
///
/// Rules, in order:
/// 1. A requested port held by a different client fails with
///    [`PortError::InUse`]; otherwise the request is honoured.
/// 2. A client that already holds a port keeps it (port stickiness).
/// 3. Otherwise the first port in the range not held by anyone is chosen.
///
/// The `used` map is built first-seen over mappings with a positive port, so
/// the result is independent of mapping iteration details beyond ownership.
///
/// # Errors
///
/// [`PortError::InUse`] for a foreign requested port, [`PortError::Exhausted`]
/// when the range is full.
pub fn choose_port_for_client(
    mappings: &[Mapping],
    client_id: &str,
    requested: u16,
    range: PortRange,
) -> Result<u16, PortError> {
    let mut used: HashMap<u16, &str> = HashMap::new();
    for m in mappings {
        if m.local_redirect_port > 0 {
            used.entry(m.local_redirect_port)
                .or_insert(m.client_id.as_str());
        }
    }

    let existing = mappings
        .iter()
        .find(|m| m.client_id == client_id && m.local_redirect_port > 0)
        .map_or(0, |m| m.local_redirect_port);

    if requested > 0 {
        if let Some(&owner) = used.get(&requested) {
            if owner != client_id {
                return Err(PortError::InUse(requested));
            }
        }
        return Ok(requested);
    }

    if existing > 0 {
        return Ok(existing);
    }

    (range.base..=range.max)
        .find(|p| !used.contains_key(p))
        .ok_or(PortError::Exhausted {
            base: range.base,
            max: range.max,
        })
}

/// Filesystem-observable registry of allocated ports
///
/// One empty file per active local redirect port, named after the port. The
/// control plane writes markers; the forwarder supervisor watches the
/// directory. Marker content is irrelevant; presence is the signal.
#[derive(Debug, Clone)]
pub struct PortRegistry {
    dir: PathBuf,
}

impl PortRegistry {
    /// Open (and create) the registry directory.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Registry`] when the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PortError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| PortError::Registry {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { dir })
    }

    fn marker(&self, port: u16) -> PathBuf {
        self.dir.join(port.to_string())
    }

    /// Ensure the marker for `port` exists (idempotent).
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Registry`] on I/O failure.
    pub fn ensure(&self, port: u16) -> Result<(), PortError> {
        let path = self.marker(port);
        if path.exists() {
            return Ok(());
        }
        std::fs::write(&path, []).map_err(|e| PortError::Registry {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(port, "port marker created");
        Ok(())
    }

    /// Remove the marker for `port` (missing markers are fine).
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Registry`] on I/O failure other than not-found.
    pub fn remove(&self, port: u16) -> Result<(), PortError> {
        let path = self.marker(port);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(port, "port marker removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PortError::Registry {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// List the ports that currently have markers, sorted ascending.
    ///
    /// Files that do not parse as ports are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Registry`] when the directory cannot be read.
    pub fn list(&self) -> Result<Vec<u16>, PortError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| PortError::Registry {
            path: self.dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut ports: Vec<u16> = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| entry.file_name().to_str().and_then(|n| n.parse().ok()))
            .collect();
        ports.sort_unstable();
        Ok(ports)
    }

    /// Registry directory path
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
