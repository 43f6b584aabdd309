//! Entity store
//!
//! Concurrency-safe CRUD over the three entity sets with two backends:
//! a volatile in-memory store and a durable JSON-file store with atomic
//! replace. Writers serialise under an internal lock; readers observe a
//! consistent snapshot.
//!
//! Cascades happen inside the writer critical section: deleting a proxy or
//! client removes its mappings atomically, and the removed mappings are
//! returned so callers can release ports and stop forwarders.

mod file;
mod memory;

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Client, Mapping, MappingState, MappingView, Proxy, ProxyStatus};

pub use file::FileStore;
pub use memory::MemoryStore;

/// The persisted/held document: all three entity sets keyed by ID
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct State {
    /// Upstream proxies
    #[serde(default)]
    pub proxies: HashMap<String, Proxy>,
    /// LAN clients
    #[serde(default)]
    pub clients: HashMap<String, Client>,
    /// Client-to-proxy mappings
    #[serde(default)]
    pub mappings: HashMap<String, Mapping>,
}

/// Telemetry update for a proxy; zero latency / empty exit IP clear fields
#[derive(Debug, Clone)]
pub struct Telemetry {
    /// New advisory status
    pub status: ProxyStatus,
    /// Observed latency in milliseconds (0 clears)
    pub latency_ms: u64,
    /// Observed egress IP (empty clears)
    pub exit_ip: String,
}

/// Concurrency-safe entity store
///
/// Both backends go through the same mutation code over [`State`]; the file
/// backend additionally persists after each write.
pub trait Store: Send + Sync {
    /// List all proxies (unordered; callers sort)
    fn list_proxies(&self) -> Vec<Proxy>;

    /// Fetch one proxy
    fn get_proxy(&self, id: &str) -> Option<Proxy>;

    /// Create a proxy, assigning an ID when empty. Status is forced DOWN.
    fn create_proxy(&self, proxy: Proxy) -> Proxy;

    /// Delete a proxy, cascading to its mappings. Returns the removed
    /// mappings.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` when the ID does not exist.
    fn delete_proxy(&self, id: &str) -> Result<Vec<Mapping>, StoreError>;

    /// List all clients (unordered; callers sort)
    fn list_clients(&self) -> Vec<Client>;

    /// Fetch one client
    fn get_client(&self, id: &str) -> Option<Client>;

    /// Create a client, assigning an ID when empty
    fn create_client(&self, client: Client) -> Client;

    /// Delete a client, cascading to its mappings. Returns the removed
    /// mappings.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` when the ID does not exist.
    fn delete_client(&self, id: &str) -> Result<Vec<Mapping>, StoreError>;

    /// List mapping views, most-recently-applied first; never-applied
    /// mappings sort last by ID
    fn list_mappings(&self) -> Vec<MappingView>;

    /// List raw mapping records (port allocation, uniqueness checks)
    fn list_mapping_records(&self) -> Vec<Mapping>;

    /// Fetch one mapping record
    fn get_mapping(&self, id: &str) -> Option<Mapping>;

    /// Create a mapping with `state = PENDING`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::MissingReference` when the referenced client or
    /// proxy is absent.
    fn create_mapping(&self, mapping: Mapping) -> Result<MappingView, StoreError>;

    /// Delete one mapping.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` when the ID does not exist.
    fn delete_mapping(&self, id: &str) -> Result<Mapping, StoreError>;

    /// Update a mapping's state (idempotent). APPLIED/FAILED stamp
    /// `last_applied_at`; a positive `local_port` updates the port.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` when the ID does not exist.
    fn update_mapping_state(
        &self,
        id: &str,
        state: MappingState,
        local_port: u16,
    ) -> Result<(), StoreError>;

    /// Update a proxy's advisory telemetry. Unknown IDs are ignored.
    fn set_proxy_telemetry(&self, id: &str, telemetry: Telemetry);
}

// ---------------------------------------------------------------------------
// Mutation helpers shared by both backends
// ---------------------------------------------------------------------------

pub(crate) fn create_proxy_in(state: &mut State, mut proxy: Proxy) -> Proxy {
    if proxy.id.is_empty() {
        proxy.id = Uuid::new_v4().to_string();
    }
    proxy.status = ProxyStatus::Down;
    state.proxies.insert(proxy.id.clone(), proxy.clone());
    proxy
}

pub(crate) fn delete_proxy_in(state: &mut State, id: &str) -> Result<Vec<Mapping>, StoreError> {
    if state.proxies.remove(id).is_none() {
        return Err(StoreError::not_found("proxy", id));
    }
    let removed_ids: Vec<String> = state
        .mappings
        .values()
        .filter(|m| m.proxy_id == id)
        .map(|m| m.id.clone())
        .collect();
    Ok(removed_ids
        .into_iter()
        .filter_map(|mid| state.mappings.remove(&mid))
        .collect())
}

pub(crate) fn create_client_in(state: &mut State, mut client: Client) -> Client {
    if client.id.is_empty() {
        client.id = Uuid::new_v4().to_string();
    }
    state.clients.insert(client.id.clone(), client.clone());
    client
}

pub(crate) fn delete_client_in(state: &mut State, id: &str) -> Result<Vec<Mapping>, StoreError> {
    if state.clients.remove(id).is_none() {
        return Err(StoreError::not_found("client", id));
    }
    let removed_ids: Vec<String> = state
        .mappings
        .values()
        .filter(|m| m.client_id == id)
        .map(|m| m.id.clone())
        .collect();
    Ok(removed_ids
        .into_iter()
        .filter_map(|mid| state.mappings.remove(&mid))
        .collect())
}

pub(crate) fn create_mapping_in(
    state: &mut State,
    mut mapping: Mapping,
) -> Result<MappingView, StoreError> {
    let Some(client) = state.clients.get(&mapping.client_id) else {
        return Err(StoreError::MissingReference(format!(
            "client {} does not exist",
            mapping.client_id
        )));
    };
    let Some(proxy) = state.proxies.get(&mapping.proxy_id) else {
        return Err(StoreError::MissingReference(format!(
            "proxy {} does not exist",
            mapping.proxy_id
        )));
    };
    if mapping.id.is_empty() {
        mapping.id = Uuid::new_v4().to_string();
    }
    mapping.state = MappingState::Pending;

    let view = MappingView {
        id: mapping.id.clone(),
        client: client.clone(),
        proxy: proxy.clone(),
        state: mapping.state,
        local_redirect_port: mapping.local_redirect_port,
    };
    state.mappings.insert(mapping.id.clone(), mapping);
    Ok(view)
}

pub(crate) fn update_mapping_state_in(
    state: &mut State,
    id: &str,
    new_state: MappingState,
    local_port: u16,
) -> Result<(), StoreError> {
    let mapping = state
        .mappings
        .get_mut(id)
        .ok_or_else(|| StoreError::not_found("mapping", id))?;
    mapping.state = new_state;
    if matches!(new_state, MappingState::Applied | MappingState::Failed) {
        mapping.last_applied_at = Some(Utc::now());
    }
    if local_port > 0 {
        mapping.local_redirect_port = local_port;
    }
    Ok(())
}

pub(crate) fn set_proxy_telemetry_in(state: &mut State, id: &str, telemetry: &Telemetry) {
    let Some(proxy) = state.proxies.get_mut(id) else {
        return;
    };
    proxy.status = telemetry.status;
    proxy.latency_ms = (telemetry.latency_ms > 0).then_some(telemetry.latency_ms);
    proxy.exit_ip = (!telemetry.exit_ip.is_empty()).then(|| telemetry.exit_ip.clone());
    proxy.last_checked_at = Some(Utc::now());
}

/// Build sorted mapping views from a state snapshot.
///
/// Views whose client or proxy record is missing are skipped. Ordering:
/// most-recently-applied first, then never-applied mappings by ID.
pub(crate) fn mapping_views(state: &State) -> Vec<MappingView> {
    let mut rows: Vec<(&Mapping, MappingView)> = state
        .mappings
        .values()
        .filter_map(|m| {
            let client = state.clients.get(&m.client_id)?;
            let proxy = state.proxies.get(&m.proxy_id)?;
            Some((
                m,
                MappingView {
                    id: m.id.clone(),
                    client: client.clone(),
                    proxy: proxy.clone(),
                    state: m.state,
                    local_redirect_port: m.local_redirect_port,
                },
            ))
        })
        .collect();

    rows.sort_by(|(a, av), (b, bv)| match (a.last_applied_at, b.last_applied_at) {
        (Some(ta), Some(tb)) => tb.cmp(&ta),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => av.id.cmp(&bv.id),
    });

    rows.into_iter().map(|(_, v)| v).collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::model::ProxyKind;

    /// Proxy fixture with a given ID
    pub fn proxy(id: &str) -> Proxy {
        Proxy {
            id: id.into(),
            label: None,
            kind: ProxyKind::Http,
            host: "10.0.0.2".into(),
            port: 3128,
            username: None,
            password: None,
            enabled: true,
            status: ProxyStatus::Down,
            latency_ms: None,
            exit_ip: None,
            last_checked_at: None,
        }
    }

    /// Client fixture with a given ID and address
    pub fn client(id: &str, ip_cidr: &str) -> Client {
        Client {
            id: id.into(),
            ip_cidr: ip_cidr.into(),
            note: String::new(),
            enabled: true,
        }
    }

    /// Mapping fixture binding a client to a proxy
    pub fn mapping(id: &str, client_id: &str, proxy_id: &str, port: u16) -> Mapping {
        Mapping {
            id: id.into(),
            client_id: client_id.into(),
            proxy_id: proxy_id.into(),
            protocol: ProxyKind::Http,
            local_redirect_port: port,
            state: MappingState::Pending,
            last_applied_at: None,
        }
    }
}
