//! In-memory store backend

use parking_lot::RwLock;

use crate::error::StoreError;
use crate::model::{Client, Mapping, MappingState, MappingView, Proxy};

use super::{
    create_client_in, create_mapping_in, create_proxy_in, delete_client_in, delete_proxy_in,
    mapping_views, set_proxy_telemetry_in, update_mapping_state_in, State, Store, Telemetry,
};

/// Volatile store; state lives only for the process lifetime
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Create an empty in-memory store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a state snapshot (tests, tooling)
    #[must_use]
    pub fn with_state(state: State) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }
}

impl Store for MemoryStore {
    fn list_proxies(&self) -> Vec<Proxy> {
        self.state.read().proxies.values().cloned().collect()
    }

    fn get_proxy(&self, id: &str) -> Option<Proxy> {
        self.state.read().proxies.get(id).cloned()
    }

    fn create_proxy(&self, proxy: Proxy) -> Proxy {
        create_proxy_in(&mut self.state.write(), proxy)
    }

    fn delete_proxy(&self, id: &str) -> Result<Vec<Mapping>, StoreError> {
        delete_proxy_in(&mut self.state.write(), id)
    }

    fn list_clients(&self) -> Vec<Client> {
        self.state.read().clients.values().cloned().collect()
    }

    fn get_client(&self, id: &str) -> Option<Client> {
        self.state.read().clients.get(id).cloned()
    }

    fn create_client(&self, client: Client) -> Client {
        create_client_in(&mut self.state.write(), client)
    }

    fn delete_client(&self, id: &str) -> Result<Vec<Mapping>, StoreError> {
        delete_client_in(&mut self.state.write(), id)
    }

    fn list_mappings(&self) -> Vec<MappingView> {
        mapping_views(&self.state.read())
    }

    fn list_mapping_records(&self) -> Vec<Mapping> {
        self.state.read().mappings.values().cloned().collect()
    }

    fn get_mapping(&self, id: &str) -> Option<Mapping> {
        self.state.read().mappings.get(id).cloned()
    }

    fn create_mapping(&self, mapping: Mapping) -> Result<MappingView, StoreError> {
        create_mapping_in(&mut self.state.write(), mapping)
    }

    fn delete_mapping(&self, id: &str) -> Result<Mapping, StoreError> {
        self.state
            .write()
            .mappings
            .remove(id)
            .ok_or_else(|| StoreError::not_found("mapping", id))
    }

    fn update_mapping_state(
        &self,
        id: &str,
        state: MappingState,
        local_port: u16,
    ) -> Result<(), StoreError> {
        update_mapping_state_in(&mut self.state.write(), id, state, local_port)
    }

    fn set_proxy_telemetry(&self, id: &str, telemetry: Telemetry) {
        set_proxy_telemetry_in(&mut self.state.write(), id, &telemetry);
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{client, mapping, proxy};
    use super::*;

    #[test]
    fn test_crud_through_trait() {
        let store = MemoryStore::new();
        let p = store.create_proxy(proxy(""));
        let c = store.create_client(client("", "192.168.2.3/32"));

        let view = store
            .create_mapping(mapping("", &c.id, &p.id, 15001))
            .unwrap();
        assert_eq!(view.local_redirect_port, 15001);
        assert_eq!(store.list_mappings().len(), 1);

        let removed = store.delete_client(&c.id).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(store.list_mappings().is_empty());
    }

    #[test]
    fn test_delete_mapping_not_found() {
        let store = MemoryStore::new();
        assert!(store.delete_mapping("missing").is_err());
    }
}
