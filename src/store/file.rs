//! Durable file store backend
//!
//! The whole state is one JSON document written with temp-file + rename so a
//! crash mid-write never leaves a torn file. Durability is best-effort: a
//! failed save is logged and the in-memory mutation stands; the reconciler
//! is the source of truth for rule state, not the document.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::model::{Client, Mapping, MappingState, MappingView, Proxy};

use super::{
    create_client_in, create_mapping_in, create_proxy_in, delete_client_in, delete_proxy_in,
    mapping_views, set_proxy_telemetry_in, update_mapping_state_in, State, Store, Telemetry,
};

/// JSON-file-backed store
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: RwLock<State>,
}

impl FileStore {
    /// Open a file store, loading existing state or starting empty.
    ///
    /// The parent directory is created if missing. A fresh empty document is
    /// written immediately so the path is valid from the first read.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Persist` when the parent directory cannot be
    /// created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Persist(format!("mkdir {}: {e}", parent.display())))?;
        }

        let state = match Self::load(&path) {
            Ok(state) => {
                debug!(
                    path = %path.display(),
                    proxies = state.proxies.len(),
                    clients = state.clients.len(),
                    mappings = state.mappings.len(),
                    "loaded store"
                );
                state
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "starting with empty store");
                let state = State::default();
                save_best_effort(&path, &state);
                state
            }
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    fn load(path: &Path) -> Result<State, StoreError> {
        let bytes = std::fs::read(path).map_err(|e| StoreError::Persist(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Persist(e.to_string()))
    }

    /// Run a mutation under the write lock, then persist best-effort.
    fn mutate<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.write();
        let out = f(&mut state);
        save_best_effort(&self.path, &state);
        out
    }
}

/// Atomic replace: write the document to `<path>.tmp`, then rename over.
fn save_best_effort(path: &Path, state: &State) {
    if let Err(e) = save(path, state) {
        warn!(path = %path.display(), error = %e, "store persistence failed");
    }
}

fn save(path: &Path, state: &State) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    let bytes =
        serde_json::to_vec_pretty(state).map_err(|e| StoreError::Persist(e.to_string()))?;
    std::fs::write(&tmp, bytes).map_err(|e| StoreError::Persist(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| StoreError::Persist(e.to_string()))
}

impl Store for FileStore {
    fn list_proxies(&self) -> Vec<Proxy> {
        self.state.read().proxies.values().cloned().collect()
    }

    fn get_proxy(&self, id: &str) -> Option<Proxy> {
        self.state.read().proxies.get(id).cloned()
    }

    fn create_proxy(&self, proxy: Proxy) -> Proxy {
        self.mutate(|s| create_proxy_in(s, proxy))
    }

    fn delete_proxy(&self, id: &str) -> Result<Vec<Mapping>, StoreError> {
        self.mutate(|s| delete_proxy_in(s, id))
    }

    fn list_clients(&self) -> Vec<Client> {
        self.state.read().clients.values().cloned().collect()
    }

    fn get_client(&self, id: &str) -> Option<Client> {
        self.state.read().clients.get(id).cloned()
    }

    fn create_client(&self, client: Client) -> Client {
        self.mutate(|s| create_client_in(s, client))
    }

    fn delete_client(&self, id: &str) -> Result<Vec<Mapping>, StoreError> {
        self.mutate(|s| delete_client_in(s, id))
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
        self.mutate(|s| create_mapping_in(s, mapping))
    }

    fn delete_mapping(&self, id: &str) -> Result<Mapping, StoreError> {
        self.mutate(|s| {
            s.mappings
                .remove(id)
                .ok_or_else(|| StoreError::not_found("mapping", id))
        })
    }

    fn update_mapping_state(
        &self,
        id: &str,
        state: MappingState,
        local_port: u16,
    ) -> Result<(), StoreError> {
        self.mutate(|s| update_mapping_state_in(s, id, state, local_port))
    }

    fn set_proxy_telemetry(&self, id: &str, telemetry: Telemetry) {
        self.mutate(|s| set_proxy_telemetry_in(s, id, &telemetry));
    }
}
