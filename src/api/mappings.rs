//! Mapping endpoints and the convergence choreography
//!
//! Creating a mapping allocates (or reuses) the client's redirect port,
//! persists the record, eagerly probes the upstream, hands the port to the
//! forwarder supervisor, and kicks the reconciler. Deletions capture the
//! port first, then release it asynchronously once no surviving mapping
//! uses it. The reconciler stays the single writer of the filter tables:
//! deletion paths never touch nft themselves, they only trigger a cycle.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::auth::require_admin;
use super::derive::derive_view_state;
use super::error::ApiError;
use super::state::AppState;
use crate::auth::Role;
use crate::model::{Mapping, MappingState, MappingView, ProxyKind};
use crate::ports::choose_port_for_client;
use crate::store::Telemetry;

/// `GET /v1/mappings`: list with derived state, sorted by client IPv4
pub async fn list_mappings(State(state): State<Arc<AppState>>) -> Json<Vec<MappingView>> {
    let mut views = state.store.list_mappings();

    let nat_dump = state.nat_probe.dump_nat().await;
    for view in &mut views {
        view.state = derive_view_state(view, nat_dump.as_deref()).await;
    }

    views.sort_by_key(|v| (v.client.ipv4(), v.id.clone()));
    Json(views)
}

/// `POST /v1/mappings`: create (admin)
pub async fn create_mapping(
    State(state): State<Arc<AppState>>,
    Extension(role): Extension<Role>,
    Json(mut mapping): Json<Mapping>,
) -> Result<(StatusCode, Json<MappingView>), ApiError> {
    require_admin(role)?;

    let records = state.store.list_mapping_records();

    // One proxy, one mapping
    if records.iter().any(|m| m.proxy_id == mapping.proxy_id) {
        return Err(ApiError::Conflict("proxy already mapped".into()));
    }

    let port = choose_port_for_client(
        &records,
        &mapping.client_id,
        mapping.local_redirect_port,
        state.port_range(),
    )?;
    mapping.local_redirect_port = port;

    let mut view = state.store.create_mapping(mapping)?;
    info!(mapping = %view.id, port, "mapping created");

    // Eager upstream probe (HTTP proxies in the minimal core). A dead
    // upstream fails the mapping and downs the proxy, but the mapping is
    // still returned; the operator sees the verdict on the record itself.
    if view.proxy.kind == ProxyKind::Http {
        let result = state.prober.probe(&view.proxy).await;
        if result.status == crate::model::ProxyStatus::Down {
            warn!(mapping = %view.id, proxy = %view.proxy.id, "eager probe failed");
            let _ = state
                .store
                .update_mapping_state(&view.id, MappingState::Failed, port);
            state.store.set_proxy_telemetry(
                &view.proxy.id,
                Telemetry {
                    status: result.status,
                    latency_ms: result.latency_ms,
                    exit_ip: result.exit_ip,
                },
            );
            view.state = MappingState::Failed;
        }
    }

    if let Err(e) = state.registry.ensure(port) {
        warn!(port, error = %e, "port marker write failed");
    }
    state.supervisor.start(port).await;

    // Reconcile and re-derive off the request path; the trigger endpoint is
    // synchronous, so no settle delay is needed before sampling evidence.
    let converge_state = Arc::clone(&state);
    let mapping_id = view.id.clone();
    tokio::spawn(async move {
        converge_mapping(&converge_state, &mapping_id, port).await;
    });

    Ok((StatusCode::CREATED, Json(view)))
}

/// Request body for the state write endpoint
#[derive(Debug, Deserialize)]
pub struct StateWrite {
    /// New state
    pub state: MappingState,
    /// Port to record (0 leaves the stored port untouched)
    #[serde(default)]
    pub local_redirect_port: u16,
}

/// `POST /v1/mappings/state/{id}`: explicit state write (admin/agent)
pub async fn write_mapping_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<StateWrite>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .update_mapping_state(&id, body.state, body.local_redirect_port)?;
    debug!(mapping = %id, new_state = ?body.state, "state written");
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /v1/mappings/{id}`: delete and clean up (admin)
pub async fn delete_mapping(
    State(state): State<Arc<AppState>>,
    Extension(role): Extension<Role>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_admin(role)?;

    let removed = state.store.delete_mapping(&id)?;
    info!(mapping = %id, port = removed.local_redirect_port, "mapping deleted");

    cleanup_after_removal(state, vec![removed]);
    Ok(StatusCode::NO_CONTENT)
}

/// Run the reconciler and persist APPLIED if the observable evidence agrees.
async fn converge_mapping(state: &AppState, mapping_id: &str, port: u16) {
    if let Err(e) = state.agent.reconcile().await {
        warn!(mapping = %mapping_id, error = %e, "reconcile trigger failed");
        return;
    }

    let Some(view) = state
        .store
        .list_mappings()
        .into_iter()
        .find(|v| v.id == mapping_id)
    else {
        return;
    };

    let nat_dump = state.nat_probe.dump_nat().await;
    if derive_view_state(&view, nat_dump.as_deref()).await == MappingState::Applied {
        if let Err(e) = state
            .store
            .update_mapping_state(mapping_id, MappingState::Applied, port)
        {
            warn!(mapping = %mapping_id, error = %e, "state persist failed");
        }
    }
}

/// Asynchronous cleanup after mappings were removed (directly or by
/// cascade): release ports no survivor uses, stop their forwarders, and run
/// one reconcile so the tables match the new mapping set.
pub(super) fn cleanup_after_removal(state: Arc<AppState>, removed: Vec<Mapping>) {
    let ports: BTreeSet<u16> = removed
        .into_iter()
        .map(|m| m.local_redirect_port)
        .filter(|&p| p > 0)
        .collect();

    tokio::spawn(async move {
        let surviving: BTreeSet<u16> = state
            .store
            .list_mapping_records()
            .into_iter()
            .map(|m| m.local_redirect_port)
            .collect();

        for port in ports {
            if surviving.contains(&port) {
                continue;
            }
            if let Err(e) = state.registry.remove(port) {
                warn!(port, error = %e, "port marker removal failed");
            }
            state.supervisor.stop(port).await;
            debug!(port, "port released");
        }

        if let Err(e) = state.agent.reconcile().await {
            warn!(error = %e, "reconcile after removal failed");
        }
    });
}
