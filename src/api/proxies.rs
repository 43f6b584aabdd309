//! Proxy endpoints

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use tracing::info;

use super::auth::require_admin;
use super::error::ApiError;
use super::mappings::cleanup_after_removal;
use super::state::AppState;
use crate::auth::Role;
use crate::check::CheckResult;
use crate::model::Proxy;
use crate::store::Telemetry;

/// `GET /v1/proxies`: list, ordered by (host, port, id)
pub async fn list_proxies(State(state): State<Arc<AppState>>) -> Json<Vec<Proxy>> {
    let mut proxies = state.store.list_proxies();
    proxies.sort_by(|a, b| {
        a.host
            .cmp(&b.host)
            .then(a.port.cmp(&b.port))
            .then(a.id.cmp(&b.id))
    });
    Json(proxies)
}

/// `POST /v1/proxies`: create (admin)
pub async fn create_proxy(
    State(state): State<Arc<AppState>>,
    Extension(role): Extension<Role>,
    Json(proxy): Json<Proxy>,
) -> Result<(StatusCode, Json<Proxy>), ApiError> {
    require_admin(role)?;
    proxy
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let created = state.store.create_proxy(proxy);
    info!(proxy = %created.id, addr = %created.addr(), "proxy created");
    Ok((StatusCode::CREATED, Json(created)))
}

/// `POST /v1/proxies/{id}/check`: one-shot health probe (admin/agent)
pub async fn check_proxy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CheckResult>, ApiError> {
    let proxy = state
        .store
        .get_proxy(&id)
        .ok_or_else(|| ApiError::NotFound(format!("proxy not found: {id}")))?;

    let result = state.prober.probe(&proxy).await;
    state.store.set_proxy_telemetry(
        &id,
        Telemetry {
            status: result.status,
            latency_ms: result.latency_ms,
            exit_ip: result.exit_ip.clone(),
        },
    );

    Ok(Json(result))
}

/// `DELETE /v1/proxies/{id}`: delete with mapping cascade (admin)
pub async fn delete_proxy(
    State(state): State<Arc<AppState>>,
    Extension(role): Extension<Role>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_admin(role)?;

    let removed = state.store.delete_proxy(&id)?;
    info!(proxy = %id, cascaded = removed.len(), "proxy deleted");

    cleanup_after_removal(state, removed);
    Ok(StatusCode::NO_CONTENT)
}
