//! Client endpoints

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
use crate::model::{normalize_ipv4_host, Client};

/// `GET /v1/clients`: list, ordered by (ip_cidr, id)
pub async fn list_clients(State(state): State<Arc<AppState>>) -> Json<Vec<Client>> {
    let mut clients = state.store.list_clients();
    clients.sort_by(|a, b| a.ip_cidr.cmp(&b.ip_cidr).then(a.id.cmp(&b.id)));
    Json(clients)
}

/// `POST /v1/clients`: create with IPv4/32 normalisation (admin)
pub async fn create_client(
    State(state): State<Arc<AppState>>,
    Extension(role): Extension<Role>,
    Json(mut client): Json<Client>,
) -> Result<(StatusCode, Json<Client>), ApiError> {
    require_admin(role)?;

    client.ip_cidr = normalize_ipv4_host(&client.ip_cidr)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let created = state.store.create_client(client);
    info!(client = %created.id, ip = %created.ip_cidr, "client created");
    Ok((StatusCode::CREATED, Json(created)))
}

/// `DELETE /v1/clients/{id}`: delete with mapping cascade (admin)
pub async fn delete_client(
    State(state): State<Arc<AppState>>,
    Extension(role): Extension<Role>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_admin(role)?;

    let removed = state.store.delete_client(&id)?;
    info!(client = %id, cascaded = removed.len(), "client deleted");

    cleanup_after_removal(state, removed);
    Ok(StatusCode::NO_CONTENT)
}
