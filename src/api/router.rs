//! Control-plane router assembly

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tracing::info;

use super::auth::{auth_middleware, login};
use super::clients::{create_client, delete_client, list_clients};
use super::mappings::{create_mapping, delete_mapping, list_mappings, write_mapping_state};
use super::proxies::{check_proxy, create_proxy, delete_proxy, list_proxies};
use super::state::AppState;

async fn health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Build the control-plane router.
///
/// `/v1/health` and `/v1/auth/login` are public; everything else requires a
/// bearer credential resolved by the auth middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/v1/proxies", get(list_proxies).post(create_proxy))
        .route("/v1/proxies/:id", delete(delete_proxy))
        .route("/v1/proxies/:id/check", post(check_proxy))
        .route("/v1/clients", get(list_clients).post(create_client))
        .route("/v1/clients/:id", delete(delete_client))
        .route("/v1/mappings", get(list_mappings).post(create_mapping))
        .route("/v1/mappings/state/:id", post(write_mapping_state))
        .route("/v1/mappings/:id", delete(delete_mapping))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ));

    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/auth/login", post(login))
        .merge(protected)
        .with_state(state)
}

/// Serve the control plane on `addr` until the process exits.
///
/// # Errors
///
/// Returns `std::io::Error` when the address cannot be bound.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "control plane listening");
    axum::serve(listener, build_router(state)).await
}
