//! Reconcile trigger endpoint
//!
//! `GET|POST /agent/reconcile` runs one cycle synchronously and answers
//! `200 ok` once the rule apply completed, or `500` with the error text.
//! Callers can therefore sample derived state immediately after the call
//! returns, without a timing delay.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tracing::info;

use super::Reconciler;

/// Build the trigger router around a shared reconciler.
pub fn trigger_router(reconciler: Arc<Reconciler>) -> Router {
    Router::new()
        .route("/agent/reconcile", get(reconcile).post(reconcile))
        .with_state(reconciler)
}

async fn reconcile(State(reconciler): State<Arc<Reconciler>>) -> (StatusCode, String) {
    match reconciler.run().await {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Serve the trigger endpoint on `addr` until the process exits.
///
/// # Errors
///
/// Returns `std::io::Error` when the address cannot be bound.
pub async fn serve(addr: SocketAddr, reconciler: Arc<Reconciler>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "agent trigger endpoint listening");
    axum::serve(listener, trigger_router(reconciler)).await
}
