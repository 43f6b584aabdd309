//! Control-plane REST API
//!
//! Owns the entities, port allocation, mapping lifecycle, health telemetry,
//! and derived state. Mutations drive the convergence loop: persist, hand
//! the port to the forwarder supervisor, trigger the reconciler, sample the
//! observable evidence.

mod auth;
mod clients;
pub mod derive;
mod error;
mod mappings;
mod proxies;
mod router;
mod state;

pub use auth::{LoginRequest, LoginResponse};
pub use derive::{nat_rule_present, port_ok, NatProbe, NftNatProbe};
pub use error::ApiError;
pub use router::{build_router, serve};
pub use state::AppState;
