//! HTTP clients between the gateway processes
//!
//! [`ApiClient`] is how the reconciler and the forwarders talk to the
//! control plane (agent-role bearer token). [`AgentClient`] is how the
//! control plane kicks the reconciler's synchronous trigger endpoint.

use std::time::Duration;

use serde::Serialize;

use crate::error::ClientError;
use crate::model::{MappingState, MappingView};

/// Default request deadline for control-plane calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The reconcile trigger waits for a full teardown/apply cycle
const RECONCILE_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for the control-plane REST API
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Serialize)]
struct StateWrite {
    state: MappingState,
    local_redirect_port: u16,
}

impl ApiClient {
    /// Create a client for `base_url` authenticating with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the underlying client cannot
    /// be built.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, ClientError> {
        let base_url = base_url.into();
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("pgw/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Transport {
                url: base_url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Fetch the current mapping views.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure, a non-2xx status, or an
    /// undecodable body.
    pub async fn list_mappings(&self) -> Result<Vec<MappingView>, ClientError> {
        let url = format!("{}/v1/mappings", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ClientError::Transport {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(|e| ClientError::Decode {
            url,
            reason: e.to_string(),
        })
    }

    /// Write a mapping's state (APPLIED/FAILED report from the reconciler).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or a non-2xx status.
    pub async fn set_mapping_state(
        &self,
        id: &str,
        state: MappingState,
        local_redirect_port: u16,
    ) -> Result<(), ClientError> {
        let url = format!("{}/v1/mappings/state/{id}", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&StateWrite {
                state,
                local_redirect_port,
            })
            .send()
            .await
            .map_err(|e| ClientError::Transport {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Client for the reconciler's trigger endpoint
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
}

impl AgentClient {
    /// Create a trigger client for the agent at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the underlying client cannot
    /// be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let base_url = base_url.into();
        let http = reqwest::Client::builder()
            .timeout(RECONCILE_TIMEOUT)
            .user_agent(concat!("pgw/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Transport {
                url: base_url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Run one reconcile cycle; returns once the rule apply completed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Status`] when the cycle failed (500 with error
    /// text) and [`ClientError::Transport`] when the agent is unreachable.
    pub async fn reconcile(&self) -> Result<(), ClientError> {
        let url = format!("{}/agent/reconcile", self.base_url);
        let response =
            self.http
                .post(&url)
                .send()
                .await
                .map_err(|e| ClientError::Transport {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
