//! HTTP client for the mesh control plane: mixer (policy), pilot (routing
//! config), and the service-graph snapshot API.

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::warn;

use meshvoice_core::config::MeshConfig;

use crate::types::{RouteRule, RuleSet, Topology};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{operation} request failed: {source}")]
    Transport { operation: &'static str, source: reqwest::Error },
    #[error("{operation} returned non-success status {status}")]
    Status { operation: &'static str, status: StatusCode },
    #[error("{operation} response could not be decoded: {source}")]
    Decode { operation: &'static str, source: reqwest::Error },
}

/// The seam the intent dispatcher depends on. `IstioClient` is the production
/// implementation; tests substitute recording fakes.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Removes the subject's rule set, restoring default-allow.
    async fn grant_access(&self, to: &str, from: &str) -> Result<(), ClientError>;
    /// Replaces the subject's rule set with a single denial of `from`.
    async fn deny_access(&self, to: &str, from: &str) -> Result<(), ClientError>;
    /// Fetches the routing rule for a named service.
    async fn route_rule(&self, service: &str) -> Result<RouteRule, ClientError>;
    /// Fetches the full service-graph snapshot.
    async fn topology(&self) -> Result<Topology, ClientError>;
}

/// Stateless control-plane client: connection targets and credentials only,
/// immutable after construction and safe to share across requests.
pub struct IstioClient {
    http: reqwest::Client,
    config_api_service: String,
    mixer_api_service: String,
    servicegraph_api_service: String,
    username: String,
    password: SecretString,
}

impl IstioClient {
    pub fn new(mesh: &MeshConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config_api_service: mesh.config_api_service.clone(),
            mixer_api_service: mesh.mixer_api_service.clone(),
            servicegraph_api_service: mesh.servicegraph_api_service.clone(),
            username: mesh.username.clone(),
            password: mesh.password.clone(),
        }
    }

    // The `<to>.default.svc.cluster.local` subject naming is a mixer API
    // convention, not local logic.
    fn subject_rules_url(&self, to: &str) -> String {
        format!(
            "http://{}/api/v1/scopes/global/subjects/{to}.default.svc.cluster.local/rules",
            self.mixer_api_service
        )
    }

    fn ensure_success(
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if !status.is_success() {
            warn!(operation, status = %status, "control-plane call returned non-success status");
            return Err(ClientError::Status { operation, status });
        }
        Ok(response)
    }
}

#[async_trait]
impl ControlPlane for IstioClient {
    async fn grant_access(&self, to: &str, _from: &str) -> Result<(), ClientError> {
        const OPERATION: &str = "grant-access";

        let response = self
            .http
            .delete(self.subject_rules_url(to))
            .send()
            .await
            .map_err(|source| ClientError::Transport { operation: OPERATION, source })?;

        Self::ensure_success(OPERATION, response).map(|_| ())
    }

    async fn deny_access(&self, to: &str, from: &str) -> Result<(), ClientError> {
        const OPERATION: &str = "deny-access";

        let response = self
            .http
            .put(self.subject_rules_url(to))
            .json(&RuleSet::deny_from(from))
            .send()
            .await
            .map_err(|source| ClientError::Transport { operation: OPERATION, source })?;

        Self::ensure_success(OPERATION, response).map(|_| ())
    }

    async fn route_rule(&self, service: &str) -> Result<RouteRule, ClientError> {
        const OPERATION: &str = "get-route-rule";

        let url = format!(
            "http://{}/v1alpha1/config/route-rule/default/{service}-default",
            self.config_api_service
        );
        let response = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .send()
            .await
            .map_err(|source| ClientError::Transport { operation: OPERATION, source })?;

        Self::ensure_success(OPERATION, response)?
            .json::<RouteRule>()
            .await
            .map_err(|source| ClientError::Decode { operation: OPERATION, source })
    }

    async fn topology(&self) -> Result<Topology, ClientError> {
        const OPERATION: &str = "get-topology";

        let url = format!("http://{}/graph", self.servicegraph_api_service);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| ClientError::Transport { operation: OPERATION, source })?;

        Self::ensure_success(OPERATION, response)?
            .json::<Topology>()
            .await
            .map_err(|source| ClientError::Decode { operation: OPERATION, source })
    }
}
