//! Client for the remote controller's status RPC.
//!
//! Every node in a deployment runs a controller agent exposing a small
//! JSON-over-HTTPS status interface on a fixed port, authenticated
//! with the deployment's shared secret. The bootstrap side treats the
//! agent as a black box behind this interface.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::layout::{NodeAddress, NodeRoleInfo};

/// Fixed status-RPC port on every node, distinct from SSH.
pub const STATUS_RPC_PORT: u16 = 17443;

/// Header carrying the deployment's shared secret.
const SECRET_HEADER: &str = "x-plinth-secret";

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Failures talking to a controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("controller request to {node} failed: {source}")]
    Http {
        node: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("controller on {node} returned {status}: {body}")]
    Status {
        node: String,
        status: u16,
        body: String,
    },

    #[error("controller on {node} rejected the request: {message}")]
    Rejected { node: String, message: String },

    #[error("role info from {node} does not cover {missing}")]
    IncompleteRoleInfo { node: String, missing: String },
}

/// The controller status interface.
#[async_trait]
pub trait StatusApi: Send + Sync {
    /// All public addresses participating in the deployment.
    async fn get_all_public_ips(
        &self,
        node: &NodeAddress,
    ) -> Result<Vec<NodeAddress>, ControllerError>;

    /// Role assignments for every node.
    async fn get_role_info(&self, node: &NodeAddress)
        -> Result<Vec<NodeRoleInfo>, ControllerError>;

    /// Whether this node has finished its local initialization.
    async fn is_done_initializing(&self, node: &NodeAddress) -> Result<bool, ControllerError>;

    /// Register a platform user account. Returns whether the
    /// controller accepted it.
    async fn commit_new_user(
        &self,
        node: &NodeAddress,
        email: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<bool, ControllerError>;
}

#[derive(Serialize)]
struct CommitUserRequest<'a> {
    email: &'a str,
    password_hash: &'a str,
    role: &'a str,
}

/// HTTPS implementation of [`StatusApi`].
pub struct ControllerClient {
    client: reqwest::Client,
    secret: String,
    scheme: &'static str,
    port: u16,
}

impl ControllerClient {
    /// Client for production deployments: HTTPS to the fixed status
    /// port. Controllers present the deployment's self-signed
    /// certificate, so verification against public roots is disabled.
    pub fn new(secret: impl Into<String>) -> Self {
        Self::with_endpoint(secret, "https", STATUS_RPC_PORT)
    }

    /// Client with an explicit scheme and port (dev deployments,
    /// tests).
    pub fn with_endpoint(secret: impl Into<String>, scheme: &'static str, port: u16) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            secret: secret.into(),
            scheme,
            port,
        }
    }

    fn url(&self, node: &NodeAddress, path: &str) -> String {
        format!("{}://{}:{}{}", self.scheme, node, self.port, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        node: &NodeAddress,
        path: &str,
    ) -> Result<T, ControllerError> {
        let url = self.url(node, path);
        debug!(url = %url, "Controller status request");

        let response = self
            .client
            .get(&url)
            .header(SECRET_HEADER, &self.secret)
            .send()
            .await
            .map_err(|e| ControllerError::Http {
                node: node.to_string(),
                source: e,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ControllerError::Status {
                node: node.to_string(),
                status,
                body,
            });
        }

        response.json().await.map_err(|e| ControllerError::Http {
            node: node.to_string(),
            source: e,
        })
    }
}

#[async_trait]
impl StatusApi for ControllerClient {
    async fn get_all_public_ips(
        &self,
        node: &NodeAddress,
    ) -> Result<Vec<NodeAddress>, ControllerError> {
        self.get_json(node, "/v1/public-ips").await
    }

    async fn get_role_info(
        &self,
        node: &NodeAddress,
    ) -> Result<Vec<NodeRoleInfo>, ControllerError> {
        self.get_json(node, "/v1/roles").await
    }

    async fn is_done_initializing(&self, node: &NodeAddress) -> Result<bool, ControllerError> {
        self.get_json(node, "/v1/initialized").await
    }

    async fn commit_new_user(
        &self,
        node: &NodeAddress,
        email: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<bool, ControllerError> {
        let url = self.url(node, "/v1/users");
        debug!(url = %url, email = %email, role = %role, "Committing new user");

        let response = self
            .client
            .post(&url)
            .header(SECRET_HEADER, &self.secret)
            .json(&CommitUserRequest {
                email,
                password_hash,
                role,
            })
            .send()
            .await
            .map_err(|e| ControllerError::Http {
                node: node.to_string(),
                source: e,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ControllerError::Status {
                node: node.to_string(),
                status,
                body,
            });
        }

        response.json().await.map_err(|e| ControllerError::Http {
            node: node.to_string(),
            source: e,
        })
    }
}
