//! Credential distribution.
//!
//! Pushes the deployment's secrets onto a target node: the shared
//! secret, the SSH private key, and (for TLS deployments) the
//! self-signed certificate pair. Distribution is all-or-nothing: the
//! first failed transfer aborts the sequence and callers must treat
//! any partial result as total failure.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use plinth_remote::RemoteExec;
use tracing::info;

use crate::config::{INSTALL_ROOT, REMOTE_STATE_DIR};
use crate::error::BootstrapError;
use crate::layout::{NodeAddress, NodeRoleInfo};
use crate::local::LocalState;

/// Timeout for one file transfer or remote mkdir.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(5);

/// Remote directory for TLS material.
const REMOTE_CERT_DIR: &str = "/etc/plinth/certs";

/// Cloud-specific subdirectory the controller reads its pair from.
const CLOUD_CERT_SUBDIR: &str = "cloud1";

pub struct CredentialDistributor {
    exec: Arc<dyn RemoteExec>,
    local: LocalState,
}

impl CredentialDistributor {
    pub fn new(exec: Arc<dyn RemoteExec>, local: LocalState) -> Self {
        Self { exec, local }
    }

    /// Push the shared secret, SSH key, and (optionally) TLS material
    /// to `node`.
    pub async fn copy_deployment_credentials(
        &self,
        node: &NodeAddress,
        keyname: &str,
        use_tls: bool,
    ) -> Result<(), BootstrapError> {
        self.transfer(
            node,
            &self.local.secret_path(keyname),
            &format!("{INSTALL_ROOT}/secret.key"),
        )
        .await?;

        self.transfer(
            node,
            &self.local.ssh_key_path(keyname),
            &format!("{INSTALL_ROOT}/ssh.key"),
        )
        .await?;

        if use_tls {
            self.copy_tls_material(node, keyname).await?;
        }

        info!(node = %node, keyname = %keyname, use_tls, "Deployment credentials copied");
        Ok(())
    }

    async fn copy_tls_material(
        &self,
        node: &NodeAddress,
        keyname: &str,
    ) -> Result<(), BootstrapError> {
        // Generation must happen before the first certificate transfer.
        if self.local.ensure_tls_material(keyname).await? {
            info!(keyname = %keyname, "No local TLS pair found; generated one");
        }

        let cert = self.local.cert_path(keyname);
        let key = self.local.tls_key_path(keyname);

        self.transfer(node, &cert, &format!("{REMOTE_CERT_DIR}/mycert.pem"))
            .await?;
        self.transfer(node, &key, &format!("{REMOTE_CERT_DIR}/mykey.pem"))
            .await?;

        // The controller also expects the pair under its cloud-specific
        // subpath.
        let cloud_dir = format!("{REMOTE_CERT_DIR}/{CLOUD_CERT_SUBDIR}");
        self.exec
            .run(
                node.as_str(),
                &format!("mkdir -p {cloud_dir}"),
                TRANSFER_TIMEOUT,
                None,
            )
            .await
            .map_err(|e| BootstrapError::Transfer {
                node: node.to_string(),
                source: e,
            })?;

        self.transfer(node, &cert, &format!("{cloud_dir}/mycert.pem"))
            .await?;
        self.transfer(node, &key, &format!("{cloud_dir}/mykey.pem"))
            .await?;

        Ok(())
    }

    /// Push the locations metadata and the shared secret to the
    /// places the controller and later tool invocations read them
    /// from.
    pub async fn copy_local_metadata(
        &self,
        node: &NodeAddress,
        keyname: &str,
        role_info: &[NodeRoleInfo],
    ) -> Result<(), BootstrapError> {
        let locations = self.local.write_locations(keyname, role_info).await?;

        self.transfer(
            node,
            &locations,
            &format!("{INSTALL_ROOT}/locations-{keyname}.json"),
        )
        .await?;

        self.ensure_remote_state_dir(node).await?;
        self.transfer(
            node,
            &locations,
            &format!("{REMOTE_STATE_DIR}/locations-{keyname}.json"),
        )
        .await?;
        self.transfer(
            node,
            &self.local.secret_path(keyname),
            &format!("{REMOTE_STATE_DIR}/{keyname}.secret"),
        )
        .await?;

        info!(node = %node, keyname = %keyname, "Local metadata copied");
        Ok(())
    }

    async fn ensure_remote_state_dir(&self, node: &NodeAddress) -> Result<(), BootstrapError> {
        self.exec
            .run(
                node.as_str(),
                &format!("mkdir -p {REMOTE_STATE_DIR}"),
                TRANSFER_TIMEOUT,
                None,
            )
            .await
            .map_err(|e| BootstrapError::Transfer {
                node: node.to_string(),
                source: e,
            })?;
        Ok(())
    }

    async fn transfer(
        &self,
        node: &NodeAddress,
        local: &Path,
        remote: &str,
    ) -> Result<(), BootstrapError> {
        self.exec
            .copy(node.as_str(), local, remote, TRANSFER_TIMEOUT)
            .await
            .map_err(|e| BootstrapError::Transfer {
                node: node.to_string(),
                source: e,
            })
    }
}

#[cfg(test)]
mod tests {
    use crate::layout::NodeRole;
    use crate::testutil::{Outcome, ScriptedExec};

    use super::*;

    async fn state_with_credentials() -> (tempfile::TempDir, LocalState) {
        let dir = tempfile::tempdir().unwrap();
        let state = LocalState::with_base_dir(dir.path());
        tokio::fs::create_dir_all(state.base_dir()).await.unwrap();
        tokio::fs::write(state.secret_path("bookey"), "the secret")
            .await
            .unwrap();
        tokio::fs::write(state.ssh_key_path("bookey"), "key contents")
            .await
            .unwrap();
        (dir, state)
    }

    #[tokio::test]
    async fn test_copies_secret_then_ssh_key() {
        let (_dir, state) = state_with_credentials().await;
        let exec = Arc::new(ScriptedExec::new());
        let distributor = CredentialDistributor::new(exec.clone(), state);

        distributor
            .copy_deployment_credentials(&NodeAddress::from("public1"), "bookey", false)
            .await
            .unwrap();

        let calls = exec.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].ends_with("-> /etc/plinth/secret.key"));
        assert!(calls[1].ends_with("-> /etc/plinth/ssh.key"));
    }

    #[tokio::test]
    async fn test_all_or_nothing_on_key_transfer_failure() {
        let (_dir, state) = state_with_credentials().await;
        let exec = Arc::new(ScriptedExec::new());
        exec.on("/etc/plinth/ssh.key", Outcome::Transport);
        let distributor = CredentialDistributor::new(exec.clone(), state);

        let err = distributor
            .copy_deployment_credentials(&NodeAddress::from("public1"), "bookey", false)
            .await
            .unwrap_err();

        assert!(matches!(err, BootstrapError::Transfer { .. }));
        // The secret went over first, but nothing after the failure ran.
        assert_eq!(exec.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_tls_generates_pair_before_first_cert_transfer() {
        let (_dir, state) = state_with_credentials().await;
        let exec = Arc::new(ScriptedExec::new());
        let distributor = CredentialDistributor::new(exec.clone(), state.clone());

        assert!(!state.has_tls_material("bookey"));
        distributor
            .copy_deployment_credentials(&NodeAddress::from("public1"), "bookey", true)
            .await
            .unwrap();
        assert!(state.has_tls_material("bookey"));

        let calls = exec.calls();
        assert_eq!(calls.len(), 7);
        assert!(calls[2].ends_with("-> /etc/plinth/certs/mycert.pem"));
        assert!(calls[3].ends_with("-> /etc/plinth/certs/mykey.pem"));
        assert!(calls[4].contains("mkdir -p /etc/plinth/certs/cloud1"));
        assert!(calls[5].ends_with("-> /etc/plinth/certs/cloud1/mycert.pem"));
        assert!(calls[6].ends_with("-> /etc/plinth/certs/cloud1/mykey.pem"));
    }

    #[tokio::test]
    async fn test_copy_local_metadata_order() {
        let (_dir, state) = state_with_credentials().await;
        let exec = Arc::new(ScriptedExec::new());
        let distributor = CredentialDistributor::new(exec.clone(), state);

        let role_info = vec![NodeRoleInfo {
            public_ip: NodeAddress::from("public1"),
            private_ip: "private1".to_string(),
            roles: vec![NodeRole::Head],
        }];

        distributor
            .copy_local_metadata(&NodeAddress::from("public1"), "bookey", &role_info)
            .await
            .unwrap();

        let calls = exec.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[0].ends_with("-> /etc/plinth/locations-bookey.json"));
        // The root-home state dir is created before anything lands in it.
        assert!(calls[1].contains("mkdir -p /root/.plinth"));
        assert!(calls[2].ends_with("-> /root/.plinth/locations-bookey.json"));
        assert!(calls[3].ends_with("-> /root/.plinth/bookey.secret"));
    }
}
