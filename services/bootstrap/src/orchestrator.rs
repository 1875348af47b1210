//! The bootstrap state machine.
//!
//! One orchestrator run turns one provisioned machine into a running
//! cluster member:
//!
//! ```text
//! PROVISIONING_DONE -> AWAITING_SSH -> VALIDATING_IMAGE
//!     -> DISTRIBUTING_CREDENTIALS -> LAUNCHING_CONTROL_PLANE
//!     -> AWAITING_CLUSTER_READY -> DONE
//! ```
//!
//! Any phase failure transitions into the absorbing FAILED state:
//! provisioned instances are terminated exactly once and a single
//! aggregate error naming the failing phase and node is raised. The
//! orchestrator is invoked once per bootstrap attempt and is not
//! resumable from a persisted mid-state; independent nodes are
//! bootstrapped by independent orchestrator runs.

use std::sync::Arc;
use std::time::Duration;

use plinth_remote::{retry_bounded, wait_for_port, RemoteExec};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{BootstrapConfig, REMOTE_STATE_DIR};
use crate::controller::StatusApi;
use crate::credentials::CredentialDistributor;
use crate::error::BootstrapError;
use crate::launch::ControlPlaneLauncher;
use crate::layout::NodeAddress;
use crate::local::LocalState;
use crate::provision::Provisioner;
use crate::readiness::{ClusterStatusSnapshot, ReadinessPoller};
use crate::sync::SourceSync;
use crate::validate::ImageValidator;

/// Timeout for the root-login probe. Kept short: a working root login
/// answers `ls` immediately.
const ROOT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Timeout for the root-login enablement commands.
const SETUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Banner printed by cloud images that only allow the ordinary user in.
const ROOT_DISABLED_BANNER: &str = "Please login as";

/// Non-terminal phases of one bootstrap run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingSsh,
    EnablingRootLogin,
    ValidatingImage,
    DistributingCredentials,
    SyncingSource,
    LaunchingControlPlane,
    AwaitingClusterReady,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::AwaitingSsh => "awaiting-ssh",
            Phase::EnablingRootLogin => "enabling-root-login",
            Phase::ValidatingImage => "validating-image",
            Phase::DistributingCredentials => "distributing-credentials",
            Phase::SyncingSource => "syncing-source",
            Phase::LaunchingControlPlane => "launching-control-plane",
            Phase::AwaitingClusterReady => "awaiting-cluster-ready",
        };
        write!(f, "{name}")
    }
}

/// Aggregate fatal error raised after the transition into FAILED.
#[derive(Debug, Error)]
#[error("bootstrap of {node} failed during {phase}: {source}")]
pub struct FatalBootstrapError {
    pub node: NodeAddress,
    pub phase: Phase,
    #[source]
    pub source: BootstrapError,
}

pub struct BootstrapOrchestrator {
    config: BootstrapConfig,
    exec: Arc<dyn RemoteExec>,
    api: Arc<dyn StatusApi>,
    provisioner: Arc<dyn Provisioner>,
    local: LocalState,
}

impl BootstrapOrchestrator {
    pub fn new(
        config: BootstrapConfig,
        exec: Arc<dyn RemoteExec>,
        api: Arc<dyn StatusApi>,
        provisioner: Arc<dyn Provisioner>,
        local: LocalState,
    ) -> Self {
        Self {
            config,
            exec,
            api,
            provisioner,
            local,
        }
    }

    /// Run the full bootstrap sequence against `node`.
    pub async fn run(
        &self,
        node: &NodeAddress,
    ) -> Result<ClusterStatusSnapshot, FatalBootstrapError> {
        info!(
            node = %node,
            keyname = %self.config.keyname,
            datastore = %self.config.datastore,
            "Starting bootstrap"
        );

        match self.run_phases(node).await {
            Ok(snapshot) => {
                info!(node = %node, nodes = snapshot.all_public_ips.len(), "Bootstrap complete");
                Ok(snapshot)
            }
            Err((phase, source)) => {
                warn!(
                    node = %node,
                    phase = %phase,
                    error = %source,
                    "Bootstrap failed; terminating provisioned instances"
                );
                // Cleanup runs exactly once, on the transition into FAILED.
                if let Err(e) = self.provisioner.terminate_instances().await {
                    error!(error = %e, "Instance termination failed");
                }
                Err(FatalBootstrapError {
                    node: node.clone(),
                    phase,
                    source,
                })
            }
        }
    }

    async fn run_phases(
        &self,
        node: &NodeAddress,
    ) -> Result<ClusterStatusSnapshot, (Phase, BootstrapError)> {
        // AWAITING_SSH
        wait_for_port(
            node.as_str(),
            self.config.ssh_port,
            self.config.ssh_max_attempts,
            self.config.ssh_retry_delay,
        )
        .await
        .map_err(|e| (Phase::AwaitingSsh, e.into()))?;

        // One-shot: fresh cloud images may only allow the ordinary
        // user in until we copy the key into root's account.
        self.enable_root_login_if_needed(node)
            .await
            .map_err(|e| (Phase::EnablingRootLogin, e))?;

        // VALIDATING_IMAGE. Transport hiccups are retried within a
        // small budget; a wrong image is fatal on the first answer.
        let validator = ImageValidator::new(
            Arc::clone(&self.exec),
            self.config.version.clone(),
            self.config.datastore.clone(),
        );
        retry_bounded(
            self.config.validate_max_attempts,
            self.config.validate_retry_delay,
            || validator.validate(node),
            BootstrapError::is_transient,
        )
        .await
        .map_err(|e| (Phase::ValidatingImage, e))?;

        // DISTRIBUTING_CREDENTIALS
        let distributor = CredentialDistributor::new(Arc::clone(&self.exec), self.local.clone());
        distributor
            .copy_deployment_credentials(node, &self.config.keyname, self.config.use_tls)
            .await
            .map_err(|e| (Phase::DistributingCredentials, e))?;

        // Optional: push a local source tree over the image's install.
        if let Some(source_dir) = &self.config.source_dir {
            let sync = SourceSync::new(self.local.ssh_key_path(&self.config.keyname));
            sync.rsync_local_tree(node, source_dir)
                .await
                .map_err(|e| (Phase::SyncingSource, e))?;
        }

        // LAUNCHING_CONTROL_PLANE, then probe the RPC port before any
        // readiness polling starts.
        let launcher = ControlPlaneLauncher::new(Arc::clone(&self.exec), self.local.clone());
        launcher
            .start_remote_control_plane(node, &self.config.keyname, self.config.verbose)
            .await
            .map_err(|e| (Phase::LaunchingControlPlane, e))?;
        wait_for_port(
            node.as_str(),
            self.config.rpc_port,
            self.config.rpc_max_attempts,
            self.config.rpc_retry_delay,
        )
        .await
        .map_err(|e| (Phase::LaunchingControlPlane, e.into()))?;

        // AWAITING_CLUSTER_READY
        let poller = ReadinessPoller::new(
            Arc::clone(&self.api),
            self.config.poll_interval,
            self.config.readiness_deadline,
        );
        poller
            .wait_for_machines_to_finish_loading(node)
            .await
            .map_err(|e| (Phase::AwaitingClusterReady, e))
    }

    async fn enable_root_login_if_needed(
        &self,
        node: &NodeAddress,
    ) -> Result<(), BootstrapError> {
        let needs_enable = match self
            .exec
            .run(node.as_str(), "ls", ROOT_PROBE_TIMEOUT, None)
            .await
        {
            Ok(output) => output.contains(ROOT_DISABLED_BANNER),
            // Some images refuse root outright rather than printing
            // the banner.
            Err(e) if e.is_command_failure() => true,
            Err(e) => return Err(e.into()),
        };

        if !needs_enable {
            debug!(node = %node, "Root login already enabled");
            return Ok(());
        }

        let user = &self.config.login_user;
        info!(node = %node, user = %user, "Enabling root login");

        self.exec
            .run_as(
                user,
                node.as_str(),
                &format!("sudo cp /home/{user}/.ssh/authorized_keys /root/.ssh/authorized_keys"),
                SETUP_TIMEOUT,
                None,
            )
            .await?;

        // Root sessions from here on authenticate with the deployment
        // key; put a copy where later tool runs expect it. The state
        // dir does not exist on a fresh image.
        self.exec
            .run(
                node.as_str(),
                &format!("mkdir -p {REMOTE_STATE_DIR}"),
                SETUP_TIMEOUT,
                None,
            )
            .await?;
        self.exec
            .copy(
                node.as_str(),
                &self.local.ssh_key_path(&self.config.keyname),
                &format!("{REMOTE_STATE_DIR}/{}.key", self.config.keyname),
                SETUP_TIMEOUT,
            )
            .await?;

        Ok(())
    }
}
