//! Remote control-plane launch.
//!
//! Brings up the controller agent on a node by way of the node's
//! process supervisor: clear stale state, make sure the supervisor is
//! running, upload the controller's supervision descriptor, and tell
//! the supervisor to load it. This component does not wait for the
//! controller RPC to come up; the orchestrator probes the RPC port
//! afterwards.

use std::sync::Arc;
use std::time::Duration;

use plinth_remote::RemoteExec;
use tracing::{debug, info};

use crate::config::INSTALL_ROOT;
use crate::error::BootstrapError;
use crate::layout::NodeAddress;
use crate::local::LocalState;

/// Timeout for each launch step.
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Remote path the supervisor loads descriptors from.
const REMOTE_DESCRIPTOR_PATH: &str = "/etc/supervisor/conf.d/plinth-controller.conf";

/// Supervision descriptor for the controller agent.
///
/// Loading an already-loaded descriptor is a no-op on the supervisor
/// side, which is what makes the launch sequence idempotent.
fn render_descriptor(keyname: &str, verbose: bool) -> String {
    let log_level = if verbose { "debug" } else { "info" };
    format!(
        "[program:plinth-controller]\n\
         command=/usr/bin/plinth-controller --keyname {keyname}\n\
         environment=PLINTH_LOG_LEVEL=\"{log_level}\"\n\
         autorestart=true\n\
         stopwaitsecs=30\n"
    )
}

pub struct ControlPlaneLauncher {
    exec: Arc<dyn RemoteExec>,
    local: LocalState,
}

impl ControlPlaneLauncher {
    pub fn new(exec: Arc<dyn RemoteExec>, local: LocalState) -> Self {
        Self { exec, local }
    }

    /// Launch the controller agent on `node`. Steps are strictly
    /// ordered; any transport failure aborts the launch.
    pub async fn start_remote_control_plane(
        &self,
        node: &NodeAddress,
        keyname: &str,
        verbose: bool,
    ) -> Result<(), BootstrapError> {
        // 1. Remove stale controller state from a previous run.
        //    Fire and forget: the file may already be absent and
        //    removal needs no confirmation before the next step.
        let stale = format!("rm -rf {INSTALL_ROOT}/status-{keyname}.json");
        debug!(node = %node, "Clearing stale controller state");
        self.exec
            .spawn(node.as_str(), &stale)
            .await
            .map_err(|e| self.launch_error(node, e))?;

        // 2. Start the supervisor daemon unless it is already running.
        self.exec
            .run(
                node.as_str(),
                "pgrep -x supervisord >/dev/null || supervisord",
                LAUNCH_TIMEOUT,
                None,
            )
            .await
            .map_err(|e| self.launch_error(node, e))?;

        // 3. Upload the supervision descriptor.
        let descriptor = render_descriptor(keyname, verbose);
        let local_path = self
            .local
            .write_controller_descriptor(keyname, &descriptor)
            .await?;
        self.exec
            .copy(
                node.as_str(),
                &local_path,
                REMOTE_DESCRIPTOR_PATH,
                LAUNCH_TIMEOUT,
            )
            .await
            .map_err(|e| self.launch_error(node, e))?;

        // 4. Tell the supervisor to load it (idempotent).
        self.exec
            .run(
                node.as_str(),
                "supervisorctl update plinth-controller",
                LAUNCH_TIMEOUT,
                None,
            )
            .await
            .map_err(|e| self.launch_error(node, e))?;

        info!(node = %node, keyname = %keyname, "Controller launch sequence complete");
        Ok(())
    }

    fn launch_error(&self, node: &NodeAddress, source: plinth_remote::RemoteError) -> BootstrapError {
        BootstrapError::Launch {
            node: node.to_string(),
            source,
        }
    }
}
