//! Local source tree sync.
//!
//! Development deployments can push a locally checked-out platform
//! tree onto the node instead of relying on what the image shipped.
//! The expected subdirectories must all exist locally before anything
//! is pushed; a missing one means the user pointed at the wrong
//! directory, which is a configuration error.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use plinth_remote::RemoteError;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::INSTALL_ROOT;
use crate::error::BootstrapError;
use crate::layout::NodeAddress;

/// Subdirectories of a platform source tree that get pushed.
const SYNCED_DIRS: &[&str] = &["controller", "lib", "scripts", "tools"];

/// Timeout for one rsync invocation.
const SYNC_TIMEOUT: Duration = Duration::from_secs(120);

pub struct SourceSync {
    key_path: PathBuf,
    rsync_program: String,
}

impl SourceSync {
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
            rsync_program: "rsync".to_string(),
        }
    }

    /// Override the rsync binary (tests).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.rsync_program = program.into();
        self
    }

    /// Push each expected subdirectory of `local_root` to the node's
    /// install root.
    pub async fn rsync_local_tree(
        &self,
        node: &NodeAddress,
        local_root: &Path,
    ) -> Result<(), BootstrapError> {
        for dir in SYNCED_DIRS {
            let local = local_root.join(dir);
            if !local.is_dir() {
                return Err(BootstrapError::BadConfiguration {
                    node: node.to_string(),
                    message: format!("local source tree is missing {}", local.display()),
                });
            }
        }

        for dir in SYNCED_DIRS {
            let local = local_root.join(dir);
            debug!(node = %node, dir = %dir, "Syncing source directory");
            self.rsync_dir(node, &local, dir).await?;
        }

        info!(node = %node, root = %local_root.display(), "Source tree synced");
        Ok(())
    }

    async fn rsync_dir(
        &self,
        node: &NodeAddress,
        local: &Path,
        dir: &str,
    ) -> Result<(), BootstrapError> {
        let output = tokio::time::timeout(
            SYNC_TIMEOUT,
            Command::new(&self.rsync_program)
                .args(rsync_args(&self.key_path, node, local, dir))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| BootstrapError::Transfer {
            node: node.to_string(),
            source: RemoteError::Timeout {
                node: node.to_string(),
                timeout: SYNC_TIMEOUT,
            },
        })?
        .map_err(|e| BootstrapError::Transfer {
            node: node.to_string(),
            source: RemoteError::Transport {
                node: node.to_string(),
                message: e.to_string(),
            },
        })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(BootstrapError::Transfer {
                node: node.to_string(),
                source: RemoteError::CommandFailed {
                    node: node.to_string(),
                    status: output.status.code().unwrap_or(-1),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                },
            })
        }
    }
}

fn rsync_args(key_path: &Path, node: &NodeAddress, local: &Path, dir: &str) -> Vec<String> {
    vec![
        "-a".to_string(),
        "--delete".to_string(),
        "-e".to_string(),
        format!(
            "ssh -i {} -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null",
            key_path.display()
        ),
        format!("{}/", local.display()),
        format!("root@{node}:{INSTALL_ROOT}/{dir}/"),
    ]
}
