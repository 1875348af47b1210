//! Remote executor seam and the SSH implementation.
//!
//! The orchestrator never shells out directly; everything goes through
//! the [`RemoteExec`] trait so tests can substitute scripted executors
//! the same way the node-agent substitutes a mock runtime.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::RemoteError;

/// Default remote user for deployment operations.
pub const ROOT_USER: &str = "root";

/// Executes commands and file transfers against a remote node.
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run `command` on `node` as root, blocking until it exits or the
    /// timeout elapses. Returns captured stdout.
    async fn run(
        &self,
        node: &str,
        command: &str,
        timeout: Duration,
        stdin: Option<&str>,
    ) -> Result<String, RemoteError>;

    /// Run `command` on `node` as an ordinary user. Used before root
    /// login has been enabled on a fresh machine.
    async fn run_as(
        &self,
        user: &str,
        node: &str,
        command: &str,
        timeout: Duration,
        stdin: Option<&str>,
    ) -> Result<String, RemoteError>;

    /// Start `command` on `node` without waiting for it to exit.
    async fn spawn(&self, node: &str, command: &str) -> Result<(), RemoteError>;

    /// Copy a local file to `remote_path` on `node`.
    async fn copy(
        &self,
        node: &str,
        local_path: &Path,
        remote_path: &str,
        timeout: Duration,
    ) -> Result<(), RemoteError>;
}

/// [`RemoteExec`] implementation that shells out to `ssh` and `scp`
/// with a deployment private key.
pub struct SshExecutor {
    key_path: PathBuf,
    ssh_program: String,
    scp_program: String,
}

impl SshExecutor {
    /// Create an executor authenticating with the given private key.
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
        }
    }

    /// Override the ssh/scp binaries (nonstandard install locations,
    /// tests).
    pub fn with_programs(mut self, ssh: impl Into<String>, scp: impl Into<String>) -> Self {
        self.ssh_program = ssh.into();
        self.scp_program = scp.into();
        self
    }

    fn transport(node: &str, err: impl std::fmt::Display) -> RemoteError {
        RemoteError::Transport {
            node: node.to_string(),
            message: err.to_string(),
        }
    }
}

/// Common ssh options: fresh machines have unknown host keys and must
/// never fall back to password prompts.
fn base_options(key_path: &Path) -> Vec<String> {
    vec![
        "-i".to_string(),
        key_path.display().to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
        "-o".to_string(),
        "NumberOfPasswordPrompts=0".to_string(),
        "-o".to_string(),
        "LogLevel=ERROR".to_string(),
    ]
}

fn ssh_args(key_path: &Path, user: &str, node: &str) -> Vec<String> {
    let mut args = base_options(key_path);
    args.push(format!("{user}@{node}"));
    args
}

fn scp_args(key_path: &Path, node: &str, local_path: &Path, remote_path: &str) -> Vec<String> {
    let mut args = base_options(key_path);
    args.push(local_path.display().to_string());
    args.push(format!("{ROOT_USER}@{node}:{remote_path}"));
    args
}

#[async_trait]
impl RemoteExec for SshExecutor {
    async fn run(
        &self,
        node: &str,
        command: &str,
        timeout: Duration,
        stdin: Option<&str>,
    ) -> Result<String, RemoteError> {
        self.run_as(ROOT_USER, node, command, timeout, stdin).await
    }

    async fn run_as(
        &self,
        user: &str,
        node: &str,
        command: &str,
        timeout: Duration,
        stdin: Option<&str>,
    ) -> Result<String, RemoteError> {
        debug!(node = %node, user = %user, command = %command, "Running remote command");

        let mut cmd = Command::new(&self.ssh_program);
        cmd.args(ssh_args(&self.key_path, user, node))
            .arg(command)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| Self::transport(node, e))?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes())
                    .await
                    .map_err(|e| Self::transport(node, e))?;
                // Dropping the pipe closes the remote command's stdin.
            }
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| RemoteError::Timeout {
                node: node.to_string(),
                timeout,
            })?
            .map_err(|e| Self::transport(node, e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(RemoteError::CommandFailed {
                node: node.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }

    async fn spawn(&self, node: &str, command: &str) -> Result<(), RemoteError> {
        debug!(node = %node, command = %command, "Spawning remote command");

        let mut cmd = Command::new(&self.ssh_program);
        cmd.args(ssh_args(&self.key_path, ROOT_USER, node))
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| Self::transport(node, e))?;

        // Reap in the background; the caller does not care about the exit.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        Ok(())
    }

    async fn copy(
        &self,
        node: &str,
        local_path: &Path,
        remote_path: &str,
        timeout: Duration,
    ) -> Result<(), RemoteError> {
        debug!(
            node = %node,
            local = %local_path.display(),
            remote = %remote_path,
            "Copying file to remote node"
        );

        let output = tokio::time::timeout(
            timeout,
            Command::new(&self.scp_program)
                .args(scp_args(&self.key_path, node, local_path, remote_path))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| RemoteError::Timeout {
            node: node.to_string(),
            timeout,
        })?
        .map_err(|e| Self::transport(node, e))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(RemoteError::CommandFailed {
                node: node.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}
