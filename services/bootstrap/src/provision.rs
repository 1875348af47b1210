//! Cleanup collaborator.
//!
//! Provisioning itself (instance creation, security groups) lives
//! outside this crate; the orchestrator only ever needs the one
//! cleanup action: terminate the instances provisioned for a failed
//! bootstrap.

use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

/// The provisioning side's cleanup interface.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Terminate every instance provisioned for this bootstrap.
    async fn terminate_instances(&self) -> Result<()>;
}

/// [`Provisioner`] that shells out to a user-supplied terminate hook.
///
/// With no hook configured, cleanup degrades to a loud warning so the
/// operator knows instances are still running.
pub struct HookProvisioner {
    hook: Option<String>,
}

impl HookProvisioner {
    pub fn new(hook: Option<String>) -> Self {
        Self { hook }
    }
}

#[async_trait]
impl Provisioner for HookProvisioner {
    async fn terminate_instances(&self) -> Result<()> {
        let Some(hook) = &self.hook else {
            warn!("No terminate hook configured; provisioned instances were NOT terminated");
            return Ok(());
        };

        info!(hook = %hook, "Terminating provisioned instances");
        let status = Command::new("sh")
            .arg("-c")
            .arg(hook)
            .stdin(Stdio::null())
            .status()
            .await
            .context("failed to run terminate hook")?;

        if !status.success() {
            bail!("terminate hook exited with {status}");
        }
        Ok(())
    }
}
