//! Image validation.
//!
//! A machine is only bootstrappable if its image already carries the
//! platform install, at the expected version, with the requested
//! datastore backend built in. Absence of any of these is a
//! configuration error, not a transient failure, so validation is
//! never retried on a non-zero exit. Transport failures are surfaced
//! separately so the orchestrator can retry them.

use std::sync::Arc;
use std::time::Duration;

use plinth_remote::RemoteExec;
use tracing::{debug, info};

use crate::config::INSTALL_ROOT;
use crate::error::BootstrapError;
use crate::layout::NodeAddress;

/// Timeout for one sentinel-path check.
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Verifies the target image against the expected install layout.
pub struct ImageValidator {
    exec: Arc<dyn RemoteExec>,
    version: String,
    datastore: String,
}

impl ImageValidator {
    pub fn new(exec: Arc<dyn RemoteExec>, version: impl Into<String>, datastore: impl Into<String>) -> Self {
        Self {
            exec,
            version: version.into(),
            datastore: datastore.into(),
        }
    }

    /// Check the install sentinel, the version subpath, and the
    /// datastore subpath, in that order. The first missing path fails
    /// the whole validation.
    pub async fn validate(&self, node: &NodeAddress) -> Result<(), BootstrapError> {
        self.check_path(node, INSTALL_ROOT, "image lacks the platform install")
            .await?;

        let version_path = format!("{INSTALL_ROOT}/{}", self.version);
        self.check_path(
            node,
            &version_path,
            &format!("image version does not match expected {}", self.version),
        )
        .await?;

        let datastore_path = format!("{version_path}/{}", self.datastore);
        self.check_path(
            node,
            &datastore_path,
            &format!("image does not support the {} datastore", self.datastore),
        )
        .await?;

        info!(
            node = %node,
            version = %self.version,
            datastore = %self.datastore,
            "Image validated"
        );
        Ok(())
    }

    async fn check_path(
        &self,
        node: &NodeAddress,
        path: &str,
        missing_message: &str,
    ) -> Result<(), BootstrapError> {
        debug!(node = %node, path = %path, "Checking sentinel path");
        match self
            .exec
            .run(node.as_str(), &format!("ls {path}"), CHECK_TIMEOUT, None)
            .await
        {
            Ok(_) => Ok(()),
            // Non-zero exit means the path is missing: misconfiguration.
            Err(e) if e.is_command_failure() => Err(BootstrapError::BadConfiguration {
                node: node.to_string(),
                message: missing_message.to_string(),
            }),
            // Transport failures are retryable at a higher level.
            Err(e) => Err(BootstrapError::RemoteCommand(e)),
        }
    }
}
