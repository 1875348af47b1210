//! Configuration for the bootstrap orchestrator.
//!
//! All knobs live in one explicit struct validated at startup; nothing
//! reads the environment after construction.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Platform version the target image must carry.
pub const PLATFORM_VERSION: &str = "4.2.0";

/// Remote directory holding the platform install and its config.
pub const INSTALL_ROOT: &str = "/etc/plinth";

/// Root-home state directory on remote machines. Not part of the
/// image, so it must be created before anything is copied into it.
pub const REMOTE_STATE_DIR: &str = "/root/.plinth";

/// Fixed SSH port on target machines.
pub const SSH_PORT: u16 = 22;

/// Datastore backends a stock image can carry.
pub const SUPPORTED_DATASTORES: &[&str] = &["cassandra", "postgres", "foundationdb"];

/// Invalid configuration detected before any remote operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("deployment key name cannot be empty")]
    EmptyKeyname,

    #[error("deployment key name cannot contain path separators: {0}")]
    InvalidKeyname(String),

    #[error("unknown datastore backend: {0}")]
    UnknownDatastore(String),

    #[error("readiness deadline and poll interval must be non-zero")]
    ZeroDeadline,
}

/// Everything the orchestrator needs for one bootstrap invocation.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Name scoping this deployment's SSH keypair and shared secret.
    pub keyname: String,

    /// Platform version the image must match.
    pub version: String,

    /// Requested data-store backend.
    pub datastore: String,

    /// Generate and distribute a self-signed TLS pair.
    pub use_tls: bool,

    /// Pass verbose logging through to the remote controller.
    pub verbose: bool,

    /// Ordinary user to fall back to while root login is disabled.
    pub login_user: String,

    /// Optional local source tree to rsync onto the node before launch.
    pub source_dir: Option<PathBuf>,

    /// Local command to run when bootstrap fails and provisioned
    /// instances must be terminated.
    pub terminate_hook: Option<String>,

    pub ssh_port: u16,
    pub rpc_port: u16,

    /// SSH availability budget: small and fixed.
    pub ssh_max_attempts: u32,
    pub ssh_retry_delay: Duration,

    /// Controller RPC port budget after launch.
    pub rpc_max_attempts: u32,
    pub rpc_retry_delay: Duration,

    /// Budget for retrying image validation after transport hiccups.
    /// Configuration mismatches are never retried.
    pub validate_max_attempts: u32,
    pub validate_retry_delay: Duration,

    /// Overall wall-clock budget for cluster-wide initialization.
    pub readiness_deadline: Duration,

    /// Sleep between readiness polls of one node.
    pub poll_interval: Duration,
}

impl BootstrapConfig {
    pub fn new(
        keyname: impl Into<String>,
        datastore: impl Into<String>,
    ) -> Self {
        Self {
            keyname: keyname.into(),
            version: PLATFORM_VERSION.to_string(),
            datastore: datastore.into(),
            use_tls: false,
            verbose: false,
            login_user: "ubuntu".to_string(),
            source_dir: None,
            terminate_hook: None,
            ssh_port: SSH_PORT,
            rpc_port: crate::controller::STATUS_RPC_PORT,
            ssh_max_attempts: 10,
            ssh_retry_delay: Duration::from_secs(2),
            rpc_max_attempts: 60,
            rpc_retry_delay: Duration::from_secs(2),
            validate_max_attempts: 3,
            validate_retry_delay: Duration::from_secs(2),
            readiness_deadline: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_secs(10),
        }
    }

    /// Validate once at startup; the orchestrator assumes a valid
    /// config afterwards.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keyname.is_empty() {
            return Err(ConfigError::EmptyKeyname);
        }
        if self.keyname.contains('/') || self.keyname.contains("..") {
            return Err(ConfigError::InvalidKeyname(self.keyname.clone()));
        }
        if !SUPPORTED_DATASTORES.contains(&self.datastore.as_str()) {
            return Err(ConfigError::UnknownDatastore(self.datastore.clone()));
        }
        if self.readiness_deadline.is_zero() || self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroDeadline);
        }
        Ok(())
    }
}
