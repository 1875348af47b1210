//! Error taxonomy for the bootstrap orchestrator.
//!
//! Each component raises the most specific kind it can; the
//! orchestrator catches all of them at phase boundaries, runs cleanup
//! exactly once, and re-raises a single aggregate error naming the
//! failing phase and node.

use std::time::Duration;

use plinth_remote::{ProbeError, RemoteError};
use thiserror::Error;

use crate::controller::ControllerError;
use crate::local::LocalStateError;

/// Failures surfaced by individual bootstrap components.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// A probed port never became reachable within its attempt budget.
    #[error("{node}:{port} never became reachable after {attempts} attempts")]
    ConnectivityTimeout {
        node: String,
        port: u16,
        attempts: u32,
    },

    /// The target image is wrong: missing install, wrong version, or
    /// unsupported datastore. Never retried.
    #[error("bad configuration on {node}: {message}")]
    BadConfiguration { node: String, message: String },

    /// A credential or file transfer failed. The whole credential set
    /// must be treated as unusable.
    #[error("transfer to {node} failed: {source}")]
    Transfer {
        node: String,
        #[source]
        source: RemoteError,
    },

    /// A control-plane launch step failed.
    #[error("control plane launch on {node} failed: {source}")]
    Launch {
        node: String,
        #[source]
        source: RemoteError,
    },

    /// The cluster never reported fully initialized within the
    /// wall-clock deadline.
    #[error("cluster did not report initialized within {deadline:?}")]
    PollTimeout { deadline: Duration },

    /// Generic remote command failure, interpreted contextually by the
    /// calling component.
    #[error(transparent)]
    RemoteCommand(#[from] RemoteError),

    /// A status-RPC call failed in a context where it cannot be
    /// treated as "not yet ready".
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Local deployment state (secret, key, cert material) is missing
    /// or unreadable.
    #[error("local state error: {0}")]
    LocalState(#[from] LocalStateError),
}

impl From<ProbeError> for BootstrapError {
    fn from(e: ProbeError) -> Self {
        let ProbeError::Timeout {
            node,
            port,
            attempts,
        } = e;
        BootstrapError::ConnectivityTimeout {
            node,
            port,
            attempts,
        }
    }
}

impl BootstrapError {
    /// Returns true for failures that may heal if the same step is
    /// retried (transport hiccups), as opposed to fatal configuration
    /// mismatches.
    pub fn is_transient(&self) -> bool {
        match self {
            BootstrapError::RemoteCommand(e) => e.is_transient(),
            _ => false,
        }
    }
}
