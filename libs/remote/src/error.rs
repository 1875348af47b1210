//! Error types for remote operations.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the remote executor.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The remote command ran but exited non-zero.
    ///
    /// Callers interpret this contextually: for a sentinel `ls` check
    /// it means "path missing", for anything else it is a real failure.
    #[error("command on {node} exited with status {status}: {stderr}")]
    CommandFailed {
        node: String,
        status: i32,
        stderr: String,
    },

    /// The operation did not complete within its timeout.
    #[error("operation on {node} timed out after {timeout:?}")]
    Timeout { node: String, timeout: Duration },

    /// The transport itself failed (connection refused, process spawn
    /// error, broken pipe).
    #[error("transport failure talking to {node}: {message}")]
    Transport { node: String, message: String },
}

impl RemoteError {
    /// Returns true if the command reached the remote host and exited
    /// non-zero, as opposed to failing in transit.
    pub fn is_command_failure(&self) -> bool {
        matches!(self, RemoteError::CommandFailed { .. })
    }

    /// Returns true for failures that may heal on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Timeout { .. } | RemoteError::Transport { .. }
        )
    }
}
