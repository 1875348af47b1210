//! Remote execution primitives for plinth.
//!
//! This library provides the low-level transport used by the bootstrap
//! orchestrator to drive freshly provisioned machines:
//!
//! - [`RemoteExec`]: the executor seam (run a command, copy a file),
//!   implemented over `ssh`/`scp` by [`SshExecutor`] and by scripted
//!   mocks in tests.
//! - [`wait_for_port`]: bounded TCP connectivity probing.
//! - [`retry_bounded`]: the generic bounded-retry primitive for
//!   transient failures.
//!
//! # Invariants
//!
//! - Every remote operation carries an explicit timeout; there is no
//!   unbounded blocking call.
//! - Non-zero exit status and transport failure surface as distinct
//!   error variants, because callers interpret them differently
//!   (a missing path is fatal, a dropped connection is retryable).

mod error;
mod exec;
mod probe;

pub use error::RemoteError;
pub use exec::{RemoteExec, SshExecutor};
pub use probe::{retry_bounded, wait_for_port, ProbeError};
