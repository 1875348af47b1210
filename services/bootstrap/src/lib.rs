//! plinth bootstrap orchestrator.
//!
//! Turns freshly provisioned machines (cloud instances or static IPs)
//! into running cluster members: establish SSH trust, verify the
//! machine image, distribute deployment secrets, launch the remote
//! controller agent, and wait until the whole cluster reports
//! initialized.
//!
//! ## Architecture
//!
//! - **Orchestrator**: the per-node bootstrap state machine; the only
//!   component allowed to trigger instance cleanup.
//! - **Image Validator**: confirms the target image carries the
//!   platform at the expected version with the requested datastore.
//! - **Credential Distributor**: pushes the shared secret, SSH key,
//!   and TLS material; all-or-nothing.
//! - **Control-Plane Launcher**: brings up the controller agent via
//!   the node's process supervisor.
//! - **Readiness Poller**: polls every node's controller until the
//!   cluster-wide initialization converges.
//!
//! Connectivity probing and the SSH transport live in `plinth-remote`.

pub mod accounts;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod launch;
pub mod layout;
pub mod local;
pub mod orchestrator;
pub mod provision;
pub mod readiness;
pub mod sync;
pub mod validate;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::BootstrapConfig;
pub use controller::{ControllerClient, StatusApi, STATUS_RPC_PORT};
pub use error::BootstrapError;
pub use layout::{NodeAddress, NodeRole, NodeRoleInfo, RoleLayout};
pub use local::LocalState;
pub use orchestrator::{BootstrapOrchestrator, FatalBootstrapError, Phase};
pub use provision::{HookProvisioner, Provisioner};
pub use readiness::{ClusterStatusSnapshot, ReadinessPoller};
