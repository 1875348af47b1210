//! Platform user account creation.
//!
//! After the cluster is ready, an admin account (and its derived
//! messaging account on the head node) can be registered through the
//! controller's `commit_new_user` RPC. Passwords never travel in the
//! clear; only a SHA-256 digest is sent.

use sha2::{Digest, Sha256};
use tracing::info;

use crate::controller::{ControllerError, StatusApi};
use crate::error::BootstrapError;
use crate::layout::NodeAddress;

/// Hex-encoded SHA-256 of the password.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Register the admin account and its messaging alias on the head
/// node's controller.
pub async fn create_user_accounts(
    api: &dyn StatusApi,
    head: &NodeAddress,
    email: &str,
    password: &str,
) -> Result<(), BootstrapError> {
    let password_hash = hash_password(password);

    let local_part = email.split('@').next().unwrap_or(email);
    let messaging_user = format!("{local_part}@{head}");

    for (user, role) in [(email, "admin"), (messaging_user.as_str(), "messaging")] {
        let accepted = api.commit_new_user(head, user, &password_hash, role).await?;
        if !accepted {
            return Err(BootstrapError::Controller(ControllerError::Rejected {
                node: head.to_string(),
                message: format!("user {user} was not accepted"),
            }));
        }
        info!(user = %user, role = %role, "User account created");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::testutil::ScriptedStatus;

    use super::*;

    #[test]
    fn test_hash_password_is_stable_hex() {
        let hash = hash_password("password");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_password("password"));
        assert_ne!(hash, hash_password("Password"));
    }

    #[tokio::test]
    async fn test_creates_admin_and_messaging_accounts() {
        let api = Arc::new(ScriptedStatus::new(Vec::new(), Vec::new()));
        let head = NodeAddress::from("public1");

        create_user_accounts(api.as_ref(), &head, "boo@foo.goo", "password")
            .await
            .unwrap();

        let calls = api.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains("boo@foo.goo (admin)"));
        assert!(calls[1].contains("boo@public1 (messaging)"));
    }
}
