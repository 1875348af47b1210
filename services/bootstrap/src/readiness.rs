//! Cluster readiness polling.
//!
//! Initialization is a cluster-wide condition: bootstrap is only done
//! when every node in the deployment reports that it finished loading,
//! not merely the head node. The poller learns the full node set from
//! the head node's controller and then polls each node's own
//! controller until all report done.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::controller::{ControllerError, StatusApi};
use crate::error::BootstrapError;
use crate::layout::{NodeAddress, NodeRoleInfo};

/// Result of one complete readiness poll. Recomputed every time; never
/// cached across polls.
#[derive(Debug, Clone)]
pub struct ClusterStatusSnapshot {
    pub all_public_ips: Vec<NodeAddress>,
    pub role_info: Vec<NodeRoleInfo>,
    pub initialized: bool,
}

pub struct ReadinessPoller {
    api: Arc<dyn StatusApi>,
    poll_interval: Duration,
    deadline: Duration,
}

impl ReadinessPoller {
    pub fn new(api: Arc<dyn StatusApi>, poll_interval: Duration, deadline: Duration) -> Self {
        Self {
            api,
            poll_interval,
            deadline,
        }
    }

    /// Wait until every node in the deployment reports initialized.
    ///
    /// RPC transport failures are treated exactly like "not yet done"
    /// and retried; the only way to fail is the overall wall-clock
    /// deadline, which surfaces as [`BootstrapError::PollTimeout`].
    pub async fn wait_for_machines_to_finish_loading(
        &self,
        head: &NodeAddress,
    ) -> Result<ClusterStatusSnapshot, BootstrapError> {
        tokio::time::timeout(self.deadline, self.wait_inner(head))
            .await
            .map_err(|_| BootstrapError::PollTimeout {
                deadline: self.deadline,
            })
    }

    async fn wait_inner(&self, head: &NodeAddress) -> ClusterStatusSnapshot {
        // First: the cluster view. The controller may still be settling,
        // so keep asking until the node set and role info are coherent.
        let (all_public_ips, role_info) = loop {
            match self.fetch_cluster_view(head).await {
                Ok(view) => break view,
                Err(e) => {
                    debug!(head = %head, error = %e, "Cluster view not available yet");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        };

        info!(
            head = %head,
            nodes = all_public_ips.len(),
            "Cluster view retrieved; waiting for every node to finish loading"
        );

        // Then: poll every node independently, one outstanding call
        // per node, until each has reported done at least once.
        let waits = all_public_ips.iter().map(|node| self.wait_for_node(node));
        futures_util::future::join_all(waits).await;

        info!(nodes = all_public_ips.len(), "All nodes report initialized");
        ClusterStatusSnapshot {
            all_public_ips,
            role_info,
            initialized: true,
        }
    }

    /// Fetch the node set and role info from the head node.
    ///
    /// Role info must cover every public address before readiness can
    /// ever be reported; an incomplete view counts as unavailable.
    async fn fetch_cluster_view(
        &self,
        head: &NodeAddress,
    ) -> Result<(Vec<NodeAddress>, Vec<NodeRoleInfo>), ControllerError> {
        let ips = self.api.get_all_public_ips(head).await?;
        let roles = self.api.get_role_info(head).await?;

        for ip in &ips {
            if !roles.iter().any(|info| info.public_ip == *ip) {
                return Err(ControllerError::IncompleteRoleInfo {
                    node: head.to_string(),
                    missing: ip.to_string(),
                });
            }
        }
        Ok((ips, roles))
    }

    async fn wait_for_node(&self, node: &NodeAddress) {
        loop {
            match self.api.is_done_initializing(node).await {
                Ok(true) => {
                    debug!(node = %node, "Node finished initializing");
                    return;
                }
                Ok(false) => {
                    debug!(node = %node, "Node still initializing");
                }
                // Transport failures are indistinguishable from "not
                // ready yet" while machines are still coming up.
                Err(e) => {
                    debug!(node = %node, error = %e, "Status RPC unavailable, will retry");
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::layout::NodeRole;
    use crate::testutil::ScriptedStatus;

    use super::*;

    fn role_info_for(nodes: &[&str]) -> Vec<NodeRoleInfo> {
        nodes
            .iter()
            .enumerate()
            .map(|(i, node)| NodeRoleInfo {
                public_ip: NodeAddress::from(*node),
                private_ip: format!("private{}", i + 1),
                roles: if i == 0 {
                    vec![NodeRole::Head, NodeRole::DatabaseMaster]
                } else {
                    vec![NodeRole::Compute]
                },
            })
            .collect()
    }

    fn poller(api: Arc<ScriptedStatus>, deadline: Duration) -> ReadinessPoller {
        ReadinessPoller::new(api, Duration::from_millis(5), deadline)
    }

    #[tokio::test]
    async fn test_waits_for_every_node_not_just_head() {
        let api = Arc::new(ScriptedStatus::new(
            vec![NodeAddress::from("public1"), NodeAddress::from("public2")],
            role_info_for(&["public1", "public2"]),
        ));
        // public1 is not done on the first poll; public2 answers done
        // immediately. Both must still be polled.
        api.queue_done(&NodeAddress::from("public1"), Ok(false));
        api.queue_done(&NodeAddress::from("public1"), Ok(true));
        api.queue_done(&NodeAddress::from("public2"), Ok(true));

        let snapshot = poller(Arc::clone(&api), Duration::from_secs(5))
            .wait_for_machines_to_finish_loading(&NodeAddress::from("public1"))
            .await
            .unwrap();

        assert!(snapshot.initialized);
        assert_eq!(snapshot.all_public_ips.len(), 2);
        assert_eq!(snapshot.role_info.len(), 2);

        let calls = api.calls();
        let polls_public1 = calls
            .iter()
            .filter(|c| c.starts_with("is_done_initializing public1"))
            .count();
        let polls_public2 = calls
            .iter()
            .filter(|c| c.starts_with("is_done_initializing public2"))
            .count();
        assert_eq!(polls_public1, 2);
        assert_eq!(polls_public2, 1);
    }

    #[tokio::test]
    async fn test_transport_failure_counts_as_not_ready() {
        let api = Arc::new(ScriptedStatus::new(
            vec![NodeAddress::from("public1")],
            role_info_for(&["public1"]),
        ));
        api.queue_done(&NodeAddress::from("public1"), Err(()));
        api.queue_done(&NodeAddress::from("public1"), Ok(true));

        poller(Arc::clone(&api), Duration::from_secs(5))
            .wait_for_machines_to_finish_loading(&NodeAddress::from("public1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cluster_view_fetch_retries_until_available() {
        let api = Arc::new(
            ScriptedStatus::new(
                vec![NodeAddress::from("public1")],
                role_info_for(&["public1"]),
            )
            .fail_view_times(2),
        );

        poller(Arc::clone(&api), Duration::from_secs(5))
            .wait_for_machines_to_finish_loading(&NodeAddress::from("public1"))
            .await
            .unwrap();

        let view_fetches = api
            .calls()
            .iter()
            .filter(|c| c.starts_with("get_all_public_ips"))
            .count();
        assert_eq!(view_fetches, 3);
    }

    #[tokio::test]
    async fn test_deadline_exceeded_is_poll_timeout() {
        let api = Arc::new(
            ScriptedStatus::new(
                vec![NodeAddress::from("public1")],
                role_info_for(&["public1"]),
            )
            .never_done_by_default(),
        );

        let err = poller(Arc::clone(&api), Duration::from_millis(50))
            .wait_for_machines_to_finish_loading(&NodeAddress::from("public1"))
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::PollTimeout { .. }));
    }

    #[tokio::test]
    async fn test_incomplete_role_info_never_reports_ready() {
        // Role info is missing public2 entirely; the poller must keep
        // treating the view as unavailable and time out rather than
        // report success.
        let api = Arc::new(ScriptedStatus::new(
            vec![NodeAddress::from("public1"), NodeAddress::from("public2")],
            role_info_for(&["public1"]),
        ));

        let err = poller(Arc::clone(&api), Duration::from_millis(50))
            .wait_for_machines_to_finish_loading(&NodeAddress::from("public1"))
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::PollTimeout { .. }));
        // No per-node polls may have happened with a broken view.
        assert!(!api
            .calls()
            .iter()
            .any(|c| c.starts_with("is_done_initializing")));
    }
}
