//! Cluster layout types: node addresses, roles, and the read-only
//! role layout built before bootstrap begins.

use serde::{Deserialize, Serialize};

/// Routable address of a machine in the deployment.
///
/// Immutable once assigned; the key for every remote operation on
/// that machine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(String);

impl NodeAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A node's function within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Coordinates the deployment and serves the status RPC.
    Head,
    DatabaseMaster,
    Database,
    Compute,
    LoadBalancer,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Head => "head",
            NodeRole::DatabaseMaster => "database_master",
            NodeRole::Database => "database",
            NodeRole::Compute => "compute",
            NodeRole::LoadBalancer => "load_balancer",
        }
    }
}

/// Ordered mapping from node address to role set.
///
/// Built once before bootstrap begins and never mutated by the
/// orchestrator.
#[derive(Debug, Clone, Default)]
pub struct RoleLayout {
    nodes: Vec<(NodeAddress, Vec<NodeRole>)>,
}

impl RoleLayout {
    pub fn new(nodes: Vec<(NodeAddress, Vec<NodeRole>)>) -> Self {
        Self { nodes }
    }

    /// Layout as reported by the controller's role info.
    pub fn from_role_info(info: &[NodeRoleInfo]) -> Self {
        Self {
            nodes: info
                .iter()
                .map(|i| (i.public_ip.clone(), i.roles.clone()))
                .collect(),
        }
    }

    /// The first node carrying the head role, if any.
    pub fn head_node(&self) -> Option<&NodeAddress> {
        self.nodes
            .iter()
            .find(|(_, roles)| roles.contains(&NodeRole::Head))
            .map(|(addr, _)| addr)
    }

    /// Roles assigned to `node`; empty when the node is unknown.
    pub fn roles_of(&self, node: &NodeAddress) -> &[NodeRole] {
        self.nodes
            .iter()
            .find(|(addr, _)| addr == node)
            .map(|(_, roles)| roles.as_slice())
            .unwrap_or(&[])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeAddress> {
        self.nodes.iter().map(|(addr, _)| addr)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Per-node role record as reported by the controller status RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRoleInfo {
    pub public_ip: NodeAddress,
    pub private_ip: String,
    pub roles: Vec<NodeRole>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> RoleLayout {
        RoleLayout::new(vec![
            (
                NodeAddress::from("public1"),
                vec![NodeRole::Head, NodeRole::DatabaseMaster],
            ),
            (NodeAddress::from("public2"), vec![NodeRole::Compute]),
        ])
    }

    #[test]
    fn test_head_node_is_first_with_head_role() {
        assert_eq!(layout().head_node(), Some(&NodeAddress::from("public1")));
    }

    #[test]
    fn test_roles_of_unknown_node_is_empty() {
        assert!(layout().roles_of(&NodeAddress::from("public9")).is_empty());
    }

    #[test]
    fn test_layout_from_role_info_preserves_head() {
        let info = vec![
            NodeRoleInfo {
                public_ip: NodeAddress::from("public2"),
                private_ip: "private2".to_string(),
                roles: vec![NodeRole::Compute],
            },
            NodeRoleInfo {
                public_ip: NodeAddress::from("public1"),
                private_ip: "private1".to_string(),
                roles: vec![NodeRole::Head],
            },
        ];
        let layout = RoleLayout::from_role_info(&info);
        assert_eq!(layout.len(), 2);
        assert_eq!(layout.head_node(), Some(&NodeAddress::from("public1")));
        assert_eq!(
            layout.roles_of(&NodeAddress::from("public2")),
            &[NodeRole::Compute]
        );
    }

    #[test]
    fn test_role_info_round_trips_snake_case() {
        let json = r#"[
            {"public_ip": "public1", "private_ip": "private1",
             "roles": ["head", "database_master"]},
            {"public_ip": "public2", "private_ip": "private2",
             "roles": ["compute"]}
        ]"#;
        let info: Vec<NodeRoleInfo> = serde_json::from_str(json).unwrap();
        assert_eq!(info.len(), 2);
        assert_eq!(info[0].roles, vec![NodeRole::Head, NodeRole::DatabaseMaster]);
        assert_eq!(info[1].public_ip, NodeAddress::from("public2"));
    }
}
