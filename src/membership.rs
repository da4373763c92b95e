use serde::{Deserialize, Serialize};

use crate::protocol::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: NodeId,
    pub addr: String,
}

/// Static cluster membership as seen from one node. Members are kept sorted
/// by id, which is also their election rank.
#[derive(Debug, Clone)]
pub struct Membership {
    local: NodeId,
    members: Vec<Member>,
}

impl Membership {
    pub fn new(local: NodeId, mut members: Vec<Member>) -> Self {
        members.sort_by(|a, b| a.id.cmp(&b.id));
        Self { local, members }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.members.iter().map(|m| m.id.clone()).collect()
    }

    pub fn peers(&self) -> Vec<NodeId> {
        self.members
            .iter()
            .filter(|m| m.id != self.local)
            .map(|m| m.id.clone())
            .collect()
    }

    pub fn addr_of(&self, node_id: &str) -> Option<&str> {
        self.members
            .iter()
            .find(|m| m.id == node_id)
            .map(|m| m.addr.as_str())
    }

    pub fn is_member(&self, node_id: &str) -> bool {
        self.members.iter().any(|m| m.id == node_id)
    }

    pub fn majority(&self) -> usize {
        self.members.len() / 2 + 1
    }
}
