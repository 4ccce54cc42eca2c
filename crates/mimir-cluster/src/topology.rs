use std::collections::BTreeSet;

use arc_swap::ArcSwap;

use mimir_types::NodeName;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterNode {
    pub name: NodeName,
    pub address: String,
}

impl ClusterNode {
    pub fn new(name: impl Into<NodeName>, address: impl Into<String>) -> Self {
        ClusterNode { name: name.into(), address: address.into() }
    }
}

/// Current logical topology. `members` is a point-in-time snapshot; later joins and
/// leaves do not affect a snapshot already taken.
pub trait LogicalTopology: Send + Sync + 'static {
    fn members(&self) -> BTreeSet<ClusterNode>;
}

/// Topology whose membership is changed explicitly (from config or by tests).
pub struct StaticTopology {
    members: ArcSwap<BTreeSet<ClusterNode>>,
}

impl StaticTopology {
    pub fn new(members: impl IntoIterator<Item = ClusterNode>) -> Self {
        StaticTopology {
            members: ArcSwap::from_pointee(members.into_iter().collect()),
        }
    }

    pub fn join(&self, node: ClusterNode) {
        self.members.rcu(|cur| {
            let mut next = BTreeSet::clone(cur);
            next.insert(node.clone());
            next
        });
    }

    pub fn leave(&self, name: &str) {
        self.members.rcu(|cur| {
            let mut next = BTreeSet::clone(cur);
            next.retain(|n| n.name != name);
            next
        });
    }
}

impl LogicalTopology for StaticTopology {
    fn members(&self) -> BTreeSet<ClusterNode> {
        BTreeSet::clone(&self.members.load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_unaffected_by_later_changes() {
        let topo = StaticTopology::new([ClusterNode::new("a", "127.0.0.1:1")]);
        let before = topo.members();

        topo.join(ClusterNode::new("b", "127.0.0.1:2"));
        topo.leave("a");

        assert_eq!(before.len(), 1);
        assert!(before.iter().any(|n| n.name == "a"));
        let after: Vec<_> = topo.members().into_iter().map(|n| n.name).collect();
        assert_eq!(after, vec!["b".to_string()]);
    }
}
