use dashmap::DashMap;

use mimir_types::TablePartitionId;

/// Node state as reported by the consensus engine hosting a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftNodeState {
    Leader,
    Transferring,
    Candidate,
    Follower,
    Error,
    Uninitialized,
    Shutting,
    Shutdown,
    End,
    /// A raw state code the engine reported that has no variant here.
    Unknown(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReplicationGroupId {
    TablePartition(TablePartitionId),
    /// System groups (metastore, cluster management); never reported as partitions.
    System(String),
}

/// What the recovery layer may observe about one local raft node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaftNodeView {
    pub state: RaftNodeState,
    pub last_log_index: u64,
    pub installing_snapshot: bool,
}

/// Enumerates the replica groups hosted on this node.
pub trait ReplicaGroups: Send + Sync + 'static {
    fn groups(&self) -> Vec<(ReplicationGroupId, RaftNodeView)>;
}

/// Replica groups set by hand; stands in for a real raft manager.
#[derive(Default)]
pub struct MemReplicaGroups {
    groups: DashMap<ReplicationGroupId, RaftNodeView>,
}

impl MemReplicaGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, id: ReplicationGroupId, view: RaftNodeView) {
        self.groups.insert(id, view);
    }

    pub fn remove(&self, id: &ReplicationGroupId) {
        self.groups.remove(id);
    }
}

impl ReplicaGroups for MemReplicaGroups {
    fn groups(&self) -> Vec<(ReplicationGroupId, RaftNodeView)> {
        self.groups.iter().map(|e| (e.key().clone(), *e.value())).collect()
    }
}
