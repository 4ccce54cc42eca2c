pub mod catalog;
pub mod messaging;
pub mod raft;
pub mod topology;

pub use catalog::{
    CatalogService, CatalogSnapshot, MemCatalog, TableDescriptor, VersionTracker, ZoneDescriptor,
};
pub use messaging::{
    CorrelationId, CorrelationTable, HandlerRegistry, LocalMessagingService, LocalNetwork, MessageHandler,
    MessagingService,
};
pub use raft::{MemReplicaGroups, RaftNodeState, RaftNodeView, ReplicaGroups, ReplicationGroupId};
pub use topology::{ClusterNode, LogicalTopology, StaticTopology};
