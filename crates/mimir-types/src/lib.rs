use std::collections::BTreeMap;
use std::fmt;

pub type NodeName = String;
pub type ZoneId = u32;
pub type TableId = u32;
pub type PartitionId = u32;
pub type CatalogVersion = u32;
/// Metastore commit counter; every successful put bumps it by exactly one.
pub type Revision = u64;

/// Correlates a locally pending recovery operation with the watch event of its own write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct OperationId(pub uuid::Uuid);

impl OperationId {
    pub fn random() -> Self {
        OperationId(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies one replica group: a single partition of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct TablePartitionId {
    pub table_id: TableId,
    pub partition_id: PartitionId,
}

impl TablePartitionId {
    pub fn new(table_id: TableId, partition_id: PartitionId) -> Self {
        TablePartitionId { table_id, partition_id }
    }
}

impl fmt::Display for TablePartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_part_{}", self.table_id, self.partition_id)
    }
}

/// Public health of a single replica, as seen by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LocalPartitionStateEnum {
    Healthy,
    Initializing,
    InstallingSnapshot,
    /// Only produced by cluster-relative normalization, never by a single node.
    CatchingUp,
    Broken,
    Unavailable,
}

impl fmt::Display for LocalPartitionStateEnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LocalPartitionStateEnum::Healthy => "HEALTHY",
            LocalPartitionStateEnum::Initializing => "INITIALIZING",
            LocalPartitionStateEnum::InstallingSnapshot => "INSTALLING_SNAPSHOT",
            LocalPartitionStateEnum::CatchingUp => "CATCHING_UP",
            LocalPartitionStateEnum::Broken => "BROKEN",
            LocalPartitionStateEnum::Unavailable => "UNAVAILABLE",
        };
        f.write_str(s)
    }
}

/// One node's self-report for one replica group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LocalPartitionState {
    pub partition_id: TablePartitionId,
    pub state: LocalPartitionStateEnum,
    pub log_index: u64,
}

/// `TablePartitionId → node name → state`. Partial: unresponsive nodes are simply absent.
pub type PartitionStates = BTreeMap<TablePartitionId, BTreeMap<NodeName, LocalPartitionState>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LocalPartitionStatesRequest {
    pub zone_id: ZoneId,
    pub catalog_version: CatalogVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LocalPartitionStatesResponse {
    pub states: Vec<LocalPartitionState>,
}

/// Handler routing key for cluster messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MessageGroup {
    Table,
}

/// Everything that travels between nodes on the cluster transport.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NetworkMessage {
    LocalPartitionStatesRequest(LocalPartitionStatesRequest),
    LocalPartitionStatesResponse(LocalPartitionStatesResponse),
}

impl NetworkMessage {
    pub fn group(&self) -> MessageGroup {
        match self {
            NetworkMessage::LocalPartitionStatesRequest(_)
            | NetworkMessage::LocalPartitionStatesResponse(_) => MessageGroup::Table,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MimirError {
    #[error("distribution zone not found: {0}")]
    ZoneNotFound(String),
    #[error("table not found: {0}")]
    TableNotFound(TableId),
    #[error("table {table_id} does not belong to zone {zone_id}")]
    TableNotInZone { table_id: TableId, zone_id: ZoneId },
    #[error("operation {0} is already pending")]
    DuplicateOperation(OperationId),
    #[error("operation timed out")]
    Timeout,
    #[error("node unreachable: {0}")]
    NodeUnreachable(NodeName),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("version tracker closed")]
    TrackerClosed,
    #[error("operation cancelled")]
    Cancelled,
}

pub mod codec {
    //! bincode (standard config) used for every payload that crosses the metastore or the wire.

    use crate::MimirError;

    pub fn encode<T: serde::Serialize>(val: &T) -> Result<Vec<u8>, MimirError> {
        bincode::serde::encode_to_vec(val, bincode::config::standard())
            .map_err(|e| MimirError::Codec(e.to_string()))
    }

    pub fn decode<T: for<'de> serde::Deserialize<'de>>(bytes: &[u8]) -> Result<T, MimirError> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(v, _)| v)
            .map_err(|e| MimirError::Codec(e.to_string()))
    }
}
