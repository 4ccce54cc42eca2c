use std::collections::BTreeSet;

use mimir_cluster::CatalogService;
use mimir_metastore::MetaStorage;
use mimir_types::{codec, MimirError, NodeName, Revision, TableId, TablePartitionId, ZoneId};

use crate::keys::{pending_assignments_key, stable_assignments_key};

/// Replica set of one partition as stored in the metastore.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Assignments {
    pub nodes: BTreeSet<NodeName>,
    /// Pending assignments written with `force` make the rebalance reset raft peers
    /// instead of running a regular membership change.
    pub force: bool,
}

impl Assignments {
    pub fn of<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeName>,
    {
        Assignments { nodes: nodes.into_iter().map(Into::into).collect(), force: false }
    }
}

/// Forced pending assignments for a group that lost its majority, or `None` when the
/// group still has quorum (or nothing alive to move it to).
///
/// Surviving stable replicas are kept. If none survived, up to `replicas` alive nodes
/// are picked instead.
pub fn forced_assignments(
    stable: &Assignments,
    alive: &BTreeSet<NodeName>,
    replicas: u32,
) -> Option<Assignments> {
    if stable.nodes.is_empty() {
        return None;
    }
    let majority = stable.nodes.len() / 2 + 1;
    let surviving: BTreeSet<NodeName> = stable.nodes.intersection(alive).cloned().collect();
    if surviving.len() >= majority {
        return None;
    }

    let nodes = if surviving.is_empty() {
        alive.iter().take(replicas as usize).cloned().collect()
    } else {
        surviving
    };
    if nodes.is_empty() {
        return None;
    }
    Some(Assignments { nodes, force: true })
}

/// Rewrites pending assignments of every partition of `table_id` that lost quorum.
/// Returns the partitions that were reset.
pub async fn reset_partitions<M: MetaStorage>(
    meta: &M,
    catalog: &dyn CatalogService,
    alive: &BTreeSet<NodeName>,
    zone_id: ZoneId,
    table_id: TableId,
    revision: Revision,
) -> Result<Vec<TablePartitionId>, MimirError> {
    let version = catalog.latest_version();
    let zone = catalog
        .zone(zone_id, version)
        .ok_or_else(|| MimirError::ZoneNotFound(format!("id={zone_id}")))?;
    let table = catalog
        .table(table_id, version)
        .ok_or(MimirError::TableNotFound(table_id))?;
    if table.zone_id != zone.id {
        return Err(MimirError::TableNotInZone { table_id, zone_id });
    }

    let mut reset = Vec::new();
    for partition in 0..zone.partitions {
        let id = TablePartitionId::new(table_id, partition);
        let Some(entry) = meta.get(&stable_assignments_key(id)).await? else {
            tracing::debug!(partition = %id, "no stable assignments, skipping");
            continue;
        };
        let stable: Assignments = codec::decode(&entry.value)?;
        let Some(forced) = forced_assignments(&stable, alive, zone.replicas) else {
            continue;
        };

        tracing::info!(
            partition = %id,
            revision,
            stable = ?stable.nodes,
            forced = ?forced.nodes,
            "forcing pending assignments for group without majority"
        );
        meta.put(&pending_assignments_key(id), codec::encode(&forced)?).await?;
        reset.push(id);
    }
    Ok(reset)
}
