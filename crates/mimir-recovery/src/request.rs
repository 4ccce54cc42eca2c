use std::collections::BTreeSet;

use mimir_cluster::MessagingService;
use mimir_metastore::MetaStorage;
use mimir_types::{NodeName, OperationId, Revision, TableId, ZoneId};

use crate::manager::DisasterRecoveryManager;
use crate::pending::Completion;
use crate::reset;

/// Command written to the recovery trigger key. Every node sees it; only the issuer,
/// which holds the pending operation, executes it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DisasterRecoveryRequest {
    ManualGroupUpdate(ManualGroupUpdateRequest),
}

impl DisasterRecoveryRequest {
    pub fn operation_id(&self) -> OperationId {
        match self {
            DisasterRecoveryRequest::ManualGroupUpdate(r) => r.operation_id,
        }
    }

    /// Runs the command's effect and resolves `done` with its outcome.
    pub(crate) async fn handle<M, N>(
        self,
        manager: &DisasterRecoveryManager<M, N>,
        revision: Revision,
        done: Completion,
    ) where
        M: MetaStorage,
        N: MessagingService,
    {
        match self {
            DisasterRecoveryRequest::ManualGroupUpdate(r) => r.handle(manager, revision, done).await,
        }
    }
}

/// Forces new replica sets onto the partitions of one table that lost their majority,
/// so each of those groups can elect a leader again.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ManualGroupUpdateRequest {
    pub operation_id: OperationId,
    pub zone_id: ZoneId,
    pub table_id: TableId,
}

impl ManualGroupUpdateRequest {
    pub fn new(zone_id: ZoneId, table_id: TableId) -> Self {
        Self::with_operation_id(OperationId::random(), zone_id, table_id)
    }

    pub fn with_operation_id(operation_id: OperationId, zone_id: ZoneId, table_id: TableId) -> Self {
        ManualGroupUpdateRequest { operation_id, zone_id, table_id }
    }

    async fn handle<M, N>(self, manager: &DisasterRecoveryManager<M, N>, revision: Revision, done: Completion)
    where
        M: MetaStorage,
        N: MessagingService,
    {
        let alive: BTreeSet<NodeName> = manager.topology().members().into_iter().map(|n| n.name).collect();
        let result = reset::reset_partitions(
            manager.meta_storage(),
            manager.catalog(),
            &alive,
            self.zone_id,
            self.table_id,
            revision,
        )
        .await;

        match &result {
            Ok(partitions) => tracing::info!(
                operation_id = %self.operation_id,
                revision,
                zone_id = self.zone_id,
                table_id = self.table_id,
                reset = partitions.len(),
                "manual group update applied"
            ),
            Err(e) => tracing::warn!(
                operation_id = %self.operation_id,
                revision,
                error = %e,
                "manual group update failed"
            ),
        }
        // The submitter may have timed out and dropped its receiver; nothing to report then.
        let _ = done.send(result.map(|_| ()));
    }
}
