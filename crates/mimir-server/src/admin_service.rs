use std::sync::Arc;

use mimir_cluster::MessagingService;
use mimir_metastore::MetaStorage;
use mimir_proto::v1::{
    recovery_admin_server::RecoveryAdmin, PartitionStatesRequest, PartitionStatesResponse, ResetPartitionsRequest,
    ResetPartitionsResponse,
};
use mimir_recovery::DisasterRecoveryManager;
use tonic::{Request, Response, Status};

use crate::convert::{mimir_to_status, partition_states_to_proto};

pub struct RecoveryAdminImpl<M, N> {
    manager: Arc<DisasterRecoveryManager<M, N>>,
}

impl<M, N> RecoveryAdminImpl<M, N> {
    pub fn new(manager: Arc<DisasterRecoveryManager<M, N>>) -> Self {
        RecoveryAdminImpl { manager }
    }
}

#[tonic::async_trait]
impl<M: MetaStorage, N: MessagingService> RecoveryAdmin for RecoveryAdminImpl<M, N> {
    async fn reset_partitions(
        &self,
        request: Request<ResetPartitionsRequest>,
    ) -> Result<Response<ResetPartitionsResponse>, Status> {
        let req = request.into_inner();
        tracing::info!(zone_id = req.zone_id, table_id = req.table_id, "reset partitions requested");
        self.manager
            .reset_partitions(req.zone_id, req.table_id)
            .await
            .map_err(mimir_to_status)?;
        Ok(Response::new(ResetPartitionsResponse {}))
    }

    async fn partition_states(
        &self,
        request: Request<PartitionStatesRequest>,
    ) -> Result<Response<PartitionStatesResponse>, Status> {
        let zone_name = request.into_inner().zone_name;
        let states = self
            .manager
            .partition_states(&zone_name)
            .await
            .map_err(mimir_to_status)?;
        Ok(Response::new(partition_states_to_proto(states)))
    }
}
