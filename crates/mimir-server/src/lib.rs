mod admin_service;
mod convert;
mod messaging;

use std::net::SocketAddr;
use std::sync::Arc;

use mimir_cluster::MessagingService;
use mimir_metastore::MetaStorage;
use mimir_proto::v1::{
    cluster_messaging_server::ClusterMessagingServer, recovery_admin_server::RecoveryAdminServer,
};
use mimir_recovery::DisasterRecoveryManager;
use tonic_reflection::server::Builder as ReflectionBuilder;

use admin_service::RecoveryAdminImpl;
use messaging::ClusterMessagingImpl;

pub use messaging::GrpcMessagingService;

/// Node-to-node transport: answers `Invoke` calls from peers.
pub async fn serve_cluster(addr: SocketAddr, messaging: Arc<GrpcMessagingService>) -> anyhow::Result<()> {
    let reflection = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(mimir_proto::FILE_DESCRIPTOR_SET)
        .build_v1()?;
    tracing::info!(%addr, node = messaging.node_name(), "cluster gRPC server starting");
    tonic::transport::Server::builder()
        .add_service(ClusterMessagingServer::new(ClusterMessagingImpl::new(messaging)))
        .add_service(reflection)
        .serve(addr)
        .await
        .map_err(Into::into)
}

/// Operator surface for recovery commands and partition state queries.
pub async fn serve_admin<M, N>(addr: SocketAddr, manager: Arc<DisasterRecoveryManager<M, N>>) -> anyhow::Result<()>
where
    M: MetaStorage,
    N: MessagingService,
{
    let reflection = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(mimir_proto::FILE_DESCRIPTOR_SET)
        .build_v1()?;
    tracing::info!(%addr, node = manager.node_name(), "admin gRPC server starting");
    tonic::transport::Server::builder()
        .add_service(RecoveryAdminServer::new(RecoveryAdminImpl::new(manager)))
        .add_service(reflection)
        .serve(addr)
        .await
        .map_err(Into::into)
}
