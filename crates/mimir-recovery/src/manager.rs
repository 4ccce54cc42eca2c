use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use futures_util::future::{self, BoxFuture, FutureExt};
use tokio::sync::Mutex;

use mimir_cluster::{
    CatalogService, CorrelationId, LogicalTopology, MessageHandler, MessagingService, ReplicaGroups,
    ReplicationGroupId,
};
use mimir_metastore::{MetaStorage, WatchEvent, WatchId, WatchListener};
use mimir_types::{
    codec, CatalogVersion, LocalPartitionState, LocalPartitionStatesRequest, LocalPartitionStatesResponse,
    MessageGroup, MimirError, NetworkMessage, NodeName, OperationId, PartitionStates, TableId, ZoneId,
};

use crate::classifier;
use crate::config::RecoveryConfig;
use crate::keys::RECOVERY_TRIGGER_KEY;
use crate::pending::PendingOperations;
use crate::pool::WorkerPool;
use crate::request::{DisasterRecoveryRequest, ManualGroupUpdateRequest};

/// Coordinates disaster-recovery operations across the cluster.
///
/// Recovery commands are not executed directly. They are written to
/// [`RECOVERY_TRIGGER_KEY`] so that each one gets a unique, totally ordered metastore
/// revision. Every node watches that key; the node that issued the command finds it in
/// its pending registry and performs the effect, all others ignore it.
///
/// Partition health is collected independently by probing every logical topology
/// member and merging their self-reports.
pub struct DisasterRecoveryManager<M, N> {
    node_name: NodeName,
    config: RecoveryConfig,
    meta_storage: Arc<M>,
    messaging: Arc<N>,
    catalog: Arc<dyn CatalogService>,
    topology: Arc<dyn LogicalTopology>,
    replica_groups: Arc<dyn ReplicaGroups>,
    pool: WorkerPool,
    ongoing: PendingOperations,
    watch_id: Mutex<Option<WatchId>>,
}

impl<M: MetaStorage, N: MessagingService> DisasterRecoveryManager<M, N> {
    pub fn new(
        node_name: impl Into<NodeName>,
        config: RecoveryConfig,
        meta_storage: Arc<M>,
        messaging: Arc<N>,
        catalog: Arc<dyn CatalogService>,
        topology: Arc<dyn LogicalTopology>,
        replica_groups: Arc<dyn ReplicaGroups>,
    ) -> Arc<Self> {
        let pool = WorkerPool::new(config.worker_pool_size);
        Arc::new(DisasterRecoveryManager {
            node_name: node_name.into(),
            config,
            meta_storage,
            messaging,
            catalog,
            topology,
            replica_groups,
            pool,
            ongoing: PendingOperations::new(),
            watch_id: Mutex::new(None),
        })
    }

    /// Registers the probe handler and the trigger key watch.
    pub async fn start(self: &Arc<Self>) -> Result<(), MimirError> {
        self.messaging
            .add_message_handler(MessageGroup::Table, Arc::new(ProbeHandler { manager: Arc::downgrade(self) }));

        let listener = Arc::new(TriggerKeyListener { manager: Arc::downgrade(self) });
        let id = self.meta_storage.register_exact_watch(RECOVERY_TRIGGER_KEY, listener).await?;
        *self.watch_id.lock().await = Some(id);

        tracing::info!(node = %self.node_name, "disaster recovery manager started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), MimirError> {
        if let Some(id) = self.watch_id.lock().await.take() {
            self.meta_storage.unregister_watch(id).await?;
        }
        Ok(())
    }

    /// Forces new assignments onto the partitions of `table_id` that lost their majority.
    pub async fn reset_partitions(&self, zone_id: ZoneId, table_id: TableId) -> Result<(), MimirError> {
        let request = DisasterRecoveryRequest::ManualGroupUpdate(ManualGroupUpdateRequest::new(zone_id, table_id));
        self.process_new_request(request).await
    }

    /// Registers the operation, writes it to the trigger key and waits until this node's
    /// watch executes it, bounded by `operation_timeout`.
    pub async fn process_new_request(&self, request: DisasterRecoveryRequest) -> Result<(), MimirError> {
        let operation_id = request.operation_id();
        let bytes = codec::encode(&request)?;

        // Must be registered before the put: the watch may fire before `put` returns.
        let (_guard, done) = self.ongoing.register(operation_id)?;

        let outcome = tokio::time::timeout(self.config.operation_timeout(), async {
            let revision = self.meta_storage.put(RECOVERY_TRIGGER_KEY, bytes).await?;
            tracing::debug!(%operation_id, revision, "recovery request written");
            done.await.map_err(|_| MimirError::Cancelled)?
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(%operation_id, "recovery request timed out");
                Err(MimirError::Timeout)
            }
        }
    }

    /// Collects the state of every partition of `zone_name` from every topology member.
    ///
    /// Nodes that fail or time out are missing from the result; the call itself only
    /// fails when the zone does not exist, before any probe is sent.
    pub async fn partition_states(&self, zone_name: &str) -> Result<PartitionStates, MimirError> {
        let catalog_version = self.catalog.latest_version();
        let zone = self
            .catalog
            .zones(catalog_version)
            .into_iter()
            .find(|z| z.name == zone_name)
            .ok_or_else(|| MimirError::ZoneNotFound(zone_name.to_string()))?;

        let request = NetworkMessage::LocalPartitionStatesRequest(LocalPartitionStatesRequest {
            zone_id: zone.id,
            catalog_version,
        });
        let timeout = self.config.probe_timeout();

        let probes = self.topology.members().into_iter().map(|node| {
            let request = request.clone();
            async move {
                let response = self.messaging.invoke(&node.name, request, timeout).await;
                (node.name, response)
            }
        });

        let mut result: PartitionStates = BTreeMap::new();
        for (node, response) in future::join_all(probes).await {
            match response {
                Ok(NetworkMessage::LocalPartitionStatesResponse(response)) => {
                    for state in response.states {
                        result.entry(state.partition_id).or_default().insert(node.clone(), state);
                    }
                }
                Ok(other) => {
                    tracing::warn!(%node, message = ?other, "unexpected response to partition states request");
                }
                Err(e) => {
                    tracing::warn!(%node, zone = zone_name, error = %e, "partition states request failed");
                }
            }
        }

        Ok(classifier::normalize(result, self.config.catch_up_threshold))
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn is_pending(&self, operation_id: &OperationId) -> bool {
        self.ongoing.contains(operation_id)
    }

    pub fn pending_count(&self) -> usize {
        self.ongoing.len()
    }

    pub(crate) fn meta_storage(&self) -> &M {
        &self.meta_storage
    }

    pub(crate) fn catalog(&self) -> &dyn CatalogService {
        self.catalog.as_ref()
    }

    pub(crate) fn topology(&self) -> &dyn LogicalTopology {
        self.topology.as_ref()
    }

    /// Watch callback for the trigger key. Never returns an error: a failing listener
    /// must not disturb delivery to the rest of the cluster.
    fn handle_trigger_key_update(self: Arc<Self>, event: WatchEvent) -> BoxFuture<'static, Result<(), MimirError>> {
        let revision = event.revision;
        let request: DisasterRecoveryRequest = match codec::decode(&event.entry.value) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(revision, error = %e, "unable to deserialize disaster recovery request");
                return future::ok(()).boxed();
            }
        };

        let operation_id = request.operation_id();
        let Some(done) = self.ongoing.take(&operation_id) else {
            // Not the initiator, or the operation already timed out here.
            tracing::debug!(%operation_id, revision, "ignoring recovery request without local operation");
            return future::ok(()).boxed();
        };

        let manager = self.clone();
        let task = self.pool.spawn(async move { request.handle(&manager, revision, done).await });
        async move {
            if let Err(e) = task.await {
                tracing::error!(%operation_id, revision, error = %e, "recovery request task failed");
            }
            Ok(())
        }
        .boxed()
    }

    fn handle_message(
        self: Arc<Self>,
        message: NetworkMessage,
        sender: NodeName,
        correlation_id: Option<CorrelationId>,
    ) {
        match message {
            NetworkMessage::LocalPartitionStatesRequest(request) => {
                let Some(correlation_id) = correlation_id else {
                    tracing::warn!(%sender, "partition states request without correlation id");
                    return;
                };
                tokio::spawn(self.handle_local_partition_states_request(request, sender, correlation_id));
            }
            other => {
                tracing::debug!(%sender, message = ?other, "ignoring message");
            }
        }
    }

    async fn handle_local_partition_states_request(
        self: Arc<Self>,
        request: LocalPartitionStatesRequest,
        sender: NodeName,
        correlation_id: CorrelationId,
    ) {
        // Answering from an older catalog could misattribute tables to zones.
        let ready = self.catalog.version_tracker().wait_for(request.catalog_version);
        match tokio::time::timeout(self.config.probe_timeout(), ready).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(%sender, catalog_version = request.catalog_version, error = %e, "catalog unavailable");
                return;
            }
            Err(_) => {
                tracing::warn!(
                    %sender,
                    catalog_version = request.catalog_version,
                    "catalog version not reached in time, dropping partition states request"
                );
                return;
            }
        }

        let manager = self.clone();
        let scan = self
            .pool
            .spawn(async move { manager.local_partition_states(request.zone_id, request.catalog_version) });
        let states = match scan.await {
            Ok(states) => states,
            Err(e) => {
                tracing::error!(%sender, error = %e, "local partition scan failed");
                return;
            }
        };

        let response = NetworkMessage::LocalPartitionStatesResponse(LocalPartitionStatesResponse { states });
        if let Err(e) = self.messaging.respond(&sender, response, correlation_id).await {
            tracing::warn!(%sender, correlation_id, error = %e, "failed to answer partition states request");
        }
    }

    fn local_partition_states(&self, zone_id: ZoneId, catalog_version: CatalogVersion) -> Vec<LocalPartitionState> {
        let mut states: Vec<_> = self
            .replica_groups
            .groups()
            .into_iter()
            .filter_map(|(group, view)| {
                let ReplicationGroupId::TablePartition(partition_id) = group else {
                    return None;
                };
                let table = self.catalog.table(partition_id.table_id, catalog_version)?;
                (table.zone_id == zone_id).then(|| classifier::local_partition_state(partition_id, &view))
            })
            .collect();
        states.sort_by_key(|s| s.partition_id);
        states
    }
}

struct TriggerKeyListener<M, N> {
    manager: Weak<DisasterRecoveryManager<M, N>>,
}

impl<M: MetaStorage, N: MessagingService> WatchListener for TriggerKeyListener<M, N> {
    fn on_update(&self, event: WatchEvent) -> BoxFuture<'static, Result<(), MimirError>> {
        match self.manager.upgrade() {
            Some(manager) => manager.handle_trigger_key_update(event),
            None => future::ok(()).boxed(),
        }
    }
}

struct ProbeHandler<M, N> {
    manager: Weak<DisasterRecoveryManager<M, N>>,
}

impl<M: MetaStorage, N: MessagingService> MessageHandler for ProbeHandler<M, N> {
    fn on_message(&self, message: NetworkMessage, sender: NodeName, correlation_id: Option<CorrelationId>) {
        if let Some(manager) = self.manager.upgrade() {
            manager.handle_message(message, sender, correlation_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use tokio::sync::{mpsc, Notify};

    use mimir_cluster::{
        CatalogSnapshot, ClusterNode, LocalMessagingService, LocalNetwork, MemCatalog, MemReplicaGroups, RaftNodeState,
        RaftNodeView, StaticTopology,
    };
    use mimir_metastore::{Entry, MemMetaStorage};
    use mimir_types::{LocalPartitionStateEnum, Revision, TablePartitionId};

    use super::*;
    use crate::keys::{pending_assignments_key, stable_assignments_key};
    use crate::reset::Assignments;

    struct TestNode<M> {
        manager: Arc<DisasterRecoveryManager<M, LocalMessagingService>>,
        messaging: Arc<LocalMessagingService>,
        groups: Arc<MemReplicaGroups>,
    }

    /// Zone 1 "default" (2 partitions) holds tables 7 and 8; zone 2 "archive" (1 partition) holds table 9.
    fn catalog_v1() -> CatalogSnapshot {
        CatalogSnapshot::new(1)
            .with_zone(1, "default", 2, 3)
            .with_zone(2, "archive", 1, 3)
            .with_table(7, "accounts", 1)
            .with_table(8, "ledger", 1)
            .with_table(9, "audit", 2)
    }

    fn catalog() -> Arc<MemCatalog> {
        let catalog = MemCatalog::new();
        catalog.publish(catalog_v1()).unwrap();
        Arc::new(catalog)
    }

    fn topology(names: &[&str]) -> Arc<StaticTopology> {
        Arc::new(StaticTopology::new(names.iter().map(|n| ClusterNode::new(*n, format!("{n}:3344")))))
    }

    async fn start_node<M: MetaStorage>(
        name: &str,
        meta: Arc<M>,
        net: &Arc<LocalNetwork>,
        catalog: Arc<MemCatalog>,
        topology: Arc<StaticTopology>,
    ) -> TestNode<M> {
        let messaging = Arc::new(net.join(name));
        let groups = Arc::new(MemReplicaGroups::new());
        let manager = DisasterRecoveryManager::new(
            name,
            RecoveryConfig::default(),
            meta,
            messaging.clone(),
            catalog,
            topology,
            groups.clone(),
        );
        manager.start().await.unwrap();
        TestNode { manager, messaging, groups }
    }

    async fn seed_stable<M: MetaStorage>(meta: &M, table_id: u32, partition_id: u32, nodes: &[&str]) {
        let bytes = codec::encode(&Assignments::of(nodes.iter().copied())).unwrap();
        meta.put(&stable_assignments_key(TablePartitionId::new(table_id, partition_id)), bytes)
            .await
            .unwrap();
    }

    async fn pending_assignments<M: MetaStorage>(
        meta: &M,
        table_id: u32,
        partition_id: u32,
    ) -> Option<(Assignments, Revision)> {
        let entry = meta
            .get(&pending_assignments_key(TablePartitionId::new(table_id, partition_id)))
            .await
            .unwrap()?;
        Some((codec::decode(&entry.value).unwrap(), entry.revision))
    }

    fn partition(table_id: u32, partition_id: u32) -> ReplicationGroupId {
        ReplicationGroupId::TablePartition(TablePartitionId::new(table_id, partition_id))
    }

    fn view(state: RaftNodeState, last_log_index: u64, installing_snapshot: bool) -> RaftNodeView {
        RaftNodeView { state, last_log_index, installing_snapshot }
    }

    /// Holds trigger key writes until released, so tests can observe the issuer in between.
    struct GatedMetaStorage {
        inner: MemMetaStorage,
        gated: AtomicBool,
        put_seen: Notify,
        release: Notify,
        held: std::sync::Mutex<Vec<Vec<u8>>>,
    }

    impl GatedMetaStorage {
        fn new() -> Self {
            GatedMetaStorage {
                inner: MemMetaStorage::new(),
                gated: AtomicBool::new(true),
                put_seen: Notify::new(),
                release: Notify::new(),
                held: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    impl MetaStorage for GatedMetaStorage {
        async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<Revision, MimirError> {
            if key == RECOVERY_TRIGGER_KEY && self.gated.load(Ordering::SeqCst) {
                self.held.lock().unwrap().push(value.clone());
                self.put_seen.notify_one();
                self.release.notified().await;
            }
            self.inner.put(key, value).await
        }

        async fn get(&self, key: &[u8]) -> Result<Option<Entry>, MimirError> {
            self.inner.get(key).await
        }

        async fn revision(&self) -> Result<Revision, MimirError> {
            self.inner.revision().await
        }

        async fn register_exact_watch(
            &self,
            key: &[u8],
            listener: Arc<dyn WatchListener>,
        ) -> Result<WatchId, MimirError> {
            self.inner.register_exact_watch(key, listener).await
        }

        async fn unregister_watch(&self, id: WatchId) -> Result<(), MimirError> {
            self.inner.unregister_watch(id).await
        }
    }

    /// Records every trigger write as decoded by an independent listener.
    struct TriggerRecorder {
        tx: mpsc::UnboundedSender<(Revision, DisasterRecoveryRequest)>,
    }

    impl WatchListener for TriggerRecorder {
        fn on_update(&self, event: WatchEvent) -> BoxFuture<'static, Result<(), MimirError>> {
            if let Ok(request) = codec::decode(&event.entry.value) {
                let _ = self.tx.send((event.revision, request));
            }
            future::ok(()).boxed()
        }
    }

    fn table_of(request: &DisasterRecoveryRequest) -> u32 {
        match request {
            DisasterRecoveryRequest::ManualGroupUpdate(r) => r.table_id,
        }
    }

    #[tokio::test]
    async fn issuer_resolves_its_own_request() {
        let meta = Arc::new(GatedMetaStorage::new());
        seed_stable(meta.as_ref(), 7, 0, &["a", "b", "c"]).await;
        seed_stable(meta.as_ref(), 7, 1, &["a"]).await;
        let net = LocalNetwork::new();
        let node = start_node("a", meta.clone(), &net, catalog(), topology(&["a"])).await;

        let id = OperationId::random();
        let request = DisasterRecoveryRequest::ManualGroupUpdate(ManualGroupUpdateRequest::with_operation_id(id, 1, 7));
        let manager = node.manager.clone();
        let submit = tokio::spawn(async move { manager.process_new_request(request).await });

        meta.put_seen.notified().await;
        assert!(node.manager.is_pending(&id));
        assert_eq!(node.manager.pending_count(), 1);

        meta.release.notify_one();
        submit.await.unwrap().unwrap();
        assert_eq!(node.manager.pending_count(), 0);

        let trigger = meta.get(RECOVERY_TRIGGER_KEY).await.unwrap().unwrap();
        let written: DisasterRecoveryRequest = codec::decode(&trigger.value).unwrap();
        assert_eq!(written.operation_id(), id);

        let (forced, revision) = pending_assignments(meta.as_ref(), 7, 0).await.unwrap();
        assert_eq!(forced, Assignments { nodes: ["a".to_string()].into(), force: true });
        assert!(revision > trigger.revision);
        // Partition 1 still has its only replica alive.
        assert!(pending_assignments(meta.as_ref(), 7, 1).await.is_none());
    }

    #[tokio::test]
    async fn non_issuer_ignores_foreign_request() {
        let meta = Arc::new(MemMetaStorage::new());
        seed_stable(meta.as_ref(), 7, 0, &["a", "c", "d"]).await;
        seed_stable(meta.as_ref(), 7, 1, &["a", "b"]).await;
        seed_stable(meta.as_ref(), 8, 0, &["a", "b"]).await;
        let (net, catalog, topo) = (LocalNetwork::new(), catalog(), topology(&["a", "b"]));
        let a = start_node("a", meta.clone(), &net, catalog.clone(), topo.clone()).await;
        let b = start_node("b", meta.clone(), &net, catalog, topo).await;
        let before = meta.revision().await.unwrap();

        a.manager.reset_partitions(1, 7).await.unwrap();
        // Delivery is ordered per node: once b's own request resolves, b has seen a's as well.
        b.manager.reset_partitions(1, 8).await.unwrap();

        assert_eq!(a.manager.pending_count(), 0);
        assert_eq!(b.manager.pending_count(), 0);
        // Two trigger writes plus the single forced assignment written by `a`.
        assert_eq!(meta.revision().await.unwrap(), before + 3);
        let (forced, _) = pending_assignments(meta.as_ref(), 7, 0).await.unwrap();
        assert_eq!(forced.nodes, ["a".to_string()].into());
    }

    #[tokio::test]
    async fn concurrent_requests_apply_and_resolve_in_commit_order() {
        let meta = Arc::new(MemMetaStorage::new());
        seed_stable(meta.as_ref(), 7, 0, &["a", "c", "d"]).await;
        seed_stable(meta.as_ref(), 9, 0, &["a", "c", "d"]).await;
        let net = LocalNetwork::new();
        let node = start_node("a", meta.clone(), &net, catalog(), topology(&["a"])).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        meta.register_exact_watch(RECOVERY_TRIGGER_KEY, Arc::new(TriggerRecorder { tx }))
            .await
            .unwrap();

        let (resolved_tx, mut resolved_rx) = mpsc::unbounded_channel();
        let submitters: Vec<_> = [(1, 7), (2, 9)]
            .into_iter()
            .map(|(zone_id, table_id)| {
                let (manager, resolved_tx) = (node.manager.clone(), resolved_tx.clone());
                tokio::spawn(async move {
                    manager.reset_partitions(zone_id, table_id).await.unwrap();
                    resolved_tx.send(table_id).unwrap();
                })
            })
            .collect();
        for submitter in submitters {
            submitter.await.unwrap();
        }

        let (first_rev, first) = rx.recv().await.unwrap();
        let (second_rev, second) = rx.recv().await.unwrap();
        assert!(first_rev < second_rev);

        // Submitters resolve in the order their requests were committed.
        assert_eq!(resolved_rx.recv().await.unwrap(), table_of(&first));
        assert_eq!(resolved_rx.recv().await.unwrap(), table_of(&second));

        let (_, first_write) = pending_assignments(meta.as_ref(), table_of(&first), 0).await.unwrap();
        let (_, second_write) = pending_assignments(meta.as_ref(), table_of(&second), 0).await.unwrap();
        assert!(first_write < second_write);
    }

    #[tokio::test]
    async fn malformed_trigger_payload_does_not_stall_delivery() {
        let meta = Arc::new(MemMetaStorage::new());
        let net = LocalNetwork::new();
        let node = start_node("a", meta.clone(), &net, catalog(), topology(&["a"])).await;

        meta.put(RECOVERY_TRIGGER_KEY, b"garbage".to_vec()).await.unwrap();

        node.manager.reset_partitions(1, 8).await.unwrap();
        assert_eq!(node.manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn effect_failure_is_reported_to_the_issuer() {
        let meta = Arc::new(MemMetaStorage::new());
        let net = LocalNetwork::new();
        let node = start_node("a", meta.clone(), &net, catalog(), topology(&["a"])).await;

        let res = node.manager.reset_partitions(2, 7).await;
        assert!(matches!(res, Err(MimirError::TableNotInZone { table_id: 7, zone_id: 2 })));
        assert_eq!(node.manager.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn notification_after_timeout_is_a_noop() {
        let meta = Arc::new(GatedMetaStorage::new());
        seed_stable(meta.as_ref(), 7, 0, &["a", "c", "d"]).await;
        let net = LocalNetwork::new();
        let node = start_node("a", meta.clone(), &net, catalog(), topology(&["a"])).await;

        let started = tokio::time::Instant::now();
        let res = node.manager.reset_partitions(1, 7).await;
        assert!(matches!(res, Err(MimirError::Timeout)));
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(node.manager.pending_count(), 0);

        // The write commits late; the issuer has already given up on it.
        let late = meta.held.lock().unwrap().pop().unwrap();
        meta.gated.store(false, Ordering::SeqCst);
        meta.put(RECOVERY_TRIGGER_KEY, late).await.unwrap();

        node.manager.reset_partitions(1, 8).await.unwrap();
        assert!(pending_assignments(meta.as_ref(), 7, 0).await.is_none());
        assert_eq!(node.manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn stopped_manager_no_longer_resolves_requests() {
        let meta = Arc::new(MemMetaStorage::new());
        let net = LocalNetwork::new();
        let node = start_node("a", meta.clone(), &net, catalog(), topology(&["a"])).await;
        node.manager.reset_partitions(1, 8).await.unwrap();

        node.manager.stop().await.unwrap();
        tokio::time::pause();
        let res = node.manager.reset_partitions(1, 8).await;
        assert!(matches!(res, Err(MimirError::Timeout)));
    }

    #[tokio::test]
    async fn unknown_zone_fails_before_any_probe() {
        let meta = Arc::new(MemMetaStorage::new());
        let net = LocalNetwork::new();
        let node = start_node("a", meta, &net, catalog(), topology(&["a", "b"])).await;

        let res = node.manager.partition_states("missingZone").await;
        assert!(matches!(res, Err(MimirError::ZoneNotFound(zone)) if zone == "missingZone"));
        assert_eq!(node.messaging.invocation_count(), 0);
    }

    #[tokio::test]
    async fn partition_states_merges_and_normalizes_reports() {
        let meta = Arc::new(MemMetaStorage::new());
        let (net, catalog, topo) = (LocalNetwork::new(), catalog(), topology(&["a", "b"]));
        let a = start_node("a", meta.clone(), &net, catalog.clone(), topo.clone()).await;
        let b = start_node("b", meta, &net, catalog, topo).await;

        a.groups.upsert(partition(7, 0), view(RaftNodeState::Leader, 100, false));
        a.groups.upsert(partition(7, 1), view(RaftNodeState::Follower, 0, false));
        a.groups.upsert(partition(9, 0), view(RaftNodeState::Leader, 5, false));
        a.groups.upsert(ReplicationGroupId::System("metastorage".into()), view(RaftNodeState::Leader, 50, false));
        b.groups.upsert(partition(7, 0), view(RaftNodeState::Follower, 85, false));
        b.groups.upsert(partition(7, 1), view(RaftNodeState::Leader, 3, true));

        let states = a.manager.partition_states("default").await.unwrap();

        assert_eq!(a.messaging.invocation_count(), 2);
        assert_eq!(states.len(), 2, "zone 2 and system groups must be filtered out");

        let p0 = &states[&TablePartitionId::new(7, 0)];
        assert_eq!(p0["a"].state, LocalPartitionStateEnum::Healthy);
        assert_eq!(p0["b"].state, LocalPartitionStateEnum::CatchingUp);
        assert_eq!(p0["b"].log_index, 85);

        let p1 = &states[&TablePartitionId::new(7, 1)];
        assert_eq!(p1["a"].state, LocalPartitionStateEnum::Initializing);
        assert_eq!(p1["b"].state, LocalPartitionStateEnum::InstallingSnapshot);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_and_missing_nodes_only_shrink_the_result() {
        let meta = Arc::new(MemMetaStorage::new());
        let (net, catalog, topo) = (LocalNetwork::new(), catalog(), topology(&["a", "b", "c", "d"]));
        let a = start_node("a", meta.clone(), &net, catalog.clone(), topo.clone()).await;
        let b = start_node("b", meta, &net, catalog, topo).await;
        // `c` is reachable but never answers; `d` has left the network.
        let _c = net.join("c");
        let _d = net.join("d");
        net.leave("d");

        a.groups.upsert(partition(7, 0), view(RaftNodeState::Leader, 100, false));
        b.groups.upsert(partition(7, 0), view(RaftNodeState::Follower, 95, false));

        let started = tokio::time::Instant::now();
        let states = a.manager.partition_states("default").await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed < Duration::from_secs(31));
        let p0 = &states[&TablePartitionId::new(7, 0)];
        assert_eq!(p0.keys().cloned().collect::<Vec<_>>(), vec!["a".to_string(), "b".to_string()]);
        assert!(p0.values().all(|s| s.state == LocalPartitionStateEnum::Healthy));
    }

    #[tokio::test]
    async fn probe_waits_for_the_requested_catalog_version() {
        let meta = Arc::new(MemMetaStorage::new());
        let net = LocalNetwork::new();
        let topo = topology(&["a", "b"]);

        let v1 = CatalogSnapshot::new(1).with_zone(1, "default", 1, 3);
        let v2 = v1.clone().with_table(7, "accounts", 1);
        let v2 = CatalogSnapshot { version: 2, ..v2 };

        let catalog_a = Arc::new(MemCatalog::new());
        catalog_a.publish(v1.clone()).unwrap();
        catalog_a.publish(v2.clone()).unwrap();
        let catalog_b = Arc::new(MemCatalog::new());
        catalog_b.publish(v1).unwrap();

        let a = start_node("a", meta.clone(), &net, catalog_a, topo.clone()).await;
        let b = start_node("b", meta, &net, catalog_b.clone(), topo).await;
        a.groups.upsert(partition(7, 0), view(RaftNodeState::Leader, 10, false));
        b.groups.upsert(partition(7, 0), view(RaftNodeState::Follower, 10, false));

        let manager = a.manager.clone();
        let collect = tokio::spawn(async move { manager.partition_states("default").await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!collect.is_finished(), "b must not answer from catalog version 1");

        catalog_b.publish(v2).unwrap();
        let states = collect.await.unwrap().unwrap();
        assert_eq!(states[&TablePartitionId::new(7, 0)].len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn responder_gives_up_on_a_catalog_version_it_never_reaches() {
        let meta = Arc::new(MemMetaStorage::new());
        let net = LocalNetwork::new();
        let topo = topology(&["a", "b"]);

        let v1 = CatalogSnapshot::new(1).with_zone(1, "default", 1, 3);
        let v2 = CatalogSnapshot { version: 2, ..v1.clone().with_table(7, "accounts", 1) };
        let catalog_a = Arc::new(MemCatalog::new());
        catalog_a.publish(v1.clone()).unwrap();
        catalog_a.publish(v2).unwrap();
        let catalog_b = Arc::new(MemCatalog::new());
        catalog_b.publish(v1).unwrap();

        let a = start_node("a", meta.clone(), &net, catalog_a, topo.clone()).await;
        let _b = start_node("b", meta, &net, catalog_b, topo).await;
        a.groups.upsert(partition(7, 0), view(RaftNodeState::Leader, 10, false));

        let metrics = tokio::runtime::Handle::current().metrics();
        let alive_before = metrics.num_alive_tasks();

        for _ in 0..3 {
            let states = a.manager.partition_states("default").await.unwrap();
            let p0 = &states[&TablePartitionId::new(7, 0)];
            assert_eq!(p0.keys().cloned().collect::<Vec<_>>(), vec!["a".to_string()]);
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(metrics.num_alive_tasks(), alive_before, "b must not keep waiting for catalog version 2");
    }

    #[tokio::test(start_paused = true)]
    async fn closed_catalog_releases_a_waiting_responder() {
        let meta = Arc::new(MemMetaStorage::new());
        let net = LocalNetwork::new();
        let topo = topology(&["a", "b"]);

        let v1 = CatalogSnapshot::new(1).with_zone(1, "default", 1, 3);
        let catalog_a = Arc::new(MemCatalog::new());
        catalog_a.publish(v1.clone()).unwrap();
        catalog_a.publish(CatalogSnapshot { version: 2, ..v1.clone() }).unwrap();
        let catalog_b = Arc::new(MemCatalog::new());
        catalog_b.publish(v1).unwrap();

        let a = start_node("a", meta.clone(), &net, catalog_a, topo.clone()).await;
        let _b = start_node("b", meta, &net, catalog_b.clone(), topo).await;

        let metrics = tokio::runtime::Handle::current().metrics();
        let alive_before = metrics.num_alive_tasks();

        let manager = a.manager.clone();
        let collect = tokio::spawn(async move { manager.partition_states("default").await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        // The collector itself plus b's responder waiting for version 2.
        assert_eq!(metrics.num_alive_tasks(), alive_before + 2);

        catalog_b.version_tracker().close();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(metrics.num_alive_tasks(), alive_before + 1);

        // b never answers, so the collector still runs into its own timeout.
        assert!(collect.await.unwrap().unwrap().is_empty());
    }
}
