use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;

use mimir_types::{MessageGroup, MimirError, NetworkMessage, NodeName};

pub type CorrelationId = u64;

/// Receives requests addressed to a `MessageGroup`.
///
/// Called on the transport path: implementations must hand any slow work off to a task
/// and answer later through `MessagingService::respond`.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(&self, message: NetworkMessage, sender: NodeName, correlation_id: Option<CorrelationId>);
}

/// Request/response transport between cluster members.
pub trait MessagingService: Send + Sync + 'static {
    /// Send `message` to `recipient` and wait for the correlated response.
    fn invoke(&self, recipient: &str, message: NetworkMessage, timeout: Duration)
        -> impl Future<Output = Result<NetworkMessage, MimirError>> + Send;

    /// Answer a request previously delivered to a `MessageHandler`.
    fn respond(&self, recipient: &str, message: NetworkMessage, correlation_id: CorrelationId)
        -> impl Future<Output = Result<(), MimirError>> + Send;

    fn add_message_handler(&self, group: MessageGroup, handler: Arc<dyn MessageHandler>);
}

/// Outstanding requests awaiting a response, keyed by correlation id.
#[derive(Default)]
pub struct CorrelationTable {
    next_id: AtomicU64,
    pending: DashMap<CorrelationId, oneshot::Sender<NetworkMessage>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> (CorrelationId, oneshot::Receiver<NetworkMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        (id, rx)
    }

    /// Returns `false` when nobody is waiting any more (late or duplicate response).
    pub fn complete(&self, id: CorrelationId, message: NetworkMessage) -> bool {
        match self.pending.remove(&id) {
            Some((_, tx)) => tx.send(message).is_ok(),
            None => false,
        }
    }

    pub fn forget(&self, id: CorrelationId) {
        self.pending.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Group handlers registered on one node.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<MessageGroup, Vec<Arc<dyn MessageHandler>>>,
}

impl HandlerRegistry {
    pub fn add(&self, group: MessageGroup, handler: Arc<dyn MessageHandler>) {
        self.handlers.entry(group).or_default().push(handler);
    }

    /// Returns `false` when no handler is registered for the message's group.
    pub fn dispatch(
        &self,
        message: NetworkMessage,
        sender: NodeName,
        correlation_id: Option<CorrelationId>,
    ) -> bool {
        // Clone out of the map so handlers never run under a shard lock.
        let handlers = match self.handlers.get(&message.group()) {
            Some(h) => h.clone(),
            None => return false,
        };
        for handler in &handlers {
            handler.on_message(message.clone(), sender.clone(), correlation_id);
        }
        !handlers.is_empty()
    }
}

#[derive(Default)]
struct LocalEndpoint {
    handlers: HandlerRegistry,
    correlations: CorrelationTable,
    invocations: AtomicUsize,
}

/// In-process network connecting any number of named nodes.
///
/// A node that joined but registered no handler swallows requests, which makes it
/// behave like a hung peer: callers only get their timeout.
#[derive(Default)]
pub struct LocalNetwork {
    nodes: DashMap<NodeName, Arc<LocalEndpoint>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn join(self: &Arc<Self>, name: impl Into<NodeName>) -> LocalMessagingService {
        let name = name.into();
        let endpoint = Arc::new(LocalEndpoint::default());
        self.nodes.insert(name.clone(), endpoint.clone());
        LocalMessagingService { name, network: self.clone(), endpoint }
    }

    /// Drop a node: requests to it fail fast with `NodeUnreachable`.
    pub fn leave(&self, name: &str) {
        self.nodes.remove(name);
    }

    fn endpoint(&self, name: &str) -> Result<Arc<LocalEndpoint>, MimirError> {
        self.nodes
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| MimirError::NodeUnreachable(name.to_string()))
    }
}

/// One node's view of a `LocalNetwork`.
pub struct LocalMessagingService {
    name: NodeName,
    network: Arc<LocalNetwork>,
    endpoint: Arc<LocalEndpoint>,
}

impl LocalMessagingService {
    pub fn node_name(&self) -> &str {
        &self.name
    }

    /// Number of `invoke` calls issued from this node.
    pub fn invocation_count(&self) -> usize {
        self.endpoint.invocations.load(Ordering::SeqCst)
    }
}

impl MessagingService for LocalMessagingService {
    async fn invoke(
        &self,
        recipient: &str,
        message: NetworkMessage,
        timeout: Duration,
    ) -> Result<NetworkMessage, MimirError> {
        self.endpoint.invocations.fetch_add(1, Ordering::SeqCst);
        let target = self.network.endpoint(recipient)?;

        let (correlation_id, rx) = self.endpoint.correlations.register();
        if !target.handlers.dispatch(message, self.name.clone(), Some(correlation_id)) {
            tracing::debug!(recipient, correlation_id, "no handler for message group");
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(MimirError::Transport(format!("{recipient} dropped the request"))),
            Err(_) => {
                self.endpoint.correlations.forget(correlation_id);
                Err(MimirError::Timeout)
            }
        }
    }

    async fn respond(
        &self,
        recipient: &str,
        message: NetworkMessage,
        correlation_id: CorrelationId,
    ) -> Result<(), MimirError> {
        let target = self.network.endpoint(recipient)?;
        if !target.correlations.complete(correlation_id, message) {
            tracing::debug!(recipient, correlation_id, "response arrived after the caller gave up");
        }
        Ok(())
    }

    fn add_message_handler(&self, group: MessageGroup, handler: Arc<dyn MessageHandler>) {
        self.endpoint.handlers.add(group, handler);
    }
}
