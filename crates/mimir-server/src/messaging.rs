use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mimir_cluster::{CorrelationId, CorrelationTable, HandlerRegistry, MessageHandler, MessagingService};
use mimir_proto::v1::{
    cluster_messaging_client::ClusterMessagingClient, cluster_messaging_server::ClusterMessaging, Envelope,
};
use mimir_types::{MessageGroup, MimirError, NetworkMessage, NodeName};
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status};

use crate::convert::{decode_envelope, encode_envelope, mimir_to_status, status_to_mimir};

/// `MessagingService` over the `ClusterMessaging` gRPC service.
///
/// Every `invoke` is one unary `Invoke` call. The receiving node hands the request to its
/// handlers under a fresh correlation id and keeps the RPC open until a handler answers
/// through `respond`, or until `inbound_timeout` elapses. Requests to the local node skip
/// the network.
pub struct GrpcMessagingService {
    name: NodeName,
    peers: DashMap<NodeName, String>,
    channels: DashMap<NodeName, Channel>,
    handlers: HandlerRegistry,
    inbound: CorrelationTable,
    inbound_timeout: Duration,
}

impl GrpcMessagingService {
    pub fn new(
        name: impl Into<NodeName>,
        peers: impl IntoIterator<Item = (NodeName, String)>,
        inbound_timeout: Duration,
    ) -> Self {
        GrpcMessagingService {
            name: name.into(),
            peers: peers.into_iter().collect(),
            channels: DashMap::new(),
            handlers: HandlerRegistry::default(),
            inbound: CorrelationTable::new(),
            inbound_timeout,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.name
    }

    /// Adds or re-addresses a peer. An existing connection to it is dropped.
    pub fn add_peer(&self, name: impl Into<NodeName>, addr: impl Into<String>) {
        let name = name.into();
        self.channels.remove(&name);
        self.peers.insert(name, addr.into());
    }

    /// Requests received but not yet answered.
    pub fn inbound_in_flight(&self) -> usize {
        self.inbound.len()
    }

    fn channel(&self, recipient: &str) -> Result<Channel, MimirError> {
        if let Some(channel) = self.channels.get(recipient) {
            return Ok(channel.clone());
        }
        let addr = self
            .peers
            .get(recipient)
            .map(|a| a.value().clone())
            .ok_or_else(|| MimirError::NodeUnreachable(recipient.to_string()))?;
        let endpoint = Endpoint::from_shared(format!("http://{addr}"))
            .map_err(|e| MimirError::Transport(format!("invalid address {addr} for {recipient}: {e}")))?;
        let channel = endpoint.connect_lazy();
        self.channels.insert(recipient.to_string(), channel.clone());
        Ok(channel)
    }

    /// Receiving side of one `Invoke`.
    pub(crate) async fn handle_inbound(&self, envelope: Envelope) -> Result<Envelope, MimirError> {
        let message = decode_envelope(&envelope)?;
        let group = message.group();

        let (correlation_id, rx) = self.inbound.register();
        let _pending = InboundGuard { table: &self.inbound, correlation_id };
        if !self.handlers.dispatch(message, envelope.sender, Some(correlation_id)) {
            return Err(MimirError::UnexpectedMessage(format!("no handler for group {group:?}")));
        }

        let response = match tokio::time::timeout(self.inbound_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(MimirError::Cancelled),
            Err(_) => return Err(MimirError::Timeout),
        };
        encode_envelope(&self.name, &response)
    }
}

/// Drops the correlation entry when the inbound call ends, answered or not.
struct InboundGuard<'a> {
    table: &'a CorrelationTable,
    correlation_id: CorrelationId,
}

impl Drop for InboundGuard<'_> {
    fn drop(&mut self) {
        self.table.forget(self.correlation_id);
    }
}

impl MessagingService for GrpcMessagingService {
    async fn invoke(
        &self,
        recipient: &str,
        message: NetworkMessage,
        timeout: Duration,
    ) -> Result<NetworkMessage, MimirError> {
        let envelope = encode_envelope(&self.name, &message)?;
        let call = async {
            if recipient == self.name {
                return self.handle_inbound(envelope).await;
            }
            let mut client = ClusterMessagingClient::new(self.channel(recipient)?);
            let mut request = Request::new(envelope);
            request.set_timeout(timeout);
            client
                .invoke(request)
                .await
                .map(Response::into_inner)
                .map_err(|status| status_to_mimir(recipient, status))
        };

        let response = tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| MimirError::Timeout)??;
        decode_envelope(&response)
    }

    async fn respond(
        &self,
        recipient: &str,
        message: NetworkMessage,
        correlation_id: CorrelationId,
    ) -> Result<(), MimirError> {
        // The caller's RPC is still open on this node; the answer travels back on it.
        if !self.inbound.complete(correlation_id, message) {
            tracing::debug!(recipient, correlation_id, "response arrived after the caller gave up");
        }
        Ok(())
    }

    fn add_message_handler(&self, group: MessageGroup, handler: Arc<dyn MessageHandler>) {
        self.handlers.add(group, handler);
    }
}

pub struct ClusterMessagingImpl {
    messaging: Arc<GrpcMessagingService>,
}

impl ClusterMessagingImpl {
    pub fn new(messaging: Arc<GrpcMessagingService>) -> Self {
        ClusterMessagingImpl { messaging }
    }
}

#[tonic::async_trait]
impl ClusterMessaging for ClusterMessagingImpl {
    async fn invoke(&self, request: Request<Envelope>) -> Result<Response<Envelope>, Status> {
        let envelope = request.into_inner();
        let sender = envelope.sender.clone();
        match self.messaging.handle_inbound(envelope).await {
            Ok(response) => Ok(Response::new(response)),
            Err(e) => {
                tracing::debug!(%sender, error = %e, "inbound request failed");
                Err(mimir_to_status(e))
            }
        }
    }
}
