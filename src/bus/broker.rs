use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{BusError, Delivery, Envelope, Handler, Message, MessageBus, Subscribers};
use crate::identity::{ConnectionId, RoomId, ServerId};
use crate::presence::{PresenceStore, distinct_owners};

/// Publishing side of a direct exchange keyed by server identity
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, server: &ServerId, payload: Vec<u8>) -> Result<(), BusError>;
}

/// Bus for multi-process deployments.
///
/// Destinations are resolved through the presence store and every message is
/// published to the owning process's routing key. Inbound payloads for this
/// process arrive on a single channel and are dispatched to the handlers by
/// one pump task.
pub struct BrokerBus<B> {
    server_id: ServerId,
    store: Arc<dyn PresenceStore>,
    broker: B,
    subscribers: Arc<Subscribers>,
}

impl<B: Broker> BrokerBus<B> {
    /// Must be called inside a tokio runtime; spawns the inbound pump.
    pub fn new(
        server_id: ServerId,
        store: Arc<dyn PresenceStore>,
        broker: B,
        inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        let subscribers = Arc::new(Subscribers::default());
        tokio::spawn(pump_inbound(inbound, subscribers.clone()));

        Self {
            server_id,
            store,
            broker,
            subscribers,
        }
    }

    async fn publish(&self, server: &ServerId, envelope: &Envelope) -> Result<(), BusError> {
        let payload = serde_json::to_vec(envelope)?;
        self.broker.publish(server, payload).await
    }
}

#[async_trait]
impl<B: Broker> MessageBus for BrokerBus<B> {
    async fn send_to_connection(
        &self,
        connection: &ConnectionId,
        message: Message,
    ) -> Result<Delivery, BusError> {
        let Some(owner) = self.store.get_routing(connection).await? else {
            debug!(connection_id = %connection, "No route, dropping message");
            return Ok(Delivery::Unrouted);
        };

        let envelope = message.addressed_to(connection.as_str());
        self.publish(&owner, &envelope).await?;
        debug!(
            connection_id = %connection,
            server_id = %owner,
            command = %envelope.command,
            "Published to connection"
        );
        Ok(Delivery::Published)
    }

    async fn broadcast_to_room(&self, room: &RoomId, message: Message) -> Result<(), BusError> {
        let members = self.store.list_members(room).await?;
        let owners = distinct_owners(&members);
        let envelope = message.addressed_to(room.as_str());

        for owner in &owners {
            self.publish(owner, &envelope).await?;
        }
        debug!(
            room_id = %room,
            from = %self.server_id,
            members = members.len(),
            processes = owners.len(),
            command = %envelope.command,
            "Published to room"
        );
        Ok(())
    }

    fn subscribe(&self, handler: Handler) {
        self.subscribers.push(handler);
    }
}

async fn pump_inbound(mut rx: mpsc::UnboundedReceiver<Vec<u8>>, subscribers: Arc<Subscribers>) {
    while let Some(payload) = rx.recv().await {
        match serde_json::from_slice::<Envelope>(&payload) {
            Ok(envelope) => subscribers.dispatch(&envelope),
            Err(e) => warn!("Dropping malformed bus payload: {}", e),
        }
    }
    info!("Inbound bus channel closed");
}
