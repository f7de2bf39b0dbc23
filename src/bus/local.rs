use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{BusError, Delivery, Handler, Message, MessageBus, Subscribers};
use crate::identity::{ConnectionId, RoomId};
use crate::presence::PresenceStore;

/// Loopback bus for single-process deployments: every destination is this
/// process, so sends go straight to the handlers.
///
/// Point-to-point sends still check the routing table, so a connection that
/// never joined or already left gets nothing, as on the broker bus.
pub struct LocalBus {
    store: Arc<dyn PresenceStore>,
    subscribers: Subscribers,
}

impl LocalBus {
    pub fn new(store: Arc<dyn PresenceStore>) -> Self {
        Self {
            store,
            subscribers: Subscribers::default(),
        }
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn send_to_connection(
        &self,
        connection: &ConnectionId,
        message: Message,
    ) -> Result<Delivery, BusError> {
        if self.store.get_routing(connection).await?.is_none() {
            debug!(connection_id = %connection, "No route, dropping message");
            return Ok(Delivery::Unrouted);
        }

        debug!(connection_id = %connection, command = %message.command, "Local send");
        self.subscribers
            .dispatch(&message.addressed_to(connection.as_str()));
        Ok(Delivery::Published)
    }

    async fn broadcast_to_room(&self, room: &RoomId, message: Message) -> Result<(), BusError> {
        debug!(room_id = %room, command = %message.command, "Local broadcast");
        self.subscribers.dispatch(&message.addressed_to(room.as_str()));
        Ok(())
    }

    fn subscribe(&self, handler: Handler) {
        self.subscribers.push(handler);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::bus::Envelope;
    use crate::identity::ServerId;
    use crate::presence::InMemoryPresenceStore;

    fn bus() -> (LocalBus, Arc<InMemoryPresenceStore>) {
        let store = Arc::new(InMemoryPresenceStore::new());
        (LocalBus::new(store.clone()), store)
    }

    fn recording(bus: &LocalBus) -> Arc<Mutex<Vec<Envelope>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(Arc::new(move |e: &Envelope| sink.lock().unwrap().push(e.clone())));
        seen
    }

    #[tokio::test]
    async fn delivers_synchronously_with_destination() {
        let (bus, store) = bus();
        let seen = recording(&bus);
        store
            .set_routing(&ConnectionId::from("conn_b"), &ServerId::generate())
            .await
            .unwrap();

        bus.broadcast_to_room(&RoomId::from("ABCD"), Message::new("setTag", vec![json!(2)]))
            .await
            .unwrap();
        let delivery = bus
            .send_to_connection(&ConnectionId::from("conn_b"), Message::new("signal", vec![]))
            .await
            .unwrap();

        assert_eq!(delivery, Delivery::Published);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].to, "ABCD");
        assert_eq!(seen[0].command, "setTag");
        assert_eq!(seen[1].to, "conn_b");
    }

    #[tokio::test]
    async fn send_without_route_reaches_nobody() {
        let (bus, _store) = bus();
        let seen = recording(&bus);

        let delivery = bus
            .send_to_connection(&ConnectionId::from("conn_nobody"), Message::new("signal", vec![]))
            .await
            .unwrap();

        assert_eq!(delivery, Delivery::Unrouted);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn every_handler_sees_every_message() {
        let (bus, _store) = bus();
        let count = Arc::new(Mutex::new(0));
        for _ in 0..2 {
            let count = count.clone();
            bus.subscribe(Arc::new(move |_: &Envelope| *count.lock().unwrap() += 1));
        }

        bus.broadcast_to_room(&RoomId::from("ABCD"), Message::new("join", vec![]))
            .await
            .unwrap();
        assert_eq!(*count.lock().unwrap(), 2);
    }
}
