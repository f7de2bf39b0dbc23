use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::events::{Frame, OutboundMessage};
use super::session::Session;
use crate::bus::{Envelope, MessageBus};
use crate::identity::{ConnectionId, RoomId, ServerId};
use crate::presence::PresenceStore;

/// Connections attached to this process and their local room groups
#[derive(Debug, Default)]
pub(crate) struct LocalDelivery {
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<OutboundMessage>>,
    groups: DashMap<RoomId, HashSet<ConnectionId>>,
}

impl LocalDelivery {
    /// Re-emit a bus envelope to the local connection or room group it names.
    /// Connection ids resolve against connections only, anything else against
    /// room groups only.
    pub(crate) fn deliver(&self, envelope: &Envelope) {
        let msg = Frame::from(envelope).to_outbound();

        if ConnectionId::is_connection_id(&envelope.to) {
            match self.connections.get(envelope.to.as_str()) {
                Some(tx) => {
                    let _ = tx.send(msg);
                }
                None => debug!(
                    to = %envelope.to,
                    command = %envelope.command,
                    "Connection not attached here"
                ),
            }
            return;
        }

        let Some(group) = self.groups.get(envelope.to.as_str()) else {
            debug!(to = %envelope.to, command = %envelope.command, "No local recipients");
            return;
        };
        for id in group.iter() {
            if let Some(tx) = self.connections.get(id) {
                let _ = tx.send(msg.clone());
            }
        }
    }

    pub(crate) fn join_group(&self, room: &RoomId, connection: &ConnectionId) {
        self.groups
            .entry(room.clone())
            .or_default()
            .insert(connection.clone());
    }

    pub(crate) fn leave_group(&self, room: &RoomId, connection: &ConnectionId) {
        let emptied = match self.groups.get_mut(room) {
            Some(mut members) => {
                members.remove(connection);
                members.is_empty()
            }
            None => false,
        };
        if emptied {
            self.groups.remove_if(room, |_, members| members.is_empty());
        }
    }

    fn attach(&self, connection: ConnectionId, tx: mpsc::UnboundedSender<OutboundMessage>) {
        self.connections.insert(connection, tx);
    }

    fn detach(&self, connection: &ConnectionId, room: Option<&RoomId>) {
        self.connections.remove(connection);
        if let Some(room) = room {
            self.leave_group(room, connection);
        }
    }
}

/// Process-wide relay state, created once at startup.
///
/// Owns this process's identity, the presence store and message bus chosen
/// for the deployment, the locally attached connections, and the live
/// connection count.
pub struct Relay {
    server_id: ServerId,
    pub(crate) store: Arc<dyn PresenceStore>,
    pub(crate) bus: Arc<dyn MessageBus>,
    pub(crate) local: Arc<LocalDelivery>,
    live: AtomicUsize,
}

impl Relay {
    /// Subscribes local delivery to `bus`.
    pub fn new(
        server_id: ServerId,
        store: Arc<dyn PresenceStore>,
        bus: Arc<dyn MessageBus>,
    ) -> Arc<Self> {
        let local = Arc::new(LocalDelivery::default());
        let sink = local.clone();
        bus.subscribe(Arc::new(move |envelope: &Envelope| sink.deliver(envelope)));

        info!(server_id = %server_id, "Relay started");
        Arc::new(Self {
            server_id,
            store,
            bus,
            local,
            live: AtomicUsize::new(0),
        })
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Attach a new connection; events for it will be written to `tx`.
    pub fn connect(
        self: &Arc<Self>,
        id: ConnectionId,
        tx: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Session {
        self.local.attach(id.clone(), tx.clone());
        let total = self.live.fetch_add(1, Ordering::Relaxed) + 1;
        info!(connection_id = %id, "Total connected: {}", total);
        Session::new(self.clone(), id, tx)
    }

    pub(crate) fn release(&self, id: &ConnectionId, room: Option<&RoomId>) {
        self.local.detach(id, room);
        let total = self.live.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        info!(connection_id = %id, "Total connected: {}", total);
    }
}
