use std::sync::Arc;

use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::events::{ClientEvent, Frame, OutboundMessage, ProtocolViolation};
use super::relay::Relay;
use crate::bus::{Delivery, Message};
use crate::identity::{ClientTag, ConnectionId, RoomId};
use crate::presence::{ConnectionSnapshot, PresenceError};

/// Reasons a session is terminated
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    #[error("setTag sent before joining a room")]
    NotInRoom,

    #[error(transparent)]
    Presence(#[from] PresenceError),
}

/// `Unjoined -> Joined -> Identified`; any state can move to `Closed`.
/// A `join` never moves a session backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unjoined,
    Joined,
    Identified,
    Closed,
}

/// Gateway state for one live connection.
///
/// Events must be fed in arrival order; an `Err` from [`Session::handle`]
/// means the transport should drop the connection and call
/// [`Session::close`].
pub struct Session {
    relay: Arc<Relay>,
    me: ConnectionSnapshot,
    state: SessionState,
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Session {
    pub(crate) fn new(
        relay: Arc<Relay>,
        id: ConnectionId,
        tx: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Self {
        let me = ConnectionSnapshot::new(id, relay.server_id().clone());
        Self {
            relay,
            me,
            state: SessionState::Unjoined,
            tx,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.me.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn room(&self) -> Option<&RoomId> {
        self.me.room_id.as_ref()
    }

    /// Parse and handle one text frame
    pub async fn handle_text(&mut self, text: &str) -> Result<(), SessionError> {
        match ClientEvent::parse(text)? {
            Some(event) => self.handle(event).await,
            None => {
                debug!(connection_id = %self.me.id, "Ignoring unknown event: {}", text);
                Ok(())
            }
        }
    }

    pub async fn handle(&mut self, event: ClientEvent) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        match event {
            ClientEvent::Join { code, tag } => self.join(code, tag).await,
            ClientEvent::SetTag { tag } => self.set_tag(tag).await,
            ClientEvent::LeaveRoom => {
                self.leave_room();
                Ok(())
            }
            ClientEvent::Signal { data, to } => {
                self.signal(data, to).await;
                Ok(())
            }
        }
    }

    async fn join(&mut self, code: RoomId, tag: ClientTag) -> Result<(), SessionError> {
        if let Some(previous) = self.me.room_id.clone() {
            if previous != code {
                self.relay.local.leave_group(&previous, &self.me.id);
                self.relay.store.remove_member(&previous, &self.me.id).await?;
                debug!(connection_id = %self.me.id, room_id = %previous, "Left previous room");
            }
        }

        self.me.room_id = Some(code.clone());
        self.me.client_tag = Some(tag);

        let members = self.relay.store.list_members(&code).await?;
        let ids: Map<String, Value> = members
            .into_iter()
            .filter(|member| member.id != self.me.id)
            .map(|member| (member.id.to_string(), json!(member.client_tag)))
            .collect();
        self.emit(Frame::new("setIds", vec![Value::Object(ids)]));

        self.relay.local.join_group(&code, &self.me.id);
        self.relay.store.upsert_member(&code, &self.me).await?;
        self.relay
            .store
            .set_routing(&self.me.id, self.relay.server_id())
            .await?;
        // a re-join keeps Identified
        if self.state == SessionState::Unjoined {
            self.state = SessionState::Joined;
        }
        info!(connection_id = %self.me.id, room_id = %code, tag, "Joined room");

        let message = Message::new("join", vec![json!(self.me.id), json!(tag)]);
        if let Err(e) = self.relay.bus.broadcast_to_room(&code, message).await {
            warn!(connection_id = %self.me.id, room_id = %code, "Join broadcast failed: {}", e);
        }
        Ok(())
    }

    async fn set_tag(&mut self, tag: ClientTag) -> Result<(), SessionError> {
        let Some(room) = self.me.room_id.clone() else {
            return Err(SessionError::NotInRoom);
        };

        self.me.client_tag = Some(tag);
        self.relay.store.upsert_member(&room, &self.me).await?;
        self.state = SessionState::Identified;
        debug!(connection_id = %self.me.id, room_id = %room, tag, "Tag set");

        let message = Message::new("setTag", vec![json!(tag)]);
        if let Err(e) = self.relay.bus.broadcast_to_room(&room, message).await {
            warn!(connection_id = %self.me.id, room_id = %room, "setTag broadcast failed: {}", e);
        }
        Ok(())
    }

    /// Stops local room deliveries only; the store keeps the membership
    /// until the connection closes.
    fn leave_room(&mut self) {
        if let Some(room) = &self.me.room_id {
            self.relay.local.leave_group(room, &self.me.id);
            debug!(connection_id = %self.me.id, room_id = %room, "Left local room group");
        }
    }

    async fn signal(&mut self, data: Value, to: ConnectionId) {
        let message = Message::new("signal", vec![json!({ "data": data, "from": self.me.id })]);
        match self.relay.bus.send_to_connection(&to, message).await {
            Ok(Delivery::Published) => {}
            Ok(Delivery::Unrouted) => {
                debug!(connection_id = %self.me.id, to = %to, "Signal target not connected")
            }
            Err(e) => warn!(connection_id = %self.me.id, to = %to, "Signal failed: {}", e),
        }
    }

    /// Disconnect transition. Cleanup failures are logged, not returned;
    /// calling it again is a no-op.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.relay.release(&self.me.id, self.me.room_id.as_ref());

        if let Some(room) = &self.me.room_id {
            if let Err(e) = self.relay.store.remove_member(room, &self.me.id).await {
                warn!(connection_id = %self.me.id, room_id = %room, "Failed to remove member: {}", e);
            }
        }
        if let Err(e) = self.relay.store.clear_routing(&self.me.id).await {
            warn!(connection_id = %self.me.id, "Failed to clear routing: {}", e);
        }
    }

    fn emit(&self, frame: Frame) {
        let _ = self.tx.send(frame.to_outbound());
    }
}
