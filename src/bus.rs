//! Message bus: delivers commands to a room or to a single connection,
//! wherever the recipients are attached.
//!
//! Delivery is at-most-once. Nothing is acknowledged, retried or persisted,
//! and there is no ordering guarantee between messages bound for different
//! processes.

mod amqp;
mod broker;
mod local;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::identity::{ConnectionId, RoomId};
use crate::presence::PresenceError;

pub use amqp::{AmqpBroker, DEFAULT_EXCHANGE};
pub use broker::{Broker, BrokerBus};
pub use local::LocalBus;

/// Message bus errors
#[derive(Debug, Error)]
pub enum BusError {
    #[error("message bus unavailable: {0}")]
    Unavailable(#[from] lapin::Error),

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("destination lookup failed: {0}")]
    Presence(#[from] PresenceError),
}

/// Command relayed to clients
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub command: String,
    pub args: Vec<Value>,
}

impl Message {
    pub fn new(command: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn addressed_to(self, to: impl Into<String>) -> Envelope {
        Envelope {
            to: to.into(),
            command: self.command,
            args: self.args,
        }
    }
}

/// A [`Message`] tagged with its destination: a room id or a connection id.
/// This is also the broker wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub to: String,
    pub command: String,
    pub args: Vec<Value>,
}

/// Outcome of a point-to-point send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Published,
    /// No routing entry: the target disconnected or never joined.
    Unrouted,
}

/// Callback run for every envelope addressed to this process
pub type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn send_to_connection(
        &self,
        connection: &ConnectionId,
        message: Message,
    ) -> Result<Delivery, BusError>;

    async fn broadcast_to_room(&self, room: &RoomId, message: Message) -> Result<(), BusError>;

    /// Handlers run in registration order.
    fn subscribe(&self, handler: Handler);
}

/// Registered handlers of one bus
#[derive(Default)]
pub(crate) struct Subscribers {
    handlers: RwLock<Vec<Handler>>,
}

impl Subscribers {
    pub(crate) fn push(&self, handler: Handler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub(crate) fn dispatch(&self, envelope: &Envelope) {
        // clone out so a handler may subscribe without deadlocking
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler(envelope);
        }
    }
}
