//! In-process stand-in for the broker's direct exchange

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::{Broker, BusError};
use crate::identity::ServerId;

/// Routes payloads to the queue bound under the destination server id.
/// Payloads for unbound ids are dropped, like a broker with no matching
/// binding.
#[derive(Clone, Default)]
pub(crate) struct DirectExchange {
    queues: Arc<DashMap<ServerId, mpsc::UnboundedSender<Vec<u8>>>>,
    published: Arc<Mutex<Vec<ServerId>>>,
}

impl DirectExchange {
    pub(crate) fn bind(&self, server: &ServerId) -> (ExchangeBroker, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queues.insert(server.clone(), tx);
        (
            ExchangeBroker {
                exchange: self.clone(),
            },
            rx,
        )
    }

    pub(crate) fn unbind(&self, server: &ServerId) {
        self.queues.remove(server);
    }

    /// Routing keys of every publish so far
    pub(crate) fn published(&self) -> Vec<ServerId> {
        self.published.lock().unwrap().clone()
    }
}

pub(crate) struct ExchangeBroker {
    exchange: DirectExchange,
}

#[async_trait]
impl Broker for ExchangeBroker {
    async fn publish(&self, server: &ServerId, payload: Vec<u8>) -> Result<(), BusError> {
        self.exchange.published.lock().unwrap().push(server.clone());
        if let Some(queue) = self.exchange.queues.get(server) {
            let _ = queue.send(payload);
        }
        Ok(())
    }
}

/// Broker whose every publish fails, as when the broker channel is gone
pub(crate) struct UnreachableBroker;

#[async_trait]
impl Broker for UnreachableBroker {
    async fn publish(&self, _server: &ServerId, _payload: Vec<u8>) -> Result<(), BusError> {
        let cause = serde_json::from_str::<serde_json::Value>("").unwrap_err();
        Err(BusError::Encode(cause))
    }
}
