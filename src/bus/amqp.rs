use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::{Broker, BusError};
use crate::identity::ServerId;

pub const DEFAULT_EXCHANGE: &str = "tether";

/// RabbitMQ publisher bound to a direct exchange.
///
/// On connect the process declares its own exclusive, auto-deleted queue,
/// binds it under its server id and starts consuming without acks.
pub struct AmqpBroker {
    // keeps the connection open for the lifetime of the broker
    _connection: Connection,
    channel: Channel,
    exchange: String,
}

impl AmqpBroker {
    pub async fn connect(
        url: &str,
        exchange: &str,
        server_id: &ServerId,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Vec<u8>>), BusError> {
        // run lapin's IO and background tasks on the tokio runtime
        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);
        let connection = Connection::connect(url, properties).await?;
        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let queue_name = format!("{}.{}", exchange, server_id);
        let queue = channel
            .queue_declare(
                &queue_name,
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_bind(
                queue.name().as_str(),
                exchange,
                server_id.as_str(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let mut consumer = channel
            .basic_consume(
                queue.name().as_str(),
                server_id.as_str(),
                BasicConsumeOptions {
                    no_ack: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(
            exchange = %exchange,
            queue = %queue.name(),
            server_id = %server_id,
            "Bound to AMQP exchange"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        if tx.send(delivery.data).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("AMQP consumer failed: {}", e);
                        break;
                    }
                }
            }
            warn!("AMQP consumer stopped");
        });

        Ok((
            Self {
                _connection: connection,
                channel,
                exchange: exchange.to_string(),
            },
            rx,
        ))
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn publish(&self, server: &ServerId, payload: Vec<u8>) -> Result<(), BusError> {
        // no publisher confirms: delivery is at-most-once
        self.channel
            .basic_publish(
                &self.exchange,
                server.as_str(),
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await?;
        Ok(())
    }
}
