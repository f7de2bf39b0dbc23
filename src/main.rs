use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether::bus::{AmqpBroker, BrokerBus, LocalBus, MessageBus};
use tether::config::{Config, Topology};
use tether::gateway::Relay;
use tether::identity::ServerId;
use tether::presence::{InMemoryPresenceStore, PresenceStore, RedisPresenceStore};
use tether::server::RelayServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::parse();
    init_tracing(config.json_logs);

    info!("tether v{} starting", env!("CARGO_PKG_VERSION"));

    let server_id = ServerId::generate();
    let (store, bus): (Arc<dyn PresenceStore>, Arc<dyn MessageBus>) = match config.topology()? {
        Topology::Local => {
            info!("No REDIS_URL/RABBITMQ_URL set, running as a single process");
            let store: Arc<dyn PresenceStore> = Arc::new(InMemoryPresenceStore::new());
            let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new(store.clone()));
            (store, bus)
        }
        Topology::Cluster {
            redis_url,
            amqp_url,
            keys,
            exchange,
        } => {
            let store: Arc<dyn PresenceStore> =
                Arc::new(RedisPresenceStore::connect(&redis_url, keys).await?);
            let (broker, inbound) = AmqpBroker::connect(&amqp_url, &exchange, &server_id).await?;
            let bus: Arc<dyn MessageBus> = Arc::new(BrokerBus::new(
                server_id.clone(),
                store.clone(),
                broker,
                inbound,
            ));
            (store, bus)
        }
    };

    let relay = Relay::new(server_id, store, bus);
    let server = RelayServer::new(relay);

    let listen_addr = config.listen_addr();
    let advertised = config
        .address
        .clone()
        .unwrap_or_else(|| format!("ws://{}", listen_addr));
    info!("Relay address: {}", advertised);

    tokio::select! {
        result = server.run(&listen_addr) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tether=info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }
}
