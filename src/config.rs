use clap::Parser;
use thiserror::Error;

use crate::bus::DEFAULT_EXCHANGE;
use crate::presence::{DEFAULT_ROOM_KEY_PREFIX, DEFAULT_SESSION_KEY_PREFIX, RedisKeys};

pub const DEFAULT_PORT: u16 = 9736;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("REDIS_URL and RABBITMQ_URL must be set together (got only {0})")]
    PartialCluster(&'static str),
}

/// tether signaling relay
#[derive(Parser, Clone, Debug)]
#[command(name = "tether", version, about = "Signaling relay for peer-to-peer rooms")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Public address to advertise in logs
    #[arg(long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Redis URL of the shared presence store
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// RabbitMQ URL of the message broker
    #[arg(long, env = "RABBITMQ_URL")]
    pub amqp_url: Option<String>,

    #[arg(long, env = "REDIS_ROOM_KEY_PREFIX", default_value = DEFAULT_ROOM_KEY_PREFIX)]
    pub room_key_prefix: String,

    #[arg(long, env = "REDIS_SESSION_KEY_PREFIX", default_value = DEFAULT_SESSION_KEY_PREFIX)]
    pub session_key_prefix: String,

    /// Direct exchange shared by all relay processes
    #[arg(long, env = "RABBITMQ_EXCHANGE", default_value = DEFAULT_EXCHANGE)]
    pub exchange: String,

    /// Enable structured JSON logging
    #[arg(long, env = "TETHER_JSON_LOGS")]
    pub json_logs: bool,
}

/// Where presence lives and how messages travel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    /// In-memory store and loopback bus
    Local,
    Cluster {
        redis_url: String,
        amqp_url: String,
        keys: RedisKeys,
        exchange: String,
    },
}

impl Config {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn topology(&self) -> Result<Topology, ConfigError> {
        match (&self.redis_url, &self.amqp_url) {
            (None, None) => Ok(Topology::Local),
            (Some(redis_url), Some(amqp_url)) => Ok(Topology::Cluster {
                redis_url: redis_url.clone(),
                amqp_url: amqp_url.clone(),
                keys: RedisKeys {
                    room_prefix: self.room_key_prefix.clone(),
                    session_prefix: self.session_key_prefix.clone(),
                },
                exchange: self.exchange.clone(),
            }),
            (Some(_), None) => Err(ConfigError::PartialCluster("REDIS_URL")),
            (None, Some(_)) => Err(ConfigError::PartialCluster("RABBITMQ_URL")),
        }
    }
}
