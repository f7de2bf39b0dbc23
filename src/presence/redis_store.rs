use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{info, warn};

use super::{ConnectionSnapshot, PresenceError, PresenceStore};
use crate::identity::{ConnectionId, RoomId, ServerId};

pub const DEFAULT_ROOM_KEY_PREFIX: &str = "tether:room:";
pub const DEFAULT_SESSION_KEY_PREFIX: &str = "tether:session:";

/// Key layout in Redis.
///
/// Rooms are hashes of `connection id -> snapshot json` under
/// `{room_prefix}{<room>}`, routing entries are strings under
/// `{session_prefix}{<connection>}`. The braces make the id the cluster
/// hash tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisKeys {
    pub room_prefix: String,
    pub session_prefix: String,
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self {
            room_prefix: DEFAULT_ROOM_KEY_PREFIX.to_string(),
            session_prefix: DEFAULT_SESSION_KEY_PREFIX.to_string(),
        }
    }
}

impl RedisKeys {
    pub fn room(&self, room: &RoomId) -> String {
        format!("{}{{{}}}", self.room_prefix, room)
    }

    pub fn session(&self, connection: &ConnectionId) -> String {
        format!("{}{{{}}}", self.session_prefix, connection)
    }
}

/// Presence store shared by every relay process through Redis
#[derive(Clone)]
pub struct RedisPresenceStore {
    conn: ConnectionManager,
    keys: RedisKeys,
}

impl RedisPresenceStore {
    pub async fn connect(url: &str, keys: RedisKeys) -> Result<Self, PresenceError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        info!(
            room_prefix = %keys.room_prefix,
            session_prefix = %keys.session_prefix,
            "Connected to Redis presence store"
        );
        Ok(Self { conn, keys })
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn list_members(&self, room: &RoomId) -> Result<Vec<ConnectionSnapshot>, PresenceError> {
        let key = self.keys.room(room);
        let mut conn = self.conn.clone();
        let entries: HashMap<String, String> = conn.hgetall(&key).await?;

        let members = entries
            .into_iter()
            .filter_map(|(field, raw)| match serde_json::from_str(&raw) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!(key = %key, field = %field, "Skipping unreadable member entry: {}", e);
                    None
                }
            })
            .collect();
        Ok(members)
    }

    async fn upsert_member(
        &self,
        room: &RoomId,
        member: &ConnectionSnapshot,
    ) -> Result<(), PresenceError> {
        let value = serde_json::to_string(member)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(self.keys.room(room), member.id.as_str(), value)
            .await?;
        Ok(())
    }

    async fn remove_member(
        &self,
        room: &RoomId,
        connection: &ConnectionId,
    ) -> Result<(), PresenceError> {
        // Redis deletes a hash once its last field is gone
        let mut conn = self.conn.clone();
        let _: () = conn
            .hdel(self.keys.room(room), connection.as_str())
            .await?;
        Ok(())
    }

    async fn set_routing(
        &self,
        connection: &ConnectionId,
        server: &ServerId,
    ) -> Result<(), PresenceError> {
        // TODO: give routing entries a TTL refreshed by client keepalives so
        // entries of crashed processes expire on their own
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(self.keys.session(connection), server.as_str())
            .await?;
        Ok(())
    }

    async fn get_routing(
        &self,
        connection: &ConnectionId,
    ) -> Result<Option<ServerId>, PresenceError> {
        let mut conn = self.conn.clone();
        let server: Option<String> = conn.get(self.keys.session(connection)).await?;
        Ok(server.map(ServerId::from))
    }

    async fn clear_routing(&self, connection: &ConnectionId) -> Result<(), PresenceError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.keys.session(connection)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_key_layout() {
        let keys = RedisKeys::default();
        assert_eq!(keys.room(&RoomId::from("ABCD")), "tether:room:{ABCD}");
        assert_eq!(
            keys.session(&ConnectionId::from("conn_1")),
            "tether:session:{conn_1}"
        );
    }

    #[test]
    fn prefixes_are_independent() {
        let keys = RedisKeys {
            room_prefix: "r:".to_string(),
            session_prefix: "s:".to_string(),
        };
        assert_eq!(keys.room(&RoomId::from("x")), "r:{x}");
        assert_eq!(keys.session(&ConnectionId::from("x")), "s:{x}");
    }
}
