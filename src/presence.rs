//! Room presence: who is in which room, and which process holds each connection

mod memory;
mod redis_store;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::{ClientTag, ConnectionId, RoomId, ServerId};

pub use memory::InMemoryPresenceStore;
pub use redis_store::{
    DEFAULT_ROOM_KEY_PREFIX, DEFAULT_SESSION_KEY_PREFIX, RedisKeys, RedisPresenceStore,
};

/// Presence store errors
#[derive(Debug, Error)]
pub enum PresenceError {
    /// Transport fault talking to the shared backend. The mutation may or may
    /// not have been applied.
    #[error("presence store unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),

    #[error("failed to encode connection snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Copy of a connection's attributes as last written to the store.
///
/// The store never sees later changes to the live connection: every change
/// has to be written again with [`PresenceStore::upsert_member`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub client_tag: Option<ClientTag>,
    pub room_id: Option<RoomId>,
    pub server_id: ServerId,
}

impl ConnectionSnapshot {
    pub fn new(id: ConnectionId, server_id: ServerId) -> Self {
        Self {
            id,
            client_tag: None,
            room_id: None,
            server_id,
        }
    }
}

/// Room membership and connection routing.
///
/// There is no locking across calls: "list members, then upsert" from two
/// processes can interleave and each see a stale member list.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Members of `room`. Unknown rooms are empty.
    async fn list_members(&self, room: &RoomId) -> Result<Vec<ConnectionSnapshot>, PresenceError>;

    /// Insert or replace the entry for `member.id` in `room`.
    async fn upsert_member(
        &self,
        room: &RoomId,
        member: &ConnectionSnapshot,
    ) -> Result<(), PresenceError>;

    /// Remove `connection` from `room`, dropping the room once it is empty.
    async fn remove_member(
        &self,
        room: &RoomId,
        connection: &ConnectionId,
    ) -> Result<(), PresenceError>;

    async fn set_routing(
        &self,
        connection: &ConnectionId,
        server: &ServerId,
    ) -> Result<(), PresenceError>;

    async fn get_routing(&self, connection: &ConnectionId)
    -> Result<Option<ServerId>, PresenceError>;

    async fn clear_routing(&self, connection: &ConnectionId) -> Result<(), PresenceError>;
}

/// Distinct processes owning at least one of `members`.
pub fn distinct_owners(members: &[ConnectionSnapshot]) -> BTreeSet<ServerId> {
    members.iter().map(|m| m.server_id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, server: &str) -> ConnectionSnapshot {
        ConnectionSnapshot::new(ConnectionId::from(id), ServerId::from(server))
    }

    #[test]
    fn distinct_owners_collapses_shared_processes() {
        let members = vec![
            member("conn_a", "s1"),
            member("conn_b", "s1"),
            member("conn_c", "s2"),
            member("conn_d", "s1"),
        ];
        let owners = distinct_owners(&members);
        assert_eq!(owners.len(), 2);
        assert!(owners.contains("s1"));
        assert!(owners.contains("s2"));
    }

    #[test]
    fn distinct_owners_of_empty_room() {
        assert!(distinct_owners(&[]).is_empty());
    }

    #[test]
    fn snapshot_serialization() {
        let mut snapshot = member("conn_a", "s1");
        snapshot.client_tag = Some(3);
        snapshot.room_id = Some(RoomId::from("ABCD"));

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"clientTag\":3"));
        assert!(json.contains("\"roomId\":\"ABCD\""));
        assert!(json.contains("\"serverId\":\"s1\""));

        let back: ConnectionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
