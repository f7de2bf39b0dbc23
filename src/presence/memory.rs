use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{ConnectionSnapshot, PresenceError, PresenceStore};
use crate::identity::{ConnectionId, RoomId, ServerId};

/// Presence store for single-process deployments
#[derive(Debug, Default)]
pub struct InMemoryPresenceStore {
    rooms: DashMap<RoomId, HashMap<ConnectionId, ConnectionSnapshot>>,
    routes: DashMap<ConnectionId, ServerId>,
}

impl InMemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn list_members(&self, room: &RoomId) -> Result<Vec<ConnectionSnapshot>, PresenceError> {
        Ok(self
            .rooms
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_member(
        &self,
        room: &RoomId,
        member: &ConnectionSnapshot,
    ) -> Result<(), PresenceError> {
        self.rooms
            .entry(room.clone())
            .or_default()
            .insert(member.id.clone(), member.clone());
        Ok(())
    }

    async fn remove_member(
        &self,
        room: &RoomId,
        connection: &ConnectionId,
    ) -> Result<(), PresenceError> {
        // the shard guard must be released before remove_if touches the same key
        let emptied = match self.rooms.get_mut(room) {
            Some(mut members) => {
                members.remove(connection);
                members.is_empty()
            }
            None => false,
        };

        if emptied {
            self.rooms.remove_if(room, |_, members| members.is_empty());
            debug!(room_id = %room, "Room removed (empty)");
        }
        Ok(())
    }

    async fn set_routing(
        &self,
        connection: &ConnectionId,
        server: &ServerId,
    ) -> Result<(), PresenceError> {
        self.routes.insert(connection.clone(), server.clone());
        Ok(())
    }

    async fn get_routing(
        &self,
        connection: &ConnectionId,
    ) -> Result<Option<ServerId>, PresenceError> {
        Ok(self.routes.get(connection).map(|server| server.clone()))
    }

    async fn clear_routing(&self, connection: &ConnectionId) -> Result<(), PresenceError> {
        self.routes.remove(connection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str, tag: Option<i64>) -> ConnectionSnapshot {
        ConnectionSnapshot {
            id: ConnectionId::from(id),
            client_tag: tag,
            room_id: Some(RoomId::from("ABCD")),
            server_id: ServerId::from("server_1"),
        }
    }

    #[tokio::test]
    async fn unknown_room_is_empty() {
        let store = InMemoryPresenceStore::new();
        let members = store.list_members(&RoomId::from("nope")).await.unwrap();
        assert!(members.is_empty());
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_keeps_latest() {
        let store = InMemoryPresenceStore::new();
        let room = RoomId::from("ABCD");

        store.upsert_member(&room, &snapshot("conn_a", None)).await.unwrap();
        store.upsert_member(&room, &snapshot("conn_a", None)).await.unwrap();
        store.upsert_member(&room, &snapshot("conn_a", Some(4))).await.unwrap();

        let members = store.list_members(&room).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].client_tag, Some(4));
    }

    #[tokio::test]
    async fn removing_last_member_drops_room() {
        let store = InMemoryPresenceStore::new();
        let room = RoomId::from("ABCD");

        store.upsert_member(&room, &snapshot("conn_a", Some(1))).await.unwrap();
        store.upsert_member(&room, &snapshot("conn_b", Some(2))).await.unwrap();

        store.remove_member(&room, &ConnectionId::from("conn_a")).await.unwrap();
        assert!(store.rooms.contains_key("ABCD"));

        store.remove_member(&room, &ConnectionId::from("conn_b")).await.unwrap();
        assert!(store.list_members(&room).await.unwrap().is_empty());
        assert!(!store.rooms.contains_key("ABCD"));
    }

    #[tokio::test]
    async fn removing_first_member_works() {
        let store = InMemoryPresenceStore::new();
        let room = RoomId::from("ABCD");

        store.upsert_member(&room, &snapshot("conn_a", Some(1))).await.unwrap();
        store.upsert_member(&room, &snapshot("conn_b", Some(2))).await.unwrap();
        store.upsert_member(&room, &snapshot("conn_c", Some(3))).await.unwrap();

        store.remove_member(&room, &ConnectionId::from("conn_a")).await.unwrap();

        let members = store.list_members(&room).await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|m| m.id.as_str() != "conn_a"));
    }

    #[tokio::test]
    async fn remove_absent_member_is_noop() {
        let store = InMemoryPresenceStore::new();
        let room = RoomId::from("ABCD");

        store.remove_member(&room, &ConnectionId::from("conn_x")).await.unwrap();
        assert!(store.rooms.is_empty());
    }

    #[tokio::test]
    async fn routing_lifecycle() {
        let store = InMemoryPresenceStore::new();
        let conn = ConnectionId::from("conn_a");

        assert_eq!(store.get_routing(&conn).await.unwrap(), None);

        store.set_routing(&conn, &ServerId::from("server_1")).await.unwrap();
        assert_eq!(
            store.get_routing(&conn).await.unwrap(),
            Some(ServerId::from("server_1"))
        );

        store.clear_routing(&conn).await.unwrap();
        assert_eq!(store.get_routing(&conn).await.unwrap(), None);
    }
}
