//! Connection registry.
//!
//! The registry owns every live [`Connection`] together with the
//! [`RoomDirectory`]. Room membership is only ever changed through the
//! registry, which keeps the two sides consistent: a connection appears in
//! a room exactly when its record points at that room.

use crate::connection::{Connection, ConnectionId, ConnectionState, OutboundSender};
use crate::directory::{Room, RoomDirectory};
use dndex_relay_protocol::RoomId;
use std::collections::HashMap;
use tracing::debug;

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinReport {
    /// Room the connection was in before, if any.
    pub previous: Option<RoomId>,
    /// Whether the target room was created by this join.
    pub created: bool,
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of registered connections.
    pub connections: usize,
    /// Number of rooms.
    pub rooms: usize,
    /// Number of connections that are in a room.
    pub joined: usize,
}

/// Owner of all connection records and room membership.
#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<ConnectionId, Connection>,
    rooms: RoomDirectory,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly accepted connection.
    ///
    /// Returns `false` if the ID is already registered.
    pub fn register(&mut self, id: ConnectionId, outbound: OutboundSender) -> bool {
        if self.connections.contains_key(&id) {
            return false;
        }
        debug!(connection = %id, "Registered connection");
        self.connections
            .insert(id.clone(), Connection::new(id, outbound));
        true
    }

    /// Move a connection into a room.
    ///
    /// The connection first leaves its current room (which is deleted if it
    /// becomes empty). Returns `None` if the connection is not registered.
    pub fn join(&mut self, id: &ConnectionId, room_id: &str) -> Option<JoinReport> {
        if !self.connections.contains_key(id) {
            return None;
        }

        let previous = self.leave(id);
        let created = self.rooms.insert(room_id, id);
        if let Some(conn) = self.connections.get_mut(id) {
            conn.set_room(Some(room_id.to_string()));
        }

        debug!(
            connection = %id,
            room = %room_id,
            members = self.member_count(room_id),
            "Joined room"
        );

        Some(JoinReport { previous, created })
    }

    /// Remove a connection from its current room.
    ///
    /// Idempotent. Returns the room that was left, if any.
    pub fn leave(&mut self, id: &ConnectionId) -> Option<RoomId> {
        let conn = self.connections.get_mut(id)?;
        let room_id = conn.room()?.to_string();
        conn.set_room(None);

        self.rooms.remove(&room_id, id);
        debug!(connection = %id, room = %room_id, "Left room");
        Some(room_id)
    }

    /// Leave the current room and forget the connection entirely.
    ///
    /// Returns the removed record, if the connection was registered.
    pub fn deregister(&mut self, id: &ConnectionId) -> Option<Connection> {
        self.leave(id);
        let removed = self.connections.remove(id);
        if removed.is_some() {
            debug!(connection = %id, "Deregistered connection");
        }
        removed
    }

    /// Look up a connection.
    #[must_use]
    pub fn connection(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub(crate) fn connection_mut(&mut self, id: &ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Get the room a connection is currently in.
    #[must_use]
    pub fn room_of(&self, id: &ConnectionId) -> Option<&str> {
        self.connections.get(id).and_then(Connection::room)
    }

    /// Get a connection's lifecycle state.
    #[must_use]
    pub fn state_of(&self, id: &ConnectionId) -> ConnectionState {
        self.connections
            .get(id)
            .map_or(ConnectionState::Closed, Connection::state)
    }

    /// Look up a room.
    #[must_use]
    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains(room_id)
    }

    /// Get the member count of a room (0 if it does not exist).
    #[must_use]
    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, Room::member_count)
    }

    /// Get the members of a room.
    #[must_use]
    pub fn members(&self, room_id: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room_id)
            .map(|room| room.members().cloned().collect())
            .unwrap_or_default()
    }

    /// Get all room identifiers.
    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.room_ids()
    }

    /// Snapshot of all registered connection IDs.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().cloned().collect()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connections: self.connections.len(),
            rooms: self.rooms.len(),
            joined: self
                .connections
                .values()
                .filter(|c| c.room().is_some())
                .count(),
        }
    }

    /// Drop every room and connection.
    pub fn clear(&mut self) {
        self.rooms.clear();
        self.connections.clear();
    }

    /// Check that connection records and room membership agree and that no
    /// empty room exists.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let records_match = self.connections.values().all(|conn| match conn.room() {
            Some(room_id) => self
                .rooms
                .get(room_id)
                .is_some_and(|room| room.is_member(conn.id())),
            None => true,
        });

        let rooms_match = self.rooms.iter().all(|room| {
            !room.is_empty()
                && room
                    .members()
                    .all(|id| self.room_of(id) == Some(room.id()))
        });

        records_match && rooms_match
    }
}
