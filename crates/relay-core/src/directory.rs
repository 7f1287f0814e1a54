//! Room directory.
//!
//! Rooms are named broadcast domains. A room is created by the first
//! member that joins it and removed as soon as its last member leaves, so
//! the directory never holds an empty room.

use crate::connection::ConnectionId;
use dndex_relay_protocol::RoomId;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A room and its current members.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    members: HashSet<ConnectionId>,
}

impl Room {
    fn new(id: impl Into<RoomId>) -> Self {
        Self {
            id: id.into(),
            members: HashSet::new(),
        }
    }

    /// Get the room identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn is_member(&self, connection_id: &ConnectionId) -> bool {
        self.members.contains(connection_id)
    }

    /// Iterate over member IDs.
    pub fn members(&self) -> impl Iterator<Item = &ConnectionId> {
        self.members.iter()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Map from room identifier to room.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: HashMap<RoomId, Room>,
}

impl RoomDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member, creating the room if needed.
    ///
    /// Returns `true` if the room was created by this call.
    pub fn insert(&mut self, room_id: &str, connection_id: &ConnectionId) -> bool {
        let mut created = false;
        let room = self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            debug!(room = %room_id, "Creating room");
            created = true;
            Room::new(room_id)
        });
        room.members.insert(connection_id.clone());
        created
    }

    /// Remove a member, deleting the room if it becomes empty.
    ///
    /// Returns `true` if the room was deleted by this call.
    pub fn remove(&mut self, room_id: &str, connection_id: &ConnectionId) -> bool {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        room.members.remove(connection_id);

        if room.is_empty() {
            self.rooms.remove(room_id);
            debug!(room = %room_id, "Deleted empty room");
            true
        } else {
            false
        }
    }

    /// Look up a room.
    #[must_use]
    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    /// Check if a room exists.
    #[must_use]
    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Iterate over all rooms.
    pub fn iter(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    /// Get all room identifiers.
    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.keys().cloned().collect()
    }

    /// Number of rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Check if there are no rooms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Drop every room.
    pub fn clear(&mut self) {
        self.rooms.clear();
    }
}
