//! Connection records for the relay.
//!
//! A [`Connection`] is the registry's view of one accepted transport
//! session. It never owns a room; it only remembers the id of the room it
//! is currently assigned to.

use dndex_relay_protocol::{Profile, RoomId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Process-wide counter backing [`ConnectionId::generate`].
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let n = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}", n))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An instruction for the transport side of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write a text frame.
    Text(String),
    /// Send a liveness probe.
    Ping,
    /// Drop the transport without a closing handshake.
    Terminate,
}

/// Sending half of a connection's outbound queue.
pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// Receiving half of a connection's outbound queue, held by the transport.
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Create an outbound queue for a new connection.
#[must_use]
pub fn outbound_channel() -> (OutboundSender, OutboundReceiver) {
    mpsc::unbounded_channel()
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, not in any room.
    Open,
    /// Member of a room.
    Joined(RoomId),
    /// Removed from the registry. Terminal.
    Closed,
}

/// A registered connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    room: Option<RoomId>,
    alive: bool,
    profile: Profile,
    outbound: OutboundSender,
}

impl Connection {
    /// Create a connection record for a freshly accepted transport.
    #[must_use]
    pub fn new(id: ConnectionId, outbound: OutboundSender) -> Self {
        Self {
            id,
            room: None,
            alive: true,
            profile: Profile::default(),
            outbound,
        }
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Get the room this connection is currently assigned to.
    #[must_use]
    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Get the lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        match &self.room {
            Some(room) => ConnectionState::Joined(room.clone()),
            None => ConnectionState::Open,
        }
    }

    /// Whether the peer answered the last liveness probe.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Get the profile supplied with the last join.
    #[must_use]
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Check if the transport is still reading outbound frames.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Queue a frame for the transport.
    ///
    /// Returns `false` if the transport has gone away.
    pub fn send(&self, frame: Outbound) -> bool {
        self.outbound.send(frame).is_ok()
    }

    pub(crate) fn set_room(&mut self, room: Option<RoomId>) {
        self.room = room;
    }

    pub(crate) fn set_alive(&mut self, alive: bool) {
        self.alive = alive;
    }

    pub(crate) fn set_profile(&mut self, profile: Profile) {
        self.profile = profile;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
        assert_eq!(id.to_string(), "test-id");
    }

    #[test]
    fn test_new_connection_is_open_and_alive() {
        let (tx, _rx) = outbound_channel();
        let conn = Connection::new("conn-1".into(), tx);

        assert!(conn.is_open());
        assert!(conn.is_alive());
        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(conn.profile().role, "player");
    }

    #[test]
    fn test_send_after_transport_gone() {
        let (tx, mut rx) = outbound_channel();
        let conn = Connection::new("conn-1".into(), tx);

        assert!(conn.send(Outbound::Ping));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Ping);

        drop(rx);
        assert!(!conn.is_open());
        assert!(!conn.send(Outbound::Text("late".into())));
    }

    #[test]
    fn test_state_follows_room() {
        let (tx, _rx) = outbound_channel();
        let mut conn = Connection::new("conn-1".into(), tx);

        conn.set_room(Some("table-42".into()));
        assert_eq!(conn.state(), ConnectionState::Joined("table-42".into()));
        assert_eq!(conn.room(), Some("table-42"));

        conn.set_room(None);
        assert_eq!(conn.state(), ConnectionState::Open);
    }
}
