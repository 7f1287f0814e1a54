//! Message router for the relay.
//!
//! The router turns one inbound frame into at most one registry change
//! and at most one fan-out. It always routes to the room the server has
//! on record for the sender; a client-supplied `room` is only honoured on
//! `join`.

use crate::connection::{ConnectionId, Outbound};
use crate::registry::Registry;
use dndex_relay_protocol::codec::{self, MAX_FRAME_SIZE};
use dndex_relay_protocol::{Envelope, RoomId};
use tracing::{debug, trace, warn};

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Send `{"type":"joined"}` to a connection after it joins a room.
    pub join_ack: bool,
    /// Frames larger than this are treated as malformed.
    pub max_message_size: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            join_ack: true,
            max_message_size: MAX_FRAME_SIZE,
        }
    }
}

/// Why a frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Not a JSON object with a string `type`, or over the size limit.
    Malformed,
    /// Sender is not in a room.
    NotInRoom,
    /// Sender is not registered.
    UnknownConnection,
}

impl DropReason {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Malformed => "malformed",
            DropReason::NotInRoom => "not_in_room",
            DropReason::UnknownConnection => "unknown_connection",
        }
    }
}

/// What the router did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Sender was moved into `room`.
    Joined {
        /// Room joined.
        room: RoomId,
        /// Whether an acknowledgement was queued to the sender.
        acked: bool,
    },
    /// Envelope was fanned out to the sender's room.
    Broadcast {
        /// Room the envelope was stamped with.
        room: RoomId,
        /// Number of peers the envelope was queued to.
        recipients: usize,
    },
    /// Frame was discarded.
    Dropped(DropReason),
}

/// Applies join and broadcast semantics to inbound frames.
#[derive(Debug, Clone, Default)]
pub struct Router {
    config: RouterConfig,
}

impl Router {
    /// Create a router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a router with custom configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        Self { config }
    }

    /// Get the router configuration.
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Route one raw frame from `from`.
    pub fn route(&self, registry: &mut Registry, from: &ConnectionId, raw: &[u8]) -> RouteOutcome {
        if !registry.contains(from) {
            return RouteOutcome::Dropped(DropReason::UnknownConnection);
        }

        let envelope = match codec::decode_with_limit(raw, self.config.max_message_size) {
            Ok(envelope) => envelope,
            Err(e) => {
                trace!(connection = %from, error = %e, "Dropping malformed frame");
                return RouteOutcome::Dropped(DropReason::Malformed);
            }
        };

        if envelope.is_join() {
            if let Some(room) = envelope.room_id() {
                return self.join(registry, from, &room, &envelope);
            }
        }

        self.broadcast(registry, from, envelope)
    }

    /// Move `from` into `room` and acknowledge if configured.
    pub fn join(
        &self,
        registry: &mut Registry,
        from: &ConnectionId,
        room: &str,
        request: &Envelope,
    ) -> RouteOutcome {
        if registry.join(from, room).is_none() {
            return RouteOutcome::Dropped(DropReason::UnknownConnection);
        }

        let Some(conn) = registry.connection_mut(from) else {
            return RouteOutcome::Dropped(DropReason::UnknownConnection);
        };
        conn.set_profile(request.profile());

        let acked = self.config.join_ack
            && match codec::encode(&Envelope::joined(room)) {
                Ok(text) => conn.send(Outbound::Text(text)),
                Err(e) => {
                    warn!(connection = %from, error = %e, "Failed to encode join ack");
                    false
                }
            };

        RouteOutcome::Joined {
            room: room.to_string(),
            acked,
        }
    }

    /// Fan `envelope` out to every other open member of the sender's room.
    pub fn broadcast(
        &self,
        registry: &Registry,
        from: &ConnectionId,
        mut envelope: Envelope,
    ) -> RouteOutcome {
        let Some(room_id) = registry.room_of(from).map(str::to_string) else {
            trace!(connection = %from, kind = %envelope.kind(), "Sender not in a room");
            return RouteOutcome::Dropped(DropReason::NotInRoom);
        };
        envelope.restamp_room(&room_id);

        let text = match codec::encode(&envelope) {
            Ok(text) => text,
            Err(e) => {
                warn!(connection = %from, error = %e, "Failed to encode envelope");
                return RouteOutcome::Dropped(DropReason::Malformed);
            }
        };

        let recipients = registry.room(&room_id).map_or(0, |room| {
            room.members()
                .filter(|id| *id != from)
                .filter_map(|id| registry.connection(id))
                .filter(|peer| peer.is_open())
                .filter(|peer| peer.send(Outbound::Text(text.clone())))
                .count()
        });

        debug!(
            connection = %from,
            room = %room_id,
            kind = %envelope.kind(),
            recipients,
            "Broadcast"
        );

        RouteOutcome::Broadcast {
            room: room_id,
            recipients,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{outbound_channel, ConnectionState, OutboundReceiver};
    use serde_json::{json, Value};
    use tokio::sync::mpsc::error::TryRecvError;

    struct Peer {
        id: ConnectionId,
        rx: OutboundReceiver,
    }

    impl Peer {
        fn connect(registry: &mut Registry, id: &str) -> Self {
            let (tx, rx) = outbound_channel();
            let id = ConnectionId::from(id);
            registry.register(id.clone(), tx);
            Self { id, rx }
        }

        fn next_json(&mut self) -> Value {
            match self.rx.try_recv() {
                Ok(Outbound::Text(text)) => serde_json::from_str(&text).unwrap(),
                other => panic!("Expected text frame, got {:?}", other),
            }
        }

        fn assert_silent(&mut self) {
            assert_eq!(self.rx.try_recv(), Err(TryRecvError::Empty));
        }
    }

    fn send(router: &Router, registry: &mut Registry, peer: &Peer, value: Value) -> RouteOutcome {
        router.route(registry, &peer.id, value.to_string().as_bytes())
    }

    #[test]
    fn test_join_acknowledges_only_joiner() {
        let router = Router::new();
        let mut registry = Registry::new();
        let mut a = Peer::connect(&mut registry, "conn-a");
        let mut b = Peer::connect(&mut registry, "conn-b");

        send(&router, &mut registry, &b, json!({"type": "join", "room": "r1"}));
        assert_eq!(b.next_json(), json!({"type": "joined", "room": "r1"}));

        let outcome = send(&router, &mut registry, &a, json!({"type": "join", "room": "r1"}));
        assert_eq!(
            outcome,
            RouteOutcome::Joined {
                room: "r1".into(),
                acked: true
            }
        );
        assert_eq!(a.next_json(), json!({"type": "joined", "room": "r1"}));
        b.assert_silent();
    }

    #[test]
    fn test_join_ack_disabled() {
        let router = Router::with_config(RouterConfig {
            join_ack: false,
            ..Default::default()
        });
        let mut registry = Registry::new();
        let mut a = Peer::connect(&mut registry, "conn-a");

        let outcome = send(&router, &mut registry, &a, json!({"type": "join", "room": "r1"}));
        assert_eq!(
            outcome,
            RouteOutcome::Joined {
                room: "r1".into(),
                acked: false
            }
        );
        assert!(registry.room_exists("r1"));
        a.assert_silent();
    }

    #[test]
    fn test_join_records_profile() {
        let router = Router::new();
        let mut registry = Registry::new();
        let a = Peer::connect(&mut registry, "conn-a");

        send(
            &router,
            &mut registry,
            &a,
            json!({"type": "join", "room": "r1", "name": "Mira", "role": "dm"}),
        );

        let profile = registry.connection(&a.id).unwrap().profile();
        assert_eq!(profile.name, "Mira");
        assert_eq!(profile.role, "dm");
    }

    #[test]
    fn test_rejoin_acknowledges_new_room_only_to_sender() {
        let router = Router::new();
        let mut registry = Registry::new();
        let mut a = Peer::connect(&mut registry, "conn-a");
        let mut b = Peer::connect(&mut registry, "conn-b");
        let mut c = Peer::connect(&mut registry, "conn-c");

        send(&router, &mut registry, &a, json!({"type": "join", "room": "R1"}));
        send(&router, &mut registry, &b, json!({"type": "join", "room": "R1"}));
        send(&router, &mut registry, &c, json!({"type": "join", "room": "R2"}));
        a.next_json();
        b.next_json();
        c.next_json();

        send(&router, &mut registry, &a, json!({"type": "join", "room": "R2"}));
        assert_eq!(a.next_json(), json!({"type": "joined", "room": "R2"}));
        b.assert_silent();
        c.assert_silent();

        assert_eq!(registry.members("R1"), vec![b.id.clone()]);
        assert_eq!(registry.member_count("R2"), 2);
        assert_eq!(registry.state_of(&a.id), ConnectionState::Joined("R2".into()));
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_broadcast_excludes_sender_and_restamps_room() {
        let router = Router::new();
        let mut registry = Registry::new();
        let mut a = Peer::connect(&mut registry, "conn-a");
        let mut b = Peer::connect(&mut registry, "conn-b");
        let mut c = Peer::connect(&mut registry, "conn-c");

        for peer in [&a, &b, &c] {
            send(&router, &mut registry, peer, json!({"type": "join", "room": "R"}));
        }
        a.next_json();
        b.next_json();
        c.next_json();

        let outcome = send(
            &router,
            &mut registry,
            &a,
            json!({"type": "roll", "dice": [6, 2], "room": "spoofed"}),
        );
        assert_eq!(
            outcome,
            RouteOutcome::Broadcast {
                room: "R".into(),
                recipients: 2
            }
        );

        let expected = json!({"type": "roll", "dice": [6, 2], "room": "R"});
        assert_eq!(b.next_json(), expected);
        assert_eq!(c.next_json(), expected);
        b.assert_silent();
        c.assert_silent();
        a.assert_silent();
    }

    #[test]
    fn test_spoofed_room_does_not_reach_other_rooms() {
        let router = Router::new();
        let mut registry = Registry::new();
        let mut a = Peer::connect(&mut registry, "conn-a");
        let mut b = Peer::connect(&mut registry, "conn-b");
        send(&router, &mut registry, &b, json!({"type": "join", "room": "secret"}));
        b.next_json();

        // Not joined anywhere: the client-supplied room is not a routing target.
        let outcome = send(
            &router,
            &mut registry,
            &a,
            json!({"type": "chat", "room": "secret", "text": "hi"}),
        );
        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::NotInRoom));
        b.assert_silent();
        a.assert_silent();
    }

    #[test]
    fn test_join_without_room_is_broadcast() {
        let router = Router::new();
        let mut registry = Registry::new();
        let mut a = Peer::connect(&mut registry, "conn-a");
        let mut b = Peer::connect(&mut registry, "conn-b");
        send(&router, &mut registry, &a, json!({"type": "join", "room": "R"}));
        send(&router, &mut registry, &b, json!({"type": "join", "room": "R"}));
        a.next_json();
        b.next_json();

        let outcome = send(&router, &mut registry, &a, json!({"type": "join", "room": ""}));
        assert_eq!(
            outcome,
            RouteOutcome::Broadcast {
                room: "R".into(),
                recipients: 1
            }
        );
        assert_eq!(b.next_json(), json!({"type": "join", "room": "R"}));
        assert_eq!(registry.room_of(&a.id), Some("R"));
    }

    #[test]
    fn test_closed_peer_is_skipped() {
        let router = Router::new();
        let mut registry = Registry::new();
        let a = Peer::connect(&mut registry, "conn-a");
        let b = Peer::connect(&mut registry, "conn-b");
        let mut c = Peer::connect(&mut registry, "conn-c");
        for peer in [&a, &b, &c] {
            send(&router, &mut registry, peer, json!({"type": "join", "room": "R"}));
        }
        c.next_json();

        // b's transport goes away before it is deregistered.
        drop(b.rx);

        let outcome = send(&router, &mut registry, &a, json!({"type": "chat", "text": "x"}));
        assert_eq!(
            outcome,
            RouteOutcome::Broadcast {
                room: "R".into(),
                recipients: 1
            }
        );
        assert_eq!(c.next_json()["text"], json!("x"));
        assert!(registry.contains(&b.id));
    }

    #[test]
    fn test_not_in_room_is_dropped() {
        let router = Router::new();
        let mut registry = Registry::new();
        let mut a = Peer::connect(&mut registry, "conn-a");

        let outcome = send(&router, &mut registry, &a, json!({"type": "chat", "text": "x"}));
        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::NotInRoom));
        a.assert_silent();
    }

    #[test]
    fn test_unknown_connection() {
        let router = Router::new();
        let mut registry = Registry::new();

        let outcome = router.route(&mut registry, &"ghost".into(), br#"{"type":"join","room":"R"}"#);
        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::UnknownConnection));
        assert!(!registry.room_exists("R"));
    }

    #[test]
    fn test_malformed_frames_never_broadcast() {
        let router = Router::with_config(RouterConfig {
            max_message_size: 64,
            ..Default::default()
        });
        let mut registry = Registry::new();
        let mut a = Peer::connect(&mut registry, "conn-a");
        let mut b = Peer::connect(&mut registry, "conn-b");
        send(&router, &mut registry, &a, json!({"type": "join", "room": "R"}));
        send(&router, &mut registry, &b, json!({"type": "join", "room": "R"}));
        a.next_json();
        b.next_json();

        let oversized = json!({"type": "chat", "text": "y".repeat(100)}).to_string();
        let frames: [&[u8]; 9] = [
            b"",
            b"hello",
            b"{\"type\":",
            &[0xc3, 0x28, 0xa0, 0xa1],
            b"42",
            b"[{\"type\":\"chat\"}]",
            b"{\"text\":\"no type\"}",
            b"{\"type\":5}",
            oversized.as_bytes(),
        ];

        for frame in frames {
            assert_eq!(
                router.route(&mut registry, &a.id, frame),
                RouteOutcome::Dropped(DropReason::Malformed)
            );
        }

        b.assert_silent();
        a.assert_silent();
        assert_eq!(registry.room_of(&a.id), Some("R"));
    }

    #[test]
    fn test_table_scenario() {
        let router = Router::new();
        let mut registry = Registry::new();
        let mut x = Peer::connect(&mut registry, "conn-x");
        let mut y = Peer::connect(&mut registry, "conn-y");

        send(&router, &mut registry, &x, json!({"type": "join", "room": "table-42"}));
        send(&router, &mut registry, &y, json!({"type": "join", "room": "table-42"}));
        x.next_json();
        y.next_json();

        send(&router, &mut registry, &x, json!({"type": "chat", "text": "hello"}));
        assert_eq!(
            y.next_json(),
            json!({"type": "chat", "text": "hello", "room": "table-42"})
        );
        x.assert_silent();

        registry.deregister(&y.id);
        assert_eq!(registry.members("table-42"), vec![x.id.clone()]);

        let outcome = send(&router, &mut registry, &x, json!({"type": "chat", "text": "anyone?"}));
        assert_eq!(
            outcome,
            RouteOutcome::Broadcast {
                room: "table-42".into(),
                recipients: 0
            }
        );
        assert!(registry.room_exists("table-42"));

        registry.deregister(&x.id);
        assert!(!registry.room_exists("table-42"));
    }
}
