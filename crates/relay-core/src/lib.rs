//! # dndex-relay-core
//!
//! Room membership, message fan-out and dead-peer detection for the DnDex
//! relay.
//!
//! - **Connection** - Registry record for one transport session
//! - **Directory** - Rooms and their members, created and removed lazily
//! - **Registry** - Owner of connections and room membership
//! - **Router** - Join and broadcast semantics for inbound envelopes
//! - **Heartbeat** - Two-tick liveness probing and eviction
//! - **Hub** - The single task that serializes all of the above
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│     Hub     │────▶│   Router    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │                   │
//!        │                   ▼                   ▼
//!        │            ┌─────────────┐     ┌─────────────┐
//!        └────────────│  Heartbeat  │────▶│  Registry   │
//!          Outbound   └─────────────┘     └─────────────┘
//! ```

pub mod connection;
pub mod directory;
pub mod heartbeat;
pub mod hub;
pub mod registry;
pub mod router;

pub use connection::{Connection, ConnectionId, ConnectionState, Outbound, OutboundReceiver};
pub use directory::{Room, RoomDirectory};
pub use heartbeat::{HeartbeatMonitor, TickReport, DEFAULT_HEARTBEAT_INTERVAL};
pub use hub::{Hub, HubHandle, RelayConfig, RelayError};
pub use registry::{JoinReport, Registry, RegistryStats};
pub use router::{DropReason, RouteOutcome, Router, RouterConfig};
