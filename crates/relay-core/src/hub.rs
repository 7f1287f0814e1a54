//! The relay hub.
//!
//! A single task owns the [`Registry`] and processes every connection event
//! (register, frame, pong, disconnect) and every heartbeat tick one at a
//! time. Transports talk to it through a cloneable [`HubHandle`].

use crate::connection::{
    outbound_channel, ConnectionId, ConnectionState, OutboundReceiver, OutboundSender,
};
use crate::heartbeat::{HeartbeatMonitor, DEFAULT_HEARTBEAT_INTERVAL};
use crate::registry::{Registry, RegistryStats};
use crate::router::{RouteOutcome, Router, RouterConfig};
use bytes::Bytes;
use dndex_relay_protocol::codec::MAX_FRAME_SIZE;
use dndex_relay_protocol::RoomId;
use metrics::{counter, histogram};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Counter of inbound frames the router dropped, labelled by `reason`.
pub const FRAMES_DROPPED_TOTAL: &str = "relay_frames_dropped_total";

/// Histogram of time spent routing one inbound frame.
pub const ROUTE_LATENCY_SECONDS: &str = "relay_route_latency_seconds";

/// Hub errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The hub task has stopped.
    #[error("Relay hub is not running")]
    HubClosed,
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Acknowledge joins with `{"type":"joined"}`.
    pub join_ack: bool,
    /// Heartbeat period, or `None` to disable dead-peer detection.
    pub heartbeat_interval: Option<Duration>,
    /// Frames larger than this are dropped.
    pub max_message_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            join_ack: true,
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
            max_message_size: MAX_FRAME_SIZE,
        }
    }
}

impl RelayConfig {
    fn router_config(&self) -> RouterConfig {
        RouterConfig {
            join_ack: self.join_ack,
            max_message_size: self.max_message_size,
        }
    }
}

#[derive(Debug)]
enum Command {
    Register {
        id: ConnectionId,
        outbound: OutboundSender,
    },
    Inbound {
        id: ConnectionId,
        frame: Bytes,
    },
    Pong {
        id: ConnectionId,
    },
    Disconnect {
        id: ConnectionId,
    },
    Stats {
        reply: oneshot::Sender<RegistryStats>,
    },
    Members {
        room: RoomId,
        reply: oneshot::Sender<Vec<ConnectionId>>,
    },
    State {
        id: ConnectionId,
        reply: oneshot::Sender<ConnectionState>,
    },
    Shutdown,
}

/// Handle for submitting connection events to the hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl HubHandle {
    fn send(&self, command: Command) -> Result<(), RelayError> {
        self.commands
            .send(command)
            .map_err(|_| RelayError::HubClosed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply))?;
        rx.await.map_err(|_| RelayError::HubClosed)
    }

    /// Register a newly accepted transport.
    ///
    /// Returns the connection ID and the queue the transport must drain.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub fn register(&self) -> Result<(ConnectionId, OutboundReceiver), RelayError> {
        let id = ConnectionId::generate();
        let (outbound, rx) = outbound_channel();
        self.send(Command::Register {
            id: id.clone(),
            outbound,
        })?;
        Ok((id, rx))
    }

    /// Submit a raw inbound frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub fn inbound(&self, id: &ConnectionId, frame: impl Into<Bytes>) -> Result<(), RelayError> {
        self.send(Command::Inbound {
            id: id.clone(),
            frame: frame.into(),
        })
    }

    /// Report a probe acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub fn pong(&self, id: &ConnectionId) -> Result<(), RelayError> {
        self.send(Command::Pong { id: id.clone() })
    }

    /// Report that a transport closed or failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub fn disconnect(&self, id: &ConnectionId) -> Result<(), RelayError> {
        self.send(Command::Disconnect { id: id.clone() })
    }

    /// Get registry statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn stats(&self) -> Result<RegistryStats, RelayError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Get the members of a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn room_members(&self, room: &str) -> Result<Vec<ConnectionId>, RelayError> {
        let room = room.to_string();
        self.request(|reply| Command::Members { room, reply }).await
    }

    /// Get a connection's lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn state_of(&self, id: &ConnectionId) -> Result<ConnectionState, RelayError> {
        let id = id.clone();
        self.request(|reply| Command::State { id, reply }).await
    }

    /// Stop the hub. All rooms and connections are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has already stopped.
    pub fn shutdown(&self) -> Result<(), RelayError> {
        self.send(Command::Shutdown)
    }

    /// Check if the hub has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Owner of the registry and the only place it is mutated.
pub struct Hub {
    registry: Registry,
    router: Router,
    monitor: HeartbeatMonitor,
    heartbeat_interval: Option<Duration>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Hub {
    /// Create a hub and its handle.
    #[must_use]
    pub fn new(config: RelayConfig) -> (Self, HubHandle) {
        info!("Creating relay hub with config: {:?}", config);
        let heartbeat_interval = config.heartbeat_interval.filter(|period| {
            if period.is_zero() {
                warn!("Zero heartbeat period, dead-peer detection disabled");
            }
            !period.is_zero()
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            registry: Registry::new(),
            router: Router::with_config(config.router_config()),
            monitor: HeartbeatMonitor::new(),
            heartbeat_interval,
            commands: rx,
        };
        (hub, HubHandle { commands: tx })
    }

    /// Create a hub and run it on a new task.
    #[must_use]
    pub fn spawn(config: RelayConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config);
        (handle, tokio::spawn(hub.run()))
    }

    /// Process events until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        let mut ticker = self.heartbeat_interval.map(|period| {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                biased;

                // Ticks first: a busy command queue must not starve eviction.
                () = next_tick(&mut ticker) => {
                    let report = self.monitor.tick(&mut self.registry);
                    if !report.evicted.is_empty() {
                        debug!(evicted = report.evicted.len(), "Heartbeat evictions");
                    }
                }

                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
            }
        }

        let stats = self.registry.stats();
        self.registry.clear();
        info!(
            connections = stats.connections,
            rooms = stats.rooms,
            "Relay hub stopped"
        );
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register { id, outbound } => {
                self.registry.register(id, outbound);
            }
            Command::Inbound { id, frame } => {
                let started = Instant::now();
                let outcome = self.router.route(&mut self.registry, &id, &frame);
                histogram!(ROUTE_LATENCY_SECONDS).record(started.elapsed().as_secs_f64());

                if let RouteOutcome::Dropped(reason) = outcome {
                    trace!(connection = %id, reason = reason.as_str(), "Frame dropped");
                    counter!(FRAMES_DROPPED_TOTAL, "reason" => reason.as_str()).increment(1);
                }
            }
            Command::Pong { id } => {
                self.monitor.acknowledge(&mut self.registry, &id);
            }
            Command::Disconnect { id } => {
                self.registry.deregister(&id);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.registry.stats());
            }
            Command::Members { room, reply } => {
                let _ = reply.send(self.registry.members(&room));
            }
            Command::State { id, reply } => {
                let _ = reply.send(self.registry.state_of(&id));
            }
            Command::Shutdown => {}
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
