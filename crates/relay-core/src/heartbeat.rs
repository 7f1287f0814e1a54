//! Dead-peer detection.
//!
//! Every tick, each connection that answered the previous probe is probed
//! again, and each connection that did not is terminated and deregistered.
//! A silent peer is therefore evicted on the second tick after its last
//! acknowledged probe.

use crate::connection::{ConnectionId, Outbound};
use crate::registry::Registry;
use std::time::Duration;
use tracing::{debug, trace};

/// Default probe period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Result of one monitor tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Connections that were sent a probe.
    pub probed: usize,
    /// Connections that were terminated.
    pub evicted: Vec<ConnectionId>,
}

/// Liveness monitor.
#[derive(Debug, Default)]
pub struct HeartbeatMonitor {
    ticks: u64,
}

impl HeartbeatMonitor {
    /// Create a new monitor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ticks run so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Probe live connections and evict the ones that missed a probe.
    pub fn tick(&mut self, registry: &mut Registry) -> TickReport {
        self.ticks += 1;
        let mut report = TickReport::default();

        for id in registry.ids() {
            let Some(conn) = registry.connection_mut(&id) else {
                continue;
            };

            if conn.is_alive() {
                conn.set_alive(false);
                conn.send(Outbound::Ping);
                report.probed += 1;
            } else {
                conn.send(Outbound::Terminate);
                registry.deregister(&id);
                debug!(connection = %id, "Evicted unresponsive connection");
                report.evicted.push(id);
            }
        }

        trace!(
            tick = self.ticks,
            probed = report.probed,
            evicted = report.evicted.len(),
            "Heartbeat tick"
        );

        report
    }

    /// Record a probe acknowledgement.
    ///
    /// Returns `false` if the connection is not registered.
    pub fn acknowledge(&self, registry: &mut Registry, id: &ConnectionId) -> bool {
        match registry.connection_mut(id) {
            Some(conn) => {
                conn.set_alive(true);
                true
            }
            None => false,
        }
    }
}
