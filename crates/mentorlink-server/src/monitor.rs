//! Liveness monitoring for registered connections.
//!
//! On a fixed interval every registered connection is probed with a
//! `system:ping` envelope. A peer that has not acknowledged the previous
//! probe by the time the next pass runs is closed and evicted, which
//! cascades into a room purge. This bounds the staleness of registry state
//! at two intervals without requiring clients to volunteer heartbeats.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use mentorlink_core::{ConnectionRegistry, RoomManager};
use mentorlink_protocol::{Envelope, SystemAction};

use crate::metrics;

/// Periodic prober of every registered connection.
pub struct LivenessMonitor {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomManager>,
    interval: Duration,
}

impl LivenessMonitor {
    /// Create a monitor over the given registries.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomManager>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            rooms,
            interval,
        }
    }

    /// Spawn the probe loop. The returned handle is the only way to stop
    /// it; shutdown aborts it before clearing the registries so a pass
    /// never fires against cleared state.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick completes immediately; skip it so connections get
        // a full interval before their first probe.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let probe = Arc::new(Envelope::system(SystemAction::Ping));
            let evicted = self.registry.sweep(&probe);

            for identity in &evicted {
                self.rooms.purge(identity);
                metrics::record_eviction("liveness");
                warn!(identity = %identity, "Evicted unresponsive connection");
            }

            metrics::set_active_rooms(self.rooms.room_count());
            debug!(
                connections = self.registry.len(),
                evicted = evicted.len(),
                "Liveness pass complete"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentorlink_core::{Outbound, Role};
    use mentorlink_protocol::CloseCode;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_connection_evicted_within_two_intervals() {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomManager::new());

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.admit("u1", Role::Student, tx);
        rooms.join("physics-help", "u1");

        let monitor = LivenessMonitor::new(
            registry.clone(),
            rooms.clone(),
            Duration::from_secs(30),
        );
        let handle = monitor.spawn();

        // The peer never acknowledges: first pass probes, second evicts.
        tokio::time::sleep(Duration::from_secs(70)).await;

        assert_eq!(registry.len(), 0);
        assert!(!rooms.room_exists("physics-help"));

        // The peer saw a probe and then a close.
        match rx.try_recv() {
            Ok(Outbound::Envelope(envelope)) => {
                assert!(matches!(
                    envelope.body,
                    mentorlink_protocol::Body::System(ref s) if s.action == SystemAction::Ping
                ));
            }
            other => panic!("Expected probe, got {:?}", other),
        }
        assert!(matches!(
            rx.try_recv(),
            Ok(Outbound::Close(CloseCode::Normal))
        ));

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledging_connection_survives() {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomManager::new());

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.admit("u1", Role::Student, tx);

        let monitor = LivenessMonitor::new(
            registry.clone(),
            rooms.clone(),
            Duration::from_secs(30),
        );
        let handle = monitor.spawn();

        // Acknowledge each probe as it arrives, as a live client would.
        // Sleeping one second past each pass guarantees the probe has been
        // sent before we look for it.
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(31)).await;
            match rx.try_recv() {
                Ok(Outbound::Envelope(_)) => registry.mark_alive("u1"),
                other => panic!("Expected probe, got {:?}", other),
            }
        }

        assert_eq!(registry.len(), 1);
        handle.abort();
    }
}
