//! Heartbeat monitor
//!
//! Pings every registered connection on a fixed interval. A connection that is
//! no longer open, or that has not answered the previous ping, is cleaned up
//! through the relay's disconnect path.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::registry::ConnectionRegistry;
use super::relay::Relay;

/// Outcome of one heartbeat pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub pinged: usize,
    pub reaped: usize,
}

pub struct HeartbeatMonitor {
    connections: Arc<ConnectionRegistry>,
    relay: Relay,
    interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(connections: Arc<ConnectionRegistry>, relay: Relay, interval: Duration) -> Self {
        Self {
            connections,
            relay,
            interval,
        }
    }

    /// Run one pass over the registry
    pub async fn tick(&self) -> HeartbeatReport {
        let mut report = HeartbeatReport::default();

        for conn in self.connections.all().await {
            let alive = conn.is_open() && !conn.is_awaiting_pong() && conn.ping();
            if alive {
                report.pinged += 1;
                continue;
            }

            tracing::info!(
                connection_id = %conn.connection_id,
                user_id = %conn.user_id(),
                state = ?conn.state(),
                "Heartbeat found dead connection"
            );
            if self.relay.disconnect(&conn).await {
                report.reaped += 1;
            }
        }

        if report.reaped > 0 {
            tracing::info!(
                pinged = report.pinged,
                reaped = report.reaped,
                "Heartbeat pass reaped connections"
            );
        }

        report
    }

    /// Run the monitor in the background until the runtime shuts down
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }
}
