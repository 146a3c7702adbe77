use std::sync::{Arc, Weak};
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, info};

use super::{Gateway, registry::CloseReason};

// -----------------------------------------------------------------------------
// ----- MaintenanceHandles ----------------------------------------------------

/// The two background loops. They also stop on their own once the gateway is
/// dropped.
#[derive(Debug)]
pub struct MaintenanceHandles {
    pub heartbeat: JoinHandle<()>,
    pub snapshot: JoinHandle<()>,
}

impl MaintenanceHandles {
    pub fn abort(&self) {
        self.heartbeat.abort();
        self.snapshot.abort();
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Maintenance --------------------------------------------------

impl Gateway {
    /// Start the stale-session sweep and the concurrency snapshot loop.
    /// Intervals are re-read from config before every tick.
    pub fn spawn_maintenance(self: &Arc<Self>) -> MaintenanceHandles {
        let heartbeat = spawn_loop(
            Arc::downgrade(self),
            |g| g.config.snapshot().heartbeat_interval,
            |g| {
                g.reap_stale();
            },
        );

        let snapshot = spawn_loop(
            Arc::downgrade(self),
            |g| g.config.snapshot().metrics_interval,
            |g| {
                g.report_concurrency();
            },
        );

        MaintenanceHandles {
            heartbeat,
            snapshot,
        }
    }

    /// Close and unregister every session idle for longer than
    /// `connection_timeout`. Returns how many were reaped.
    pub fn reap_stale(&self) -> usize {
        let timeout = self.config.snapshot().connection_timeout;
        let stale = self.registry.take_stale(Instant::now(), timeout, |handle| {
            self.bandwidth.release(handle.client_id());
        });

        for handle in &stale {
            handle.signal(CloseReason::Stale);
            info!(
                client_id = handle.client_id(),
                serial = handle.serial(),
                "reaping stale session"
            );
        }

        stale.len()
    }

    /// Emit the live-session gauge.
    pub fn report_concurrency(&self) -> usize {
        let live = self.registry.len();
        self.metrics.concurrency(live);
        debug!(live, slots = self.concurrency.current(), "concurrency snapshot");
        live
    }

    /// Ask every live session to close with "going away". Returns how many were
    /// signalled; their tasks finish the close on their own.
    pub fn shutdown(&self) -> usize {
        let sessions = self.registry.drain(|handle| {
            self.bandwidth.release(handle.client_id());
        });

        for handle in &sessions {
            handle.signal(CloseReason::Shutdown);
        }

        info!(sessions = sessions.len(), "gateway shutting down");
        sessions.len()
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn spawn_loop(
    gateway: Weak<Gateway>,
    interval: fn(&Gateway) -> std::time::Duration,
    tick: fn(&Gateway),
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Some(every) = gateway.upgrade().map(|g| interval(&g)) else {
                return;
            };

            tokio::time::sleep(every).await;

            let Some(g) = gateway.upgrade() else {
                return;
            };
            tick(&g);
        }
    })
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
