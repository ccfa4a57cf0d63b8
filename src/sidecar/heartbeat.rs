//! Periodic liveness check for the supervised sidecar.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::sidecar::manager::{Inner, SidecarStatus};

/// What a single heartbeat check did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The inventory reports the sidecar as running.
    Healthy,
    /// The sidecar was missing and has been relaunched.
    Restarted,
    /// The sidecar was missing and relaunching it failed.
    RestartFailed,
    /// The sidecar was missing but a lifecycle operation is in progress.
    InFlight(SidecarStatus),
    /// Nothing has been started yet, or the supervisor is disposed.
    NotConfigured,
}

/// Background heartbeat loop. Aborted when dropped.
pub(crate) struct HeartbeatTask {
    handle: JoinHandle<()>,
}

impl HeartbeatTask {
    pub(crate) fn spawn(inner: Weak<Inner>, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the sidecar was just launched.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let outcome = inner.heartbeat_tick().await;
                tracing::trace!(?outcome, "Heartbeat tick");
            }
        });

        tracing::debug!("Sidecar heartbeat started (every {:?})", interval);
        Self { handle }
    }

    pub(crate) fn cancel(self) {
        self.handle.abort();
    }
}

impl Drop for HeartbeatTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
