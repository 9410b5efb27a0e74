//! Background expiry sweep.
//!
//! The reaper wakes on a fixed interval, flips logically-expired sessions to
//! their durable `expired` state, and purges terminal rows past the retention
//! window. Reads never depend on the reaper having run; the sweep only makes
//! already-decided state durable and reclaims storage.

use std::sync::Arc;
use std::time::Duration;

use crate::session::store::SessionStore;
use crate::store::epoch_secs;

/// Periodic sweep task over the session store.
pub struct ExpiryReaper {
    sessions: Arc<SessionStore>,
    interval: Duration,
}

impl ExpiryReaper {
    pub fn new(sessions: Arc<SessionStore>, interval: Duration) -> Self {
        Self { sessions, interval }
    }

    /// Run one sweep now. Safe to call at any time and from anywhere;
    /// sweeping is idempotent.
    pub fn sweep_once(&self) {
        match self.sessions.reap(epoch_secs()) {
            Ok(stats) if stats.expired > 0 || stats.purged > 0 => {
                tracing::debug!(
                    expired = stats.expired,
                    purged = stats.purged,
                    "reaper sweep"
                );
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "reaper sweep failed, will retry next tick");
            }
        }
    }

    /// Loop until `shutdown` flips to true. One sweep per interval tick; a
    /// failed sweep is logged and retried on the next tick rather than
    /// stopping the loop.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep_once(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("reaper shutting down");
                        return;
                    }
                }
            }
        }
    }
}
