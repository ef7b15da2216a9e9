//! Periodic session heartbeat task.

use std::sync::Weak;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Something checked on every heartbeat tick.
pub trait HeartbeatTarget: Send + Sync {
    /// Inspect sessions at `now`.
    fn on_heartbeat(&self, now: Instant);
}

/// Why the heartbeat loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatExit {
    /// The cancellation token fired.
    Cancelled,
    /// The target was dropped.
    TargetDropped,
}

/// Call `target.on_heartbeat` every `delay` until cancelled.
///
/// The first check happens one `delay` after the start. A slow tick pushes
/// the following ones back instead of bursting to catch up.
pub async fn run_heartbeat<T>(target: Weak<T>, delay: Duration, cancel: CancellationToken) -> HeartbeatExit
where
    T: HeartbeatTarget + ?Sized,
{
    let mut ticker = time::interval_at(Instant::now() + delay, delay);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(delay_ms = delay.as_millis() as u64, "heartbeat task started");

    loop {
        tokio::select! {
            () = cancel.cancelled() => return HeartbeatExit::Cancelled,
            now = ticker.tick() => {
                let Some(target) = target.upgrade() else {
                    return HeartbeatExit::TargetDropped;
                };
                target.on_heartbeat(now);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
