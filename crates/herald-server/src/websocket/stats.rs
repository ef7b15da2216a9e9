//! Per-server protocol counters and their periodic log line.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Counters of protocol events since startup.
#[derive(Debug, Default)]
pub struct ProtocolStats {
    connect: AtomicU64,
    connected: AtomicU64,
    start: AtomicU64,
    stop: AtomicU64,
    error: AtomicU64,
    disconnect: AtomicU64,
}

/// Point-in-time copy of [`ProtocolStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// `connection_init` frames received.
    pub connect: u64,
    /// `connection_ack` frames sent.
    pub connected: u64,
    /// `start` frames received.
    pub start: u64,
    /// `stop` frames received.
    pub stop: u64,
    /// Inbound frames that could not be decoded.
    pub error: u64,
    /// Sessions ended or terminated.
    pub disconnect: u64,
}

impl ProtocolStats {
    /// All counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a `connection_init`.
    pub fn record_connect(&self) {
        let _ = self.connect.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a `connection_ack`.
    pub fn record_connected(&self) {
        let _ = self.connected.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a `start`.
    pub fn record_start(&self) {
        let _ = self.start.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a `stop`.
    pub fn record_stop(&self) {
        let _ = self.stop.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an undecodable frame.
    pub fn record_error(&self) {
        let _ = self.error.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a terminate or closed session.
    pub fn record_disconnect(&self) {
        let _ = self.disconnect.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connect: self.connect.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
            start: self.start.load(Ordering::Relaxed),
            stop: self.stop.load(Ordering::Relaxed),
            error: self.error.load(Ordering::Relaxed),
            disconnect: self.disconnect.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed CONNECT({})-CONNECTED({})-START({})-STOP({})-ERROR({})-DISCONNECT({})",
            self.connect, self.connected, self.start, self.stop, self.error, self.disconnect
        )
    }
}

/// Log `stats` at INFO every `period` until `cancel` fires.
///
/// A zero period disables logging and returns `None`.
pub fn spawn_stats_logger(
    stats: Arc<ProtocolStats>,
    period: Duration,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    if period.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => info!(stats = %stats.snapshot(), "graphql-ws protocol stats"),
            }
        }
    }))
}
