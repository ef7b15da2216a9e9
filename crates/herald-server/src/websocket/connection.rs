//! WebSocket client connection state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use herald_core::Principal;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::warn;

/// Work item for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// A text frame.
    Text(String),
    /// Close the socket after everything queued before it.
    Close,
}

/// Represents a connected WebSocket client.
pub struct ClientConnection {
    /// Session id assigned at upgrade.
    pub id: String,
    user: Option<Principal>,
    tx: mpsc::Sender<Outgoing>,
    /// When this connection was established.
    pub connected_at: Instant,
    dropped_messages: AtomicU64,
    aborted: CancellationToken,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: String, user: Option<Principal>, tx: mpsc::Sender<Outgoing>) -> Self {
        Self {
            id,
            user,
            tx,
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
            aborted: CancellationToken::new(),
        }
    }

    /// Principal that opened the connection, if authenticated.
    pub fn user(&self) -> Option<&Principal> {
        self.user.as_ref()
    }

    /// Queue a text frame.
    ///
    /// Returns `false` if the channel is full or closed, and increments
    /// the dropped message counter. The first failure aborts the connection
    /// and every later frame is refused.
    pub fn send_text(&self, text: String) -> bool {
        self.enqueue(Outgoing::Text(text))
    }

    /// Ask the writer to close the socket.
    pub fn close(&self) -> bool {
        self.enqueue(Outgoing::Close)
    }

    /// Whether a frame could not be queued.
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_cancelled()
    }

    /// Resolves once a frame could not be queued.
    pub fn aborted(&self) -> WaitForCancellationFuture<'_> {
        self.aborted.cancelled()
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    fn enqueue(&self, item: Outgoing) -> bool {
        if !self.aborted.is_cancelled() && self.tx.try_send(item).is_ok() {
            return true;
        }
        let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
        if !self.aborted.is_cancelled() {
            warn!(session_id = %self.id, "outbound queue full or closed, aborting connection");
            self.aborted.cancel();
        }
        false
    }
}
