//! Per-session heartbeat bookkeeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use herald_core::Principal;
use tokio::time::Instant;

use crate::config::HeartbeatValue;

/// Grace factor applied to the client's write interval before a silent
/// session is considered gone.
const HEARTBEAT_MULTIPLIER: u32 = 3;

/// A protocol session established by CONNECTION_INIT.
#[derive(Debug)]
pub struct SessionInfo {
    session_id: String,
    user: Option<Principal>,
    read_interval: Duration,
    write_interval: Duration,
    created: Instant,
    // Milliseconds since `created`.
    last_read: AtomicU64,
    last_write: AtomicU64,
}

impl SessionInfo {
    /// Negotiate intervals from the client's and the server's heartbeat.
    ///
    /// - read interval: `max(client writes, server expects) * 3` when both
    ///   are positive
    /// - write interval: `max(client expects, server writes)` when both are
    ///   positive
    ///
    /// A missing heartbeat on either side disables both.
    pub fn new(
        session_id: impl Into<String>,
        user: Option<Principal>,
        client: Option<HeartbeatValue>,
        server: Option<HeartbeatValue>,
    ) -> Self {
        let (read_interval, write_interval) = match (client, server) {
            (Some(client), Some(server)) => (
                negotiate(client.outgoing, server.incoming) * HEARTBEAT_MULTIPLIER,
                negotiate(client.incoming, server.outgoing),
            ),
            _ => (Duration::ZERO, Duration::ZERO),
        };
        Self {
            session_id: session_id.into(),
            user,
            read_interval,
            write_interval,
            created: Instant::now(),
            last_read: AtomicU64::new(0),
            last_write: AtomicU64::new(0),
        }
    }

    /// Session id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Authenticated user, if any.
    pub fn user(&self) -> Option<&Principal> {
        self.user.as_ref()
    }

    /// Longest allowed client silence. Zero disables the check.
    pub fn read_interval(&self) -> Duration {
        self.read_interval
    }

    /// Longest allowed server silence. Zero disables keep-alives.
    pub fn write_interval(&self) -> Duration {
        self.write_interval
    }

    /// Record inbound activity at `now`.
    pub fn touch_read(&self, now: Instant) {
        self.last_read.store(self.offset(now), Ordering::Relaxed);
    }

    /// Record outbound activity at `now`.
    pub fn touch_write(&self, now: Instant) {
        self.last_write.store(self.offset(now), Ordering::Relaxed);
    }

    /// Time since the last inbound activity.
    pub fn since_last_read(&self, now: Instant) -> Duration {
        self.since(&self.last_read, now)
    }

    /// Time since the last outbound activity.
    pub fn since_last_write(&self, now: Instant) -> Duration {
        self.since(&self.last_write, now)
    }

    /// Whether the client has been silent longer than the read interval.
    pub fn is_read_stale(&self, now: Instant) -> bool {
        !self.read_interval.is_zero() && self.since_last_read(now) > self.read_interval
    }

    /// Whether the server has been silent longer than the write interval.
    pub fn is_write_due(&self, now: Instant) -> bool {
        !self.write_interval.is_zero() && self.since_last_write(now) > self.write_interval
    }

    fn offset(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.created).as_millis() as u64
    }

    fn since(&self, stamp: &AtomicU64, now: Instant) -> Duration {
        let at = self.created + Duration::from_millis(stamp.load(Ordering::Relaxed));
        now.saturating_duration_since(at)
    }
}

fn negotiate(a: Duration, b: Duration) -> Duration {
    if a.is_zero() || b.is_zero() {
        Duration::ZERO
    } else {
        a.max(b)
    }
}

/// Live sessions keyed by session id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionInfo>>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `info`, replacing any session with the same id.
    pub fn insert(&self, info: Arc<SessionInfo>) -> Option<Arc<SessionInfo>> {
        self.sessions.insert(info.session_id.clone(), info)
    }

    /// Look a session up.
    pub fn get(&self, session_id: &str) -> Option<Arc<SessionInfo>> {
        self.sessions.get(session_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Forget a session.
    pub fn remove(&self, session_id: &str) -> Option<Arc<SessionInfo>> {
        self.sessions.remove(session_id).map(|(_, info)| info)
    }

    /// Stamp inbound activity if the session is known.
    pub fn touch_read(&self, session_id: &str, now: Instant) {
        if let Some(info) = self.sessions.get(session_id) {
            info.touch_read(now);
        }
    }

    /// Stamp outbound activity if the session is known.
    pub fn touch_write(&self, session_id: &str, now: Instant) {
        if let Some(info) = self.sessions.get(session_id) {
            info.touch_write(now);
        }
    }

    /// All sessions, detached from the map.
    pub fn snapshot(&self) -> Vec<Arc<SessionInfo>> {
        self.sessions.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
