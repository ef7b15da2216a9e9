//! Outbound frames and the channel they are sent through.

use std::sync::Arc;

use herald_core::{OperationMessage, Principal};
use tokio::time::Instant;

use crate::session::SessionRegistry;

/// How the transport should treat a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// A regular protocol frame.
    Message,
    /// A keep-alive written because the session was idle.
    Heartbeat,
    /// The last frame for the session; the transport closes it afterwards.
    Disconnect,
}

/// A frame addressed to one session.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundMessage {
    /// Target session.
    pub session_id: String,
    /// Principal of the target session.
    pub user: Option<Principal>,
    /// Transport hint.
    pub kind: FrameKind,
    /// The frame.
    pub payload: OperationMessage,
}

impl OutboundMessage {
    /// A regular frame.
    pub fn new(session_id: impl Into<String>, user: Option<Principal>, payload: OperationMessage) -> Self {
        Self {
            session_id: session_id.into(),
            user,
            kind: FrameKind::Message,
            payload,
        }
    }

    /// Change the transport hint.
    #[must_use]
    pub fn with_kind(mut self, kind: FrameKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Where the broker sends frames.
///
/// `send` must not block: it hands the frame to the transport and reports
/// whether the transport accepted it.
pub trait OutboundChannel: Send + Sync {
    /// Queue `message` for delivery. `false` if it was dropped.
    fn send(&self, message: OutboundMessage) -> bool;
}

/// Client-facing channel: forwards to the transport and stamps the session's
/// last-write time for every accepted frame.
pub struct ClientOutbound {
    inner: Arc<dyn OutboundChannel>,
    sessions: Arc<SessionRegistry>,
}

impl ClientOutbound {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn OutboundChannel>, sessions: Arc<SessionRegistry>) -> Self {
        Self { inner, sessions }
    }
}

impl OutboundChannel for ClientOutbound {
    fn send(&self, message: OutboundMessage) -> bool {
        let session_id = message.session_id.clone();
        let sent = self.inner.send(message);
        if sent {
            self.sessions.touch_write(&session_id, Instant::now());
        }
        sent
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
