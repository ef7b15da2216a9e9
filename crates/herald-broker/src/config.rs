//! Broker configuration.

use std::time::Duration;

/// A heartbeat pair as exchanged between peers.
///
/// `outgoing` is how often the sender promises to write; `incoming` is how
/// often it wants the other side to write. Zero means "none".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatValue {
    /// How often this side writes.
    pub outgoing: Duration,
    /// How often this side expects the peer to write.
    pub incoming: Duration,
}

impl HeartbeatValue {
    /// Build from milliseconds.
    pub const fn from_millis(outgoing: u64, incoming: u64) -> Self {
        Self {
            outgoing: Duration::from_millis(outgoing),
            incoming: Duration::from_millis(incoming),
        }
    }

    /// Delay between heartbeat task runs: the smaller positive value, or
    /// `None` when both are zero.
    pub fn task_delay(&self) -> Option<Duration> {
        match (self.outgoing.is_zero(), self.incoming.is_zero()) {
            (true, true) => None,
            (false, true) => Some(self.outgoing),
            (true, false) => Some(self.incoming),
            (false, false) => Some(self.outgoing.min(self.incoming)),
        }
    }
}

impl Default for HeartbeatValue {
    fn default() -> Self {
        Self::from_millis(5000, 5000)
    }
}

/// How a subscriber groups results into DATA frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferPolicy {
    /// Longest time the first result of a batch waits before a flush.
    pub time_span: Duration,
    /// Flush as soon as this many results are pending. At least 1.
    pub max_count: usize,
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self {
            time_span: Duration::from_millis(1000),
            max_count: 50,
        }
    }
}

/// Settings of a [`BrokerMessageHandler`](crate::BrokerMessageHandler).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Server heartbeat. `None` disables the heartbeat task and interval
    /// negotiation.
    pub heartbeat: Option<HeartbeatValue>,
    /// Result batching.
    pub buffer: BufferPolicy,
    /// Destinations the handler accepts. Empty accepts everything.
    pub destination_prefixes: Vec<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            heartbeat: Some(HeartbeatValue::default()),
            buffer: BufferPolicy::default(),
            destination_prefixes: Vec::new(),
        }
    }
}

impl BrokerConfig {
    /// Whether a message sent to `destination` is for this broker.
    ///
    /// Messages without a destination are accepted only when no prefixes are
    /// configured.
    pub fn accepts_destination(&self, destination: Option<&str>) -> bool {
        if self.destination_prefixes.is_empty() {
            return true;
        }
        destination.is_some_and(|dest| {
            self.destination_prefixes
                .iter()
                .any(|prefix| dest.starts_with(prefix.as_str()))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.heartbeat, Some(HeartbeatValue::from_millis(5000, 5000)));
        assert_eq!(config.buffer.time_span, Duration::from_millis(1000));
        assert_eq!(config.buffer.max_count, 50);
        assert!(config.destination_prefixes.is_empty());
    }

    #[test]
    fn task_delay_takes_smaller_positive_value() {
        assert_eq!(
            HeartbeatValue::from_millis(5000, 2000).task_delay(),
            Some(Duration::from_millis(2000))
        );
        assert_eq!(
            HeartbeatValue::from_millis(0, 3000).task_delay(),
            Some(Duration::from_millis(3000))
        );
        assert_eq!(
            HeartbeatValue::from_millis(4000, 0).task_delay(),
            Some(Duration::from_millis(4000))
        );
        assert_eq!(HeartbeatValue::from_millis(0, 0).task_delay(), None);
    }

    #[test]
    fn destination_prefixes() {
        let open = BrokerConfig::default();
        assert!(open.accepts_destination(None));
        assert!(open.accepts_destination(Some("/anything")));

        let scoped = BrokerConfig {
            destination_prefixes: vec!["/ws/graphql".into()],
            ..BrokerConfig::default()
        };
        assert!(scoped.accepts_destination(Some("/ws/graphql")));
        assert!(!scoped.accepts_destination(Some("/topic/news")));
        assert!(!scoped.accepts_destination(None));
    }
}
