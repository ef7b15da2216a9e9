//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `"ok"` while the broker accepts work, `"unavailable"` otherwise.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Sessions that completed `connection_init`.
    pub sessions: usize,
    /// Live subscriptions across all sessions.
    pub subscriptions: usize,
    /// Whether the broker is available.
    pub broker_available: bool,
}

/// Live counters sampled for a health response.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthCounters {
    /// Open WebSocket connections.
    pub connections: usize,
    /// Registered sessions.
    pub sessions: usize,
    /// Live subscriptions.
    pub subscriptions: usize,
    /// Broker availability.
    pub broker_available: bool,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, counters: HealthCounters) -> HealthResponse {
    let status = if counters.broker_available { "ok" } else { "unavailable" };
    HealthResponse {
        status: status.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: counters.connections,
        sessions: counters.sessions,
        subscriptions: counters.subscriptions,
        broker_available: counters.broker_available,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn available() -> HealthCounters {
        HealthCounters {
            broker_available: true,
            ..HealthCounters::default()
        }
    }

    #[test]
    fn status_is_ok_when_available() {
        let resp = health_check(Instant::now(), available());
        assert_eq!(resp.status, "ok");
    }

    #[test]
    fn status_reports_unavailable_broker() {
        let resp = health_check(Instant::now(), HealthCounters::default());
        assert_eq!(resp.status, "unavailable");
        assert!(!resp.broker_available);
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, available());
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serializes_camel_case() {
        let resp = health_check(
            Instant::now(),
            HealthCounters {
                connections: 4,
                sessions: 3,
                subscriptions: 2,
                broker_available: true,
            },
        );
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["connections"], 4);
        assert_eq!(json["sessions"], 3);
        assert_eq!(json["subscriptions"], 2);
        assert_eq!(json["brokerAvailable"], true);
        assert!(json.get("uptimeSecs").is_some());
    }
}
