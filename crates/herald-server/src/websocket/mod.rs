//! WebSocket transport for the `graphql-ws` sub-protocol.

pub mod auth;
pub mod connection;
pub mod outbound;
pub mod protocol;
pub mod session;
pub mod stats;

pub use auth::{ConnectionAuthenticator, TokenAuthenticator};
pub use connection::{ClientConnection, Outgoing};
pub use outbound::ConnectionRegistry;
pub use protocol::{GRAPHQL_WS, GraphQlWsProtocol, MINIMUM_WEBSOCKET_MESSAGE_SIZE};
pub use session::run_ws_session;
pub use stats::{ProtocolStats, StatsSnapshot, spawn_stats_logger};
