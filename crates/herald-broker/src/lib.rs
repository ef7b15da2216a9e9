//! # herald-broker
//!
//! The subscription side of a `graphql-ws` server, independent of any
//! transport:
//!
//! - [`BrokerMessageHandler`] interprets inbound operation messages, owns the
//!   session table and runs the heartbeat task
//! - [`ChannelSubscriber`] pumps one subscription's result stream into
//!   batched DATA frames
//! - [`SubscriptionRegistry`] maps (session id, operation id) to the live
//!   subscriber
//! - [`SessionInfo`] tracks negotiated heartbeat intervals and activity times
//!
//! Frames leave through an [`OutboundChannel`]; queries are run by a
//! [`QueryExecutor`]. Both are supplied by the embedding server.

#![deny(unsafe_code)]

pub mod batch;
pub mod channel;
pub mod config;
pub mod errors;
pub mod executor;
pub mod handler;
pub mod heartbeat;
pub mod registry;
pub mod session;
pub mod subscriber;

#[cfg(test)]
pub(crate) mod test_support;

pub use batch::BatchBuffer;
pub use channel::{ClientOutbound, FrameKind, OutboundChannel, OutboundMessage};
pub use config::{BrokerConfig, BufferPolicy, HeartbeatValue};
pub use errors::{BrokerError, Result};
pub use executor::QueryExecutor;
pub use handler::{BrokerAvailabilityEvent, BrokerMessageHandler, InboundMessage};
pub use registry::{SubscriptionKey, SubscriptionRegistry};
pub use session::{SessionInfo, SessionRegistry};
pub use subscriber::{ChannelSubscriber, SubscriberState};
