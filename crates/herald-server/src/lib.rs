//! # herald-server
//!
//! Axum server exposing the herald broker over WebSocket.
//!
//! - `GET {endpoint}`: WebSocket upgrade negotiating the `graphql-ws`
//!   sub-protocol
//! - `GET /health`: liveness and broker counters
//! - `GET /metrics`: Prometheus text format
//! - `POST /events/{topic}`: publish an event to topic subscribers

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod executor;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use executor::TopicExecutor;
pub use server::{AppState, HeraldServer};
pub use shutdown::ShutdownCoordinator;
