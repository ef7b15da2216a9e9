//! `HeraldServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::{Extensions, HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use herald_broker::{BrokerConfig, BrokerMessageHandler, QueryExecutor};
use herald_core::Principal;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::errors::{Result, ServerError};
use crate::executor::TopicExecutor;
use crate::health::{self, HealthCounters, HealthResponse};
use crate::metrics::render;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::{
    ConnectionAuthenticator, ConnectionRegistry, GraphQlWsProtocol, ProtocolStats, TokenAuthenticator,
    run_ws_session, spawn_stats_logger,
};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Protocol adapter for new WebSocket sessions.
    pub protocol: Arc<GraphQlWsProtocol>,
    /// Broker handler.
    pub handler: Arc<BrokerMessageHandler>,
    /// Open connections.
    pub connections: Arc<ConnectionRegistry>,
    /// Topic feeds, when the server runs its built-in executor.
    pub topics: Option<Arc<TopicExecutor>>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
}

/// The herald server.
pub struct HeraldServer {
    config: Arc<ServerConfig>,
    handler: Arc<BrokerMessageHandler>,
    protocol: Arc<GraphQlWsProtocol>,
    connections: Arc<ConnectionRegistry>,
    stats: Arc<ProtocolStats>,
    topics: Option<Arc<TopicExecutor>>,
    metrics: Option<PrometheusHandle>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl HeraldServer {
    /// Server backed by a [`TopicExecutor`]; events are published through
    /// `POST /events/{topic}`.
    pub fn new(config: ServerConfig, broker: BrokerConfig, metrics: Option<PrometheusHandle>) -> Self {
        let topics = Arc::new(TopicExecutor::new(config.topic_capacity));
        let executor: Arc<dyn QueryExecutor> = topics.clone();
        Self::build(config, broker, executor, Some(topics), metrics)
    }

    /// Server running queries through a caller-supplied executor.
    pub fn with_executor(
        config: ServerConfig,
        broker: BrokerConfig,
        executor: Arc<dyn QueryExecutor>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self::build(config, broker, executor, None, metrics)
    }

    fn build(
        config: ServerConfig,
        broker: BrokerConfig,
        executor: Arc<dyn QueryExecutor>,
        topics: Option<Arc<TopicExecutor>>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let stats = Arc::new(ProtocolStats::new());
        let connections = Arc::new(ConnectionRegistry::new(Arc::clone(&stats)));
        let handler = Arc::new(BrokerMessageHandler::new(broker, executor, connections.clone()));
        let mut protocol = GraphQlWsProtocol::new(
            Arc::clone(&handler),
            Arc::clone(&connections),
            Arc::clone(&stats),
            config.endpoint.clone(),
        );
        if !config.auth_tokens.is_empty() {
            let tokens = TokenAuthenticator::new(config.auth_tokens.clone());
            info!(tokens = tokens.len(), "connection-param authentication enabled");
            protocol = protocol.with_authenticator(Arc::new(tokens));
        }
        Self {
            protocol: Arc::new(protocol),
            config: Arc::new(config),
            handler,
            connections,
            stats,
            topics,
            metrics,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Resolve session users with `authenticator` instead of the configured
    /// tokens.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn ConnectionAuthenticator>) -> Self {
        self.protocol = Arc::new(
            GraphQlWsProtocol::new(
                Arc::clone(&self.handler),
                Arc::clone(&self.connections),
                Arc::clone(&self.stats),
                self.config.endpoint.clone(),
            )
            .with_authenticator(authenticator),
        );
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            config: Arc::clone(&self.config),
            protocol: Arc::clone(&self.protocol),
            handler: Arc::clone(&self.handler),
            connections: Arc::clone(&self.connections),
            topics: self.topics.clone(),
            metrics: self.metrics.clone(),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/events/{topic}", post(publish_handler))
            .route(&self.config.endpoint, get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Start the broker, bind the listener and serve until shutdown.
    ///
    /// Returns the bound address and the server task. The task stops the
    /// broker once the listener has drained.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|source| ServerError::Bind {
                address: format!("{}:{}", self.config.host, self.config.port),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        self.handler.start();
        let stats_task = spawn_stats_logger(
            Arc::clone(&self.stats),
            self.config.stats_logging_period,
            self.shutdown.token(),
        );

        let router = self.router();
        let token = self.shutdown.token();
        let handler = Arc::clone(&self.handler);
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                token.cancelled().await;
            });
            if let Err(e) = serve.await {
                warn!(error = %e, "server stopped with error");
            }
            handler.stop();
            if let Some(task) = stats_task {
                task.abort();
            }
            info!("herald server stopped");
        });

        info!(%local_addr, endpoint = %self.config.endpoint, "herald server listening");
        Ok((local_addr, handle))
    }

    /// The broker handler.
    pub fn handler(&self) -> &Arc<BrokerMessageHandler> {
        &self.handler
    }

    /// Open connections.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Topic feeds of the built-in executor.
    pub fn topics(&self) -> Option<&Arc<TopicExecutor>> {
        self.topics.as_ref()
    }

    /// Protocol counters.
    pub fn stats(&self) -> &Arc<ProtocolStats> {
        &self.stats
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET {endpoint}
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    extensions: Extensions,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !state.config.origin_allowed(origin) {
        warn!(origin, "websocket upgrade refused for origin");
        counter!("ws_origin_rejected_total").increment(1);
        return StatusCode::FORBIDDEN.into_response();
    }
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let session_id = Uuid::now_v7().to_string();
    let user = extensions.get::<Principal>().cloned();
    let protocol = Arc::clone(&state.protocol);
    let capacity = state.config.send_queue_capacity;
    let shutdown = state.shutdown.token();

    ws.protocols(state.protocol.supported_protocols().iter().copied())
        .max_message_size(state.config.effective_max_message_size())
        .on_upgrade(move |socket| run_ws_session(socket, session_id, user, protocol, capacity, shutdown))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let resp = health::health_check(
        state.start_time,
        HealthCounters {
            connections: state.connections.len(),
            sessions: state.handler.sessions().len(),
            subscriptions: state.handler.registry().len(),
            broker_available: state.handler.is_available(),
        },
    );
    let status = if resp.broker_available {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(resp))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// POST /events/{topic}
async fn publish_handler(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Json(event): Json<Value>,
) -> Response {
    let Some(topics) = &state.topics else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let receivers = topics.publish(&topic, event);
    counter!("events_published_total").increment(1);
    Json(json!({ "topic": topic, "receivers": receivers })).into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
