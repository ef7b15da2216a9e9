//! Interprets inbound `graphql-ws` operation messages.
//!
//! The handler owns three pieces of state:
//! - the session table, filled by CONNECTION_INIT and emptied by
//!   CONNECTION_TERMINATE or the heartbeat
//! - the subscription registry, filled by START and emptied by STOP,
//!   CONNECTION_TERMINATE or stream completion
//! - the availability flag, toggled by [`BrokerAvailabilityEvent`]s

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use herald_core::{
    ExecutionData, MessageType, OperationMessage, Principal, QueryParameters, ResultStream,
};
use metrics::counter;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::channel::{ClientOutbound, FrameKind, OutboundChannel, OutboundMessage};
use crate::config::{BrokerConfig, HeartbeatValue};
use crate::errors::BrokerError;
use crate::executor::QueryExecutor;
use crate::heartbeat::{HeartbeatExit, HeartbeatTarget, run_heartbeat};
use crate::registry::SubscriptionRegistry;
use crate::session::{SessionInfo, SessionRegistry};
use crate::subscriber::ChannelSubscriber;

/// Error text sent while the broker is unavailable.
pub const BROKER_NOT_AVAILABLE: &str = "Broker Not Available.";

const NO_DATA: &str = "Execution returned no data";
const MISSING_OPERATION_ID: &str = "Operation id is required";
const HEARTBEAT_TIMEOUT: &str = "No messages received within the heartbeat interval";

/// One decoded client frame plus its session context.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Transport session the frame arrived on.
    pub session_id: String,
    /// Authenticated user of the session.
    pub user: Option<Principal>,
    /// Endpoint the frame was sent to.
    pub destination: Option<String>,
    /// Heartbeat the client asked for (CONNECTION_INIT only).
    pub client_heartbeat: Option<HeartbeatValue>,
    /// Connection parameters from the CONNECTION_INIT payload.
    pub headers: Map<String, Value>,
    /// The frame.
    pub payload: OperationMessage,
}

impl InboundMessage {
    /// A message for `session_id` with no other context.
    pub fn new(session_id: impl Into<String>, payload: OperationMessage) -> Self {
        Self {
            session_id: session_id.into(),
            user: None,
            destination: None,
            client_heartbeat: None,
            headers: Map::new(),
            payload,
        }
    }

    /// Set the principal.
    #[must_use]
    pub fn with_user(mut self, user: Option<Principal>) -> Self {
        self.user = user;
        self
    }

    /// Set the destination.
    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Set the client heartbeat.
    #[must_use]
    pub fn with_client_heartbeat(mut self, heartbeat: HeartbeatValue) -> Self {
        self.client_heartbeat = Some(heartbeat);
        self
    }
}

/// Broker availability change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BrokerAvailabilityEvent {
    /// Whether the broker accepts new sessions and operations.
    pub available: bool,
}

struct HeartbeatTask {
    cancel: CancellationToken,
    handle: JoinHandle<HeartbeatExit>,
}

/// Handles the `graphql-ws` protocol for every session.
pub struct BrokerMessageHandler {
    config: BrokerConfig,
    executor: Arc<dyn QueryExecutor>,
    outbound: Arc<ClientOutbound>,
    sessions: Arc<SessionRegistry>,
    registry: Arc<SubscriptionRegistry>,
    available: AtomicBool,
    running: AtomicBool,
    heartbeat: Mutex<Option<HeartbeatTask>>,
}

impl BrokerMessageHandler {
    /// Create a stopped handler. Call [`start`](Self::start) before feeding it
    /// messages.
    pub fn new(
        config: BrokerConfig,
        executor: Arc<dyn QueryExecutor>,
        outbound: Arc<dyn OutboundChannel>,
    ) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        Self {
            config,
            executor,
            outbound: Arc::new(ClientOutbound::new(outbound, Arc::clone(&sessions))),
            sessions,
            registry: Arc::new(SubscriptionRegistry::new()),
            available: AtomicBool::new(false),
            running: AtomicBool::new(false),
            heartbeat: Mutex::new(None),
        }
    }

    /// Start accepting messages, publish availability and launch the
    /// heartbeat task if one is configured.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        self.on_availability(BrokerAvailabilityEvent { available: true });

        let delay = self.config.heartbeat.and_then(|hb| hb.task_delay());
        if let Some(delay) = delay {
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(run_heartbeat(Arc::downgrade(self), delay, cancel.clone()));
            *self.heartbeat.lock() = Some(HeartbeatTask { cancel, handle });
        }
        info!(
            heartbeat_ms = delay.map_or(0, |d| d.as_millis() as u64),
            buffer_count = self.config.buffer.max_count,
            buffer_time_span_ms = self.config.buffer.time_span.as_millis() as u64,
            "broker started"
        );
    }

    /// Stop accepting messages, stop the heartbeat task and cancel every
    /// subscription.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.on_availability(BrokerAvailabilityEvent { available: false });
        if let Some(task) = self.heartbeat.lock().take() {
            task.cancel.cancel();
            drop(task.handle);
        }
        let cancelled = self.registry.unsubscribe_all(|sub| {
            let _ = sub.cancel();
        });
        info!(cancelled, "broker stopped");
    }

    /// Apply an availability change.
    pub fn on_availability(&self, event: BrokerAvailabilityEvent) {
        let previous = self.available.swap(event.available, Ordering::AcqRel);
        if previous != event.available {
            info!(available = event.available, "broker availability changed");
        }
    }

    /// Whether [`start`](Self::start) has been called without a matching stop.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether the broker currently accepts work.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Established protocol sessions.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Active subscriptions.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Handle one inbound frame.
    #[instrument(skip_all, fields(session_id = %message.session_id, message_type = %message.payload.message_type))]
    pub async fn handle_message(&self, message: InboundMessage) {
        if !self.is_running() {
            debug!("broker not running, message ignored");
            return;
        }
        self.sessions.touch_read(&message.session_id, Instant::now());

        if !self.config.accepts_destination(message.destination.as_deref()) {
            debug!(destination = ?message.destination, "destination not handled by this broker");
            return;
        }

        match message.payload.message_type {
            MessageType::ConnectionInit => self.handle_connection_init(&message),
            MessageType::Start => self.handle_start(&message).await,
            MessageType::Stop => self.handle_stop(&message),
            MessageType::ConnectionTerminate => self.handle_connection_terminate(&message),
            other => debug!(message_type = %other, "ignoring message"),
        }
    }

    /// Disconnect silent sessions and send keep-alives to idle ones.
    pub fn check_heartbeats(&self, now: Instant) {
        for info in self.sessions.snapshot() {
            if info.is_read_stale(now) {
                self.disconnect_stale(&info, now);
                continue;
            }
            if info.is_write_due(now) {
                let message = OutboundMessage::new(
                    info.session_id(),
                    info.user().cloned(),
                    OperationMessage::keep_alive(),
                )
                .with_kind(FrameKind::Heartbeat);
                if self.outbound.send(message) {
                    counter!("graphql_keepalives_sent_total").increment(1);
                }
            }
        }
    }

    fn handle_connection_init(&self, message: &InboundMessage) {
        if !self.is_available() {
            warn!("connection refused, broker not available");
            self.reply_error(message, MessageType::ConnectionError, BROKER_NOT_AVAILABLE);
            return;
        }

        let info = SessionInfo::new(
            message.session_id.clone(),
            message.user.clone(),
            message.client_heartbeat,
            self.config.heartbeat,
        );
        debug!(
            read_ms = info.read_interval().as_millis() as u64,
            write_ms = info.write_interval().as_millis() as u64,
            "session established"
        );
        if self.sessions.insert(Arc::new(info)).is_some() {
            debug!("replaced existing session");
        }
        self.reply(
            message,
            OperationMessage::new(message.payload.id.clone(), MessageType::ConnectionAck),
        );
    }

    async fn handle_start(&self, message: &InboundMessage) {
        if !self.is_available() {
            self.reply_error(message, MessageType::Error, BROKER_NOT_AVAILABLE);
            return;
        }
        let Some(operation_id) = message.payload.id.clone() else {
            self.reply_error(message, MessageType::Error, MISSING_OPERATION_ID);
            return;
        };

        let params = match QueryParameters::from_payload(message.payload.payload.as_ref()) {
            Ok(params) => params,
            Err(e) => {
                debug!(operation_id, error = %e, "rejecting start");
                self.reply_error(message, MessageType::Error, &e.to_string());
                return;
            }
        };

        if self.registry.contains(&message.session_id, &operation_id) {
            self.reject_duplicate(message, &operation_id);
            return;
        }

        info!(operation_id, operation_name = ?params.operation_name, "starting operation");
        let result = self.executor.execute(params).await;

        if !result.errors.is_empty() {
            debug!(operation_id, errors = result.errors.len(), "execution failed");
            let errors = result.error_values();
            self.reply(
                message,
                OperationMessage::errors(Some(operation_id), MessageType::Error, errors),
            );
            return;
        }

        match result.data {
            ExecutionData::None => self.reply_error(message, MessageType::Error, NO_DATA),
            ExecutionData::Value(value) => {
                self.reply(message, OperationMessage::data(Some(operation_id.clone()), value));
                self.reply(message, OperationMessage::complete(Some(operation_id)));
            }
            ExecutionData::Stream(stream) => self.subscribe(message, operation_id, stream),
        }
    }

    fn subscribe(&self, message: &InboundMessage, operation_id: String, stream: ResultStream) {
        let outbound: Arc<dyn OutboundChannel> = self.outbound.clone();
        let subscriber = Arc::new(ChannelSubscriber::new(
            message.session_id.clone(),
            operation_id.clone(),
            message.user.clone(),
            outbound,
            self.config.buffer,
        ));

        let registry = Arc::clone(&self.registry);
        let outcome = self.registry.subscribe(
            &message.session_id,
            &operation_id,
            subscriber,
            move |subscriber| {
                let _ = tokio::spawn(async move {
                    subscriber.run(stream).await;
                    let _ = registry.release(
                        subscriber.session_id(),
                        subscriber.operation_id(),
                        &subscriber,
                    );
                });
            },
        );

        match outcome {
            Ok(()) => {
                counter!("graphql_subscriptions_started_total").increment(1);
                debug!(operation_id, "subscription registered");
            }
            Err(BrokerError::DuplicateSubscription { .. }) => {
                self.reject_duplicate(message, &operation_id);
            }
            Err(e) => self.reply_error(message, MessageType::Error, &e.to_string()),
        }
    }

    fn handle_stop(&self, message: &InboundMessage) {
        let Some(operation_id) = message.payload.id.as_deref() else {
            debug!("stop without operation id ignored");
            return;
        };
        let found = self.registry.unsubscribe(&message.session_id, operation_id, |sub| {
            let _ = sub.complete();
        });
        debug!(operation_id, found, "stop");
    }

    fn handle_connection_terminate(&self, message: &InboundMessage) {
        let cancelled = self.registry.unsubscribe_session(&message.session_id, |sub| {
            let _ = sub.cancel();
        });
        let _ = self.sessions.remove(&message.session_id);
        debug!(cancelled, "session terminated");
    }

    fn disconnect_stale(&self, info: &SessionInfo, now: Instant) {
        warn!(
            session_id = info.session_id(),
            silent_ms = info.since_last_read(now).as_millis() as u64,
            "no messages within heartbeat interval, disconnecting"
        );
        let _ = self.sessions.remove(info.session_id());
        let _ = self.registry.unsubscribe_session(info.session_id(), |sub| {
            let _ = sub.cancel();
        });
        counter!("graphql_sessions_timed_out_total").increment(1);

        let frame = OperationMessage::error_text(None, MessageType::ConnectionError, HEARTBEAT_TIMEOUT);
        let _ = self.outbound.send(
            OutboundMessage::new(info.session_id(), info.user().cloned(), frame)
                .with_kind(FrameKind::Disconnect),
        );
    }

    fn reject_duplicate(&self, message: &InboundMessage, operation_id: &str) {
        let err = BrokerError::DuplicateSubscription {
            session_id: message.session_id.clone(),
            operation_id: operation_id.to_owned(),
        };
        warn!(operation_id, "duplicate operation id rejected");
        self.reply_error(message, MessageType::Error, &err.to_string());
    }

    fn reply_error(&self, message: &InboundMessage, message_type: MessageType, text: &str) {
        let frame = OperationMessage::error_text(message.payload.id.clone(), message_type, text);
        self.reply(message, frame);
    }

    fn reply(&self, message: &InboundMessage, frame: OperationMessage) {
        let message_type = frame.message_type;
        let sent = self.outbound.send(OutboundMessage::new(
            message.session_id.clone(),
            message.user.clone(),
            frame,
        ));
        if !sent {
            warn!(%message_type, "reply dropped");
        }
    }
}

impl HeartbeatTarget for BrokerMessageHandler {
    fn on_heartbeat(&self, now: Instant) {
        self.check_heartbeats(now);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use futures::stream;
    use herald_core::{ExecutionResult, GraphQLError, StreamError};
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    use super::*;
    use crate::config::BufferPolicy;
    use crate::test_support::{RecordingChannel, ScriptedExecutor};

    struct Harness {
        handler: Arc<BrokerMessageHandler>,
        recorder: Arc<RecordingChannel>,
        executor: Arc<ScriptedExecutor>,
    }

    fn config() -> BrokerConfig {
        BrokerConfig {
            heartbeat: None,
            buffer: BufferPolicy {
                time_span: Duration::from_millis(100),
                max_count: 50,
            },
            destination_prefixes: Vec::new(),
        }
    }

    fn harness_with(config: BrokerConfig, results: Vec<ExecutionResult>) -> Harness {
        let recorder = Arc::new(RecordingChannel::new());
        let executor = Arc::new(ScriptedExecutor::new(results));
        let handler = Arc::new(BrokerMessageHandler::new(
            config,
            executor.clone(),
            recorder.clone(),
        ));
        handler.start();
        Harness {
            handler,
            recorder,
            executor,
        }
    }

    fn harness(results: Vec<ExecutionResult>) -> Harness {
        harness_with(config(), results)
    }

    fn frame(id: Option<&str>, message_type: MessageType, payload: Option<Value>) -> InboundMessage {
        let mut op = OperationMessage::new(id.map(str::to_owned), message_type);
        op.payload = payload;
        InboundMessage::new("s1", op)
    }

    fn init() -> InboundMessage {
        frame(Some("init"), MessageType::ConnectionInit, None)
    }

    fn start(id: &str) -> InboundMessage {
        frame(
            Some(id),
            MessageType::Start,
            Some(json!({"query": "subscription { ticks }", "variables": {}})),
        )
    }

    fn events(n: usize) -> ExecutionResult {
        ExecutionResult::stream(
            stream::iter((0..n).map(|i| Ok(ExecutionResult::value(json!({"tick": i}))))).boxed(),
        )
    }

    fn open_feed() -> (mpsc::UnboundedSender<ExecutionResult>, ExecutionResult) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = UnboundedReceiverStream::new(rx).map(Ok).boxed();
        (tx, ExecutionResult::stream(stream))
    }

    /// Let spawned pumps run until the runtime is idle.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn connection_init_acks_with_request_id() {
        let h = harness(vec![]);
        h.handler.handle_message(init()).await;

        assert_eq!(h.recorder.types(), vec![MessageType::ConnectionAck]);
        assert_eq!(h.recorder.messages()[0].payload.id.as_deref(), Some("init"));
        assert!(h.handler.sessions().get("s1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_broker_refuses_connection() {
        let h = harness(vec![]);
        h.handler.on_availability(BrokerAvailabilityEvent { available: false });

        h.handler.handle_message(init()).await;

        let sent = h.recorder.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload.message_type, MessageType::ConnectionError);
        assert_eq!(sent[0].payload.id.as_deref(), Some("init"));
        assert_eq!(h.recorder.payload(0), json!({"errors": ["Broker Not Available."]}));
        assert!(h.handler.sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_broker_rejects_start() {
        let h = harness(vec![events(1)]);
        h.handler.on_availability(BrokerAvailabilityEvent { available: false });

        h.handler.handle_message(start("1")).await;

        assert_eq!(h.recorder.types(), vec![MessageType::Error]);
        assert_eq!(h.recorder.payload(0), json!({"errors": ["Broker Not Available."]}));
        assert!(h.executor.seen().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn messages_ignored_until_started() {
        let recorder = Arc::new(RecordingChannel::new());
        let handler = BrokerMessageHandler::new(
            config(),
            Arc::new(ScriptedExecutor::new(vec![])),
            recorder.clone(),
        );
        handler.on_availability(BrokerAvailabilityEvent { available: true });

        handler.handle_message(init()).await;

        assert!(recorder.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_delivers_batched_data_then_complete() {
        let h = harness(vec![events(3)]);
        h.handler.handle_message(init()).await;
        h.recorder.clear();

        h.handler.handle_message(start("1")).await;
        settle().await;

        assert_eq!(h.recorder.types(), vec![MessageType::Data, MessageType::Complete]);
        assert_eq!(
            h.recorder.payload(0),
            json!({"data": [{"tick": 0}, {"tick": 1}, {"tick": 2}]})
        );
        // the pump released its own entry
        assert!(h.handler.registry().is_empty());
        assert_eq!(h.executor.seen()[0].query, "subscription { ticks }");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_sends_single_complete_and_unregisters() {
        let (tx, result) = open_feed();
        let h = harness(vec![result]);
        h.handler.handle_message(start("1")).await;
        settle().await;
        assert!(h.handler.registry().contains("s1", "1"));

        h.handler
            .handle_message(frame(Some("1"), MessageType::Stop, None))
            .await;
        h.handler
            .handle_message(frame(Some("1"), MessageType::Stop, None))
            .await;
        settle().await;

        assert_eq!(h.recorder.types(), vec![MessageType::Complete]);
        assert!(!h.handler.registry().contains("s1", "1"));
        // the pump dropped the stream
        assert!(tx.send(ExecutionResult::value(json!(1))).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_unknown_operation_is_silent() {
        let h = harness(vec![]);
        h.handler
            .handle_message(frame(Some("nope"), MessageType::Stop, None))
            .await;
        assert!(h.recorder.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_cancels_all_session_subscriptions_silently() {
        let (tx1, feed1) = open_feed();
        let (tx2, feed2) = open_feed();
        let h = harness(vec![feed1, feed2]);
        h.handler.handle_message(init()).await;
        h.handler.handle_message(start("1")).await;
        h.handler.handle_message(start("2")).await;
        settle().await;
        assert_eq!(h.handler.registry().len(), 2);
        h.recorder.clear();

        h.handler
            .handle_message(frame(None, MessageType::ConnectionTerminate, None))
            .await;
        settle().await;

        assert!(h.recorder.messages().is_empty());
        assert!(h.handler.registry().is_empty());
        assert!(h.handler.sessions().is_empty());
        assert!(tx1.send(ExecutionResult::value(json!(1))).is_err());
        assert!(tx2.send(ExecutionResult::value(json!(1))).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_start_rejected_and_original_untouched() {
        let (tx, feed) = open_feed();
        let h = harness(vec![feed, events(5)]);
        h.handler.handle_message(start("1")).await;
        settle().await;

        h.handler.handle_message(start("1")).await;

        assert_eq!(h.recorder.types(), vec![MessageType::Error]);
        assert_eq!(h.recorder.messages()[0].payload.id.as_deref(), Some("1"));
        // rejected before execution
        assert_eq!(h.executor.seen().len(), 1);

        h.recorder.clear();
        tx.send(ExecutionResult::value(json!("still here"))).unwrap();
        drop(tx);
        settle().await;
        assert_eq!(h.recorder.types(), vec![MessageType::Data, MessageType::Complete]);
        assert_eq!(h.recorder.payload(0), json!({"data": ["still here"]}));
    }

    #[tokio::test(start_paused = true)]
    async fn same_id_reusable_after_completion() {
        let h = harness(vec![events(1), events(1)]);
        h.handler.handle_message(start("1")).await;
        settle().await;
        h.handler.handle_message(start("1")).await;
        settle().await;

        assert_eq!(
            h.recorder.types(),
            vec![
                MessageType::Data,
                MessageType::Complete,
                MessageType::Data,
                MessageType::Complete
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_query_replies_error() {
        let h = harness(vec![]);
        h.handler
            .handle_message(frame(Some("1"), MessageType::Start, Some(json!({"variables": {}}))))
            .await;

        assert_eq!(h.recorder.types(), vec![MessageType::Error]);
        assert_eq!(
            h.recorder.payload(0),
            json!({"errors": ["invalid query parameters: query is required"]})
        );
        assert!(h.executor.seen().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn start_without_id_replies_error() {
        let h = harness(vec![]);
        h.handler
            .handle_message(frame(None, MessageType::Start, Some(json!({"query": "{ a }"}))))
            .await;
        assert_eq!(h.recorder.types(), vec![MessageType::Error]);
        assert!(h.recorder.messages()[0].payload.id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn execution_errors_are_surfaced() {
        let h = harness(vec![ExecutionResult::from_errors(vec![GraphQLError::new(
            "Unknown field 'tickz'",
        )])]);
        h.handler.handle_message(start("1")).await;

        assert_eq!(h.recorder.types(), vec![MessageType::Error]);
        assert_eq!(
            h.recorder.payload(0),
            json!({"errors": [{"message": "Unknown field 'tickz'"}]})
        );
        assert!(h.handler.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn no_data_replies_error() {
        let h = harness(vec![ExecutionResult::empty()]);
        h.handler.handle_message(start("1")).await;

        assert_eq!(h.recorder.types(), vec![MessageType::Error]);
        assert_eq!(
            h.recorder.payload(0),
            json!({"errors": ["Execution returned no data"]})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn plain_value_replies_data_then_complete() {
        let h = harness(vec![ExecutionResult::value(json!({"hello": "world"}))]);
        h.handler.handle_message(start("q")).await;

        assert_eq!(h.recorder.types(), vec![MessageType::Data, MessageType::Complete]);
        assert_eq!(h.recorder.payload(0), json!({"data": {"hello": "world"}}));
        assert!(h.handler.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stream_error_reaches_client() {
        let failing = ExecutionResult::stream(
            stream::iter(vec![Err(StreamError::new("upstream closed"))]).boxed(),
        );
        let h = harness(vec![failing]);
        h.handler.handle_message(start("1")).await;
        settle().await;

        assert_eq!(h.recorder.types(), vec![MessageType::Error]);
        assert_eq!(h.recorder.payload(0), json!({"errors": ["upstream closed"]}));
        assert!(h.handler.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn destination_filter_drops_foreign_messages() {
        let mut cfg = config();
        cfg.destination_prefixes = vec!["/ws/graphql".into()];
        let h = harness_with(cfg, vec![]);

        h.handler.handle_message(init().with_destination("/other")).await;
        assert!(h.recorder.messages().is_empty());

        h.handler.handle_message(init().with_destination("/ws/graphql")).await;
        assert_eq!(h.recorder.types(), vec![MessageType::ConnectionAck]);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_type_is_ignored() {
        let h = harness(vec![]);
        h.handler
            .handle_message(frame(Some("1"), MessageType::Unknown, None))
            .await;
        assert!(h.recorder.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_session_is_disconnected() {
        let mut cfg = config();
        cfg.heartbeat = Some(HeartbeatValue::from_millis(0, 100));
        let h = harness_with(cfg, vec![]);

        h.handler
            .handle_message(init().with_client_heartbeat(HeartbeatValue::from_millis(100, 0)))
            .await;
        let info = h.handler.sessions().get("s1").unwrap();
        assert_eq!(info.read_interval(), Duration::from_millis(300));
        h.recorder.clear();

        let t0 = Instant::now();
        h.handler.check_heartbeats(t0 + Duration::from_millis(300));
        assert!(h.recorder.messages().is_empty());

        h.handler.check_heartbeats(t0 + Duration::from_millis(301));
        let sent = h.recorder.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload.message_type, MessageType::ConnectionError);
        assert!(sent[0].payload.id.is_none());
        assert_eq!(sent[0].kind, FrameKind::Disconnect);
        assert!(h.handler.sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_session_subscriptions_are_cancelled() {
        let (tx, feed) = open_feed();
        let mut cfg = config();
        cfg.heartbeat = Some(HeartbeatValue::from_millis(0, 100));
        let h = harness_with(cfg, vec![feed]);
        h.handler
            .handle_message(init().with_client_heartbeat(HeartbeatValue::from_millis(100, 0)))
            .await;
        h.handler.handle_message(start("1")).await;
        settle().await;
        assert_eq!(h.handler.registry().len(), 1);

        h.handler
            .check_heartbeats(Instant::now() + Duration::from_secs(1));
        settle().await;

        assert!(h.handler.registry().is_empty());
        assert!(tx.send(ExecutionResult::value(json!(1))).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_gets_keep_alive() {
        let mut cfg = config();
        cfg.heartbeat = Some(HeartbeatValue::from_millis(200, 0));
        let h = harness_with(cfg, vec![]);
        h.handler
            .handle_message(init().with_client_heartbeat(HeartbeatValue::from_millis(0, 100)))
            .await;
        let info = h.handler.sessions().get("s1").unwrap();
        assert_eq!(info.write_interval(), Duration::from_millis(200));
        h.recorder.clear();

        let t0 = Instant::now();
        h.handler.check_heartbeats(t0 + Duration::from_millis(200));
        assert!(h.recorder.messages().is_empty());

        h.handler.check_heartbeats(t0 + Duration::from_millis(250));
        let sent = h.recorder.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload.message_type, MessageType::KeepAlive);
        assert!(sent[0].payload.id.is_none());
        assert_eq!(sent[0].kind, FrameKind::Heartbeat);
        assert!(h.handler.sessions().get("s1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn outbound_frames_postpone_keep_alive() {
        let mut cfg = config();
        cfg.heartbeat = Some(HeartbeatValue::from_millis(300, 0));
        let (tx, feed) = open_feed();
        let h = harness_with(cfg, vec![feed]);
        h.handler
            .handle_message(init().with_client_heartbeat(HeartbeatValue::from_millis(0, 100)))
            .await;
        h.handler.handle_message(start("1")).await;
        settle().await;
        h.recorder.clear();

        tokio::time::advance(Duration::from_millis(150)).await;
        tx.send(ExecutionResult::value(json!(1))).unwrap();
        // DATA leaves when the 100ms window closes; the heartbeat tick at
        // 300ms then finds the session recently written
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.recorder.types(), vec![MessageType::Data]);

        h.handler.check_heartbeats(Instant::now());
        assert_eq!(h.recorder.types(), vec![MessageType::Data]);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_task_sends_keep_alives_when_started() {
        let mut cfg = config();
        cfg.heartbeat = Some(HeartbeatValue::from_millis(100, 0));
        let h = harness_with(cfg, vec![]);
        h.handler
            .handle_message(init().with_client_heartbeat(HeartbeatValue::from_millis(0, 100)))
            .await;
        h.recorder.clear();

        tokio::time::sleep(Duration::from_millis(450)).await;

        let types = h.recorder.types();
        assert!(!types.is_empty());
        assert!(types.iter().all(|t| *t == MessageType::KeepAlive));

        h.handler.stop();
        h.recorder.clear();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(h.recorder.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_subscriptions_and_refuses_work() {
        let (tx, feed) = open_feed();
        let h = harness(vec![feed]);
        h.handler.handle_message(start("1")).await;
        settle().await;

        h.handler.stop();
        settle().await;

        assert!(!h.handler.is_available());
        assert!(!h.handler.is_running());
        assert!(h.handler.registry().is_empty());
        assert!(tx.send(ExecutionResult::value(json!(1))).is_err());

        h.recorder.clear();
        h.handler.handle_message(init()).await;
        assert!(h.recorder.messages().is_empty());
    }
}
