//! Pumps one subscription's result stream into batched DATA frames.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures::StreamExt;
use herald_core::{MessageType, OperationMessage, Principal, ResultStream, StreamError};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::batch::BatchBuffer;
use crate::channel::{OutboundChannel, OutboundMessage};
use crate::config::BufferPolicy;

const ACTIVE: u8 = 0;
const CANCELLED: u8 = 1;
const COMPLETED: u8 = 2;

/// Lifecycle of a subscriber. Only the first transition out of `Active`
/// takes effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriberState {
    /// Pumping results.
    Active,
    /// Stopped without a terminal frame.
    Cancelled,
    /// Finished; a COMPLETE or ERROR frame was sent.
    Completed,
}

impl SubscriberState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            ACTIVE => Self::Active,
            CANCELLED => Self::Cancelled,
            _ => Self::Completed,
        }
    }
}

/// Delivers the results of one subscription to one session.
pub struct ChannelSubscriber {
    session_id: String,
    operation_id: String,
    user: Option<Principal>,
    outbound: Arc<dyn OutboundChannel>,
    policy: BufferPolicy,
    state: AtomicU8,
    stop: CancellationToken,
    /// Held across the active check and send of DATA, and across a terminal
    /// transition and its frame, so no DATA can follow COMPLETE or ERROR.
    send_lock: Mutex<()>,
}

impl ChannelSubscriber {
    /// A subscriber for `operation_id` in `session_id`.
    pub fn new(
        session_id: impl Into<String>,
        operation_id: impl Into<String>,
        user: Option<Principal>,
        outbound: Arc<dyn OutboundChannel>,
        policy: BufferPolicy,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            operation_id: operation_id.into(),
            user,
            outbound,
            policy,
            state: AtomicU8::new(ACTIVE),
            stop: CancellationToken::new(),
            send_lock: Mutex::new(()),
        }
    }

    /// Owning session.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Client-chosen operation id.
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Current state.
    pub fn state(&self) -> SubscriberState {
        SubscriberState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Whether results are still being delivered.
    pub fn is_active(&self) -> bool {
        self.state() == SubscriberState::Active
    }

    /// Stop silently. Returns `true` if this call ended the subscription.
    pub fn cancel(&self) -> bool {
        let won = self.transition(CANCELLED);
        if won {
            debug!(
                session_id = %self.session_id,
                operation_id = %self.operation_id,
                "subscription cancelled"
            );
        }
        won
    }

    /// Stop and send one COMPLETE frame. Returns `true` if this call ended the
    /// subscription; later calls send nothing.
    pub fn complete(&self) -> bool {
        let _sending = self.send_lock.lock();
        let won = self.transition(COMPLETED);
        if won {
            debug!(
                session_id = %self.session_id,
                operation_id = %self.operation_id,
                "subscription completed by client"
            );
            let _ = self.send(OperationMessage::complete(Some(self.operation_id.clone())));
        }
        won
    }

    /// Pull `stream` until it ends, fails, or the subscriber is stopped.
    ///
    /// Items are requested one at a time. Values are buffered and flushed as
    /// `{"data": [..]}` when `max_count` is reached or `time_span` after the
    /// first value entered an empty batch.
    pub async fn run(&self, stream: ResultStream) {
        gauge!("graphql_subscriptions_active").increment(1.0);
        self.pump(stream).await;
        gauge!("graphql_subscriptions_active").decrement(1.0);
    }

    async fn pump(&self, mut stream: ResultStream) {
        let mut batch = BatchBuffer::new(self.policy.max_count);
        let window = time::sleep(self.policy.time_span);
        tokio::pin!(window);
        let mut window_open = false;

        loop {
            tokio::select! {
                biased;

                () = self.stop.cancelled() => return,

                () = &mut window, if window_open => {
                    window_open = false;
                    self.flush(batch.drain());
                }

                item = stream.next() => match item {
                    Some(Ok(result)) => {
                        let was_empty = batch.is_empty();
                        if let Some(full) = batch.push(result.data.into_value()) {
                            window_open = false;
                            self.flush(Some(full));
                        } else if was_empty {
                            window.as_mut().reset(Instant::now() + self.policy.time_span);
                            window_open = true;
                        }
                    }
                    Some(Err(err)) => {
                        self.flush(batch.drain());
                        self.fail(&err);
                        return;
                    }
                    None => {
                        self.flush(batch.drain());
                        self.finish();
                        return;
                    }
                }
            }
        }
    }

    fn flush(&self, items: Option<Vec<Value>>) {
        let Some(items) = items else { return };
        let _sending = self.send_lock.lock();
        if !self.is_active() {
            return;
        }
        counter!("graphql_results_delivered_total").increment(items.len() as u64);
        let _ = self.send(OperationMessage::data(
            Some(self.operation_id.clone()),
            Value::Array(items),
        ));
    }

    fn fail(&self, err: &StreamError) {
        error!(
            session_id = %self.session_id,
            operation_id = %self.operation_id,
            error = %err,
            "subscription stream failed"
        );
        let _sending = self.send_lock.lock();
        if self.transition(COMPLETED) {
            let _ = self.send(OperationMessage::error_text(
                Some(self.operation_id.clone()),
                MessageType::Error,
                &err.message,
            ));
        }
    }

    fn finish(&self) {
        let _sending = self.send_lock.lock();
        if self.transition(COMPLETED) {
            debug!(
                session_id = %self.session_id,
                operation_id = %self.operation_id,
                "subscription stream completed"
            );
            let _ = self.send(OperationMessage::complete(Some(self.operation_id.clone())));
        }
    }

    fn transition(&self, to: u8) -> bool {
        let won = self
            .state
            .compare_exchange(ACTIVE, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.stop.cancel();
        }
        won
    }

    fn send(&self, payload: OperationMessage) -> bool {
        let message_type = payload.message_type;
        let sent = self.outbound.send(OutboundMessage::new(
            self.session_id.clone(),
            self.user.clone(),
            payload,
        ));
        if !sent {
            warn!(
                session_id = %self.session_id,
                operation_id = %self.operation_id,
                %message_type,
                "outbound frame dropped"
            );
        }
        sent
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
