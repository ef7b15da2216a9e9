//! Hand-written fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use herald_core::{ExecutionResult, MessageType, QueryParameters};
use parking_lot::Mutex;
use serde_json::Value;

use crate::channel::{OutboundChannel, OutboundMessage};
use crate::executor::QueryExecutor;

/// Outbound channel that records every frame it accepts.
pub struct RecordingChannel {
    messages: Mutex<Vec<OutboundMessage>>,
    accepting: AtomicBool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            accepting: AtomicBool::new(true),
        }
    }

    /// When false, `send` drops frames and returns false.
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().clone()
    }

    pub fn types(&self) -> Vec<MessageType> {
        self.messages
            .lock()
            .iter()
            .map(|m| m.payload.message_type)
            .collect()
    }

    /// Payload of the `index`-th recorded frame.
    pub fn payload(&self, index: usize) -> Value {
        self.messages.lock()[index]
            .payload
            .payload
            .clone()
            .unwrap_or(Value::Null)
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl OutboundChannel for RecordingChannel {
    fn send(&self, message: OutboundMessage) -> bool {
        if !self.accepting.load(Ordering::SeqCst) {
            return false;
        }
        self.messages.lock().push(message);
        true
    }
}

/// Executor that replays queued results and records the parameters it saw.
pub struct ScriptedExecutor {
    results: Mutex<VecDeque<ExecutionResult>>,
    seen: Mutex<Vec<QueryParameters>>,
}

impl ScriptedExecutor {
    pub fn new(results: impl IntoIterator<Item = ExecutionResult>) -> Self {
        Self {
            results: Mutex::new(results.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<QueryParameters> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(&self, params: QueryParameters) -> ExecutionResult {
        self.seen.lock().push(params);
        self.results
            .lock()
            .pop_front()
            .unwrap_or_else(ExecutionResult::empty)
    }
}
