//! Topic-backed subscription executor.
//!
//! Understands documents whose root selection names a topic:
//!
//! ```graphql
//! subscription OnPrice($symbol: String) { prices }
//! ```
//!
//! Every event published to `prices` is delivered as `{"prices": event}`.
//! An alias (`latest: prices`) renames the response key. Arguments and
//! nested selections are accepted but not interpreted.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use herald_broker::QueryExecutor;
use herald_core::{ExecutionResult, GraphQLError, HeraldError, QueryParameters, StreamError};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::debug;

/// Operation keyword of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// `query` or the `{ ... }` shorthand.
    Query,
    /// `mutation`.
    Mutation,
    /// `subscription`.
    Subscription,
}

/// The first root field of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSelection {
    /// Operation keyword.
    pub kind: OperationKind,
    /// Operation name, if given.
    pub name: Option<String>,
    /// Selected field, used as the topic name.
    pub field: String,
    /// Alias of the field, if given.
    pub alias: Option<String>,
}

impl RootSelection {
    /// Key under which results are reported.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.field)
    }
}

/// Parse the operation keyword, name and first root field of `document`.
pub fn parse_root_selection(document: &str) -> Result<RootSelection, HeraldError> {
    let trimmed = skip_ignored(document);
    let (kind, rest) = if trimmed.starts_with('{') {
        (OperationKind::Query, trimmed)
    } else {
        let (keyword, rest) = take_name(trimmed);
        let kind = match keyword {
            "subscription" => OperationKind::Subscription,
            "query" => OperationKind::Query,
            "mutation" => OperationKind::Mutation,
            "" => return Err(invalid("document is empty")),
            other => return Err(invalid(&format!("unsupported definition '{other}'"))),
        };
        (kind, rest)
    };

    let open = rest
        .find('{')
        .ok_or_else(|| invalid("operation has no selection set"))?;
    let (name, _) = take_name(skip_ignored(&rest[..open]));
    let name = (!name.is_empty()).then(|| name.to_owned());

    let (first, after) = take_name(skip_ignored(&rest[open + 1..]));
    if first.is_empty() {
        return Err(invalid("selection set is empty"));
    }
    let after = skip_ignored(after);
    let (field, alias) = match after.strip_prefix(':') {
        Some(aliased) => {
            let (field, _) = take_name(skip_ignored(aliased));
            if field.is_empty() {
                return Err(invalid("alias is missing its field"));
            }
            (field.to_owned(), Some(first.to_owned()))
        }
        None => (first.to_owned(), None),
    };

    Ok(RootSelection {
        kind,
        name,
        field,
        alias,
    })
}

fn invalid(message: &str) -> HeraldError {
    HeraldError::InvalidDocument(message.to_owned())
}

/// Skip whitespace, commas and `#` comments.
fn skip_ignored(mut input: &str) -> &str {
    loop {
        input = input.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        match input.strip_prefix('#') {
            Some(comment) => input = comment.find('\n').map_or("", |end| &comment[end..]),
            None => return input,
        }
    }
}

/// Split a leading GraphQL name off `input`.
fn take_name(input: &str) -> (&str, &str) {
    let end = input
        .char_indices()
        .find(|&(i, c)| !(c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit())))
        .map_or(input.len(), |(i, _)| i);
    input.split_at(end)
}

/// Executor that maps subscription root fields onto in-memory broadcast
/// topics.
pub struct TopicExecutor {
    topics: DashMap<String, broadcast::Sender<Value>>,
    capacity: usize,
}

impl TopicExecutor {
    /// Executor whose topics retain up to `capacity` events per lagging
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Publish `event` to `topic`. Returns the number of subscribers reached.
    pub fn publish(&self, topic: &str, event: Value) -> usize {
        let Some(sender) = self.topics.get(topic) else {
            debug!(topic, "publish to topic without subscribers");
            return 0;
        };
        sender.send(event).unwrap_or(0)
    }

    /// Current subscriber count of `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Number of topics ever subscribed to.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Value> {
        self.topics
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}

#[async_trait]
impl QueryExecutor for TopicExecutor {
    async fn execute(&self, params: QueryParameters) -> ExecutionResult {
        let selection = match parse_root_selection(&params.query) {
            Ok(selection) => selection,
            Err(e) => return ExecutionResult::from_errors(vec![GraphQLError::new(e.to_string())]),
        };
        if selection.kind != OperationKind::Subscription {
            return ExecutionResult::from_errors(vec![GraphQLError::new(
                "Only subscription operations are supported",
            )]);
        }

        let key = selection.response_key().to_owned();
        let topic = selection.field;
        debug!(%topic, %key, operation = ?selection.name, "subscribing to topic");

        let stream = BroadcastStream::new(self.subscribe(&topic)).map(move |item| match item {
            Ok(event) => {
                let mut data = Map::new();
                let _ = data.insert(key.clone(), event);
                Ok(ExecutionResult::value(Value::Object(data)))
            }
            Err(BroadcastStreamRecvError::Lagged(skipped)) => Err(StreamError::new(format!(
                "subscriber to topic {topic} lagged behind by {skipped} events"
            ))),
        });
        ExecutionResult::stream(stream.boxed())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
