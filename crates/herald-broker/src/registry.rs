//! Active subscriptions keyed by (session id, operation id).

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::errors::{BrokerError, Result};
use crate::subscriber::ChannelSubscriber;

/// Key of one subscription.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    /// Owning session.
    pub session_id: String,
    /// Client-chosen operation id.
    pub operation_id: String,
}

impl SubscriptionKey {
    /// Build a key.
    pub fn new(session_id: impl Into<String>, operation_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            operation_id: operation_id.into(),
        }
    }
}

/// The live subscriptions of every session.
///
/// Callbacks passed to the registry always run after the map entry has been
/// inserted or removed and with no map lock held.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: DashMap<SubscriptionKey, Arc<ChannelSubscriber>>,
}

impl SubscriptionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber`, then hand it to `start`.
    ///
    /// Fails without calling `start` if the key is already taken.
    pub fn subscribe<F>(
        &self,
        session_id: &str,
        operation_id: &str,
        subscriber: Arc<ChannelSubscriber>,
        start: F,
    ) -> Result<()>
    where
        F: FnOnce(Arc<ChannelSubscriber>),
    {
        match self.entries.entry(SubscriptionKey::new(session_id, operation_id)) {
            Entry::Occupied(_) => {
                return Err(BrokerError::DuplicateSubscription {
                    session_id: session_id.to_owned(),
                    operation_id: operation_id.to_owned(),
                });
            }
            Entry::Vacant(vacant) => {
                let _ = vacant.insert(Arc::clone(&subscriber));
            }
        }
        start(subscriber);
        Ok(())
    }

    /// Remove one subscription and pass it to `consumer`.
    pub fn unsubscribe<F>(&self, session_id: &str, operation_id: &str, consumer: F) -> bool
    where
        F: FnOnce(&ChannelSubscriber),
    {
        let removed = self
            .entries
            .remove(&SubscriptionKey::new(session_id, operation_id));
        match removed {
            Some((_, subscriber)) => {
                consumer(&subscriber);
                true
            }
            None => false,
        }
    }

    /// Remove every subscription of `session_id`, passing each to `consumer`.
    pub fn unsubscribe_session<F>(&self, session_id: &str, mut consumer: F) -> usize
    where
        F: FnMut(&ChannelSubscriber),
    {
        let keys: Vec<SubscriptionKey> = self
            .entries
            .iter()
            .filter(|entry| entry.key().session_id == session_id)
            .map(|entry| entry.key().clone())
            .collect();
        self.remove_each(keys, &mut consumer)
    }

    /// Remove every subscription, passing each to `consumer`.
    pub fn unsubscribe_all<F>(&self, mut consumer: F) -> usize
    where
        F: FnMut(&ChannelSubscriber),
    {
        let keys: Vec<SubscriptionKey> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        self.remove_each(keys, &mut consumer)
    }

    /// Remove the entry for (`session_id`, `operation_id`) only if it still
    /// holds `subscriber`.
    pub fn release(
        &self,
        session_id: &str,
        operation_id: &str,
        subscriber: &Arc<ChannelSubscriber>,
    ) -> bool {
        self.entries
            .remove_if(&SubscriptionKey::new(session_id, operation_id), |_, current| {
                Arc::ptr_eq(current, subscriber)
            })
            .is_some()
    }

    /// Whether (`session_id`, `operation_id`) is registered.
    pub fn contains(&self, session_id: &str, operation_id: &str) -> bool {
        self.entries
            .contains_key(&SubscriptionKey::new(session_id, operation_id))
    }

    /// Operation ids registered for `session_id`.
    pub fn session_subscriptions(&self, session_id: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.key().session_id == session_id)
            .map(|entry| entry.key().operation_id.clone())
            .collect()
    }

    /// Number of subscriptions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove_each<F>(&self, keys: Vec<SubscriptionKey>, consumer: &mut F) -> usize
    where
        F: FnMut(&ChannelSubscriber),
    {
        let mut removed = 0;
        for key in keys {
            if let Some((_, subscriber)) = self.entries.remove(&key) {
                consumer(&subscriber);
                removed += 1;
            }
        }
        removed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
