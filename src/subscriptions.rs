//! Local subscription registry
//!
//! One entry per topic. The filter and priority are what the broker was
//! asked for; the handler is local only, so swapping it never needs a round
//! trip.

use crate::message::Message;
use crate::protocol::{ActionFilter, ActionType};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Handler for messages delivered through a subscription
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// What the broker knows about a subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub action: ActionFilter,
    pub topic: String,
    pub priority: i32,
}

struct Entry {
    filter: ActionFilter,
    priority: i32,
    handler: MessageHandler,
}

/// Outcome of [`SubscriptionRegistry::upsert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// New entry, or filter/priority changed: the broker must be told
    Changed,
    /// Same filter and priority: only the handler was replaced
    HandlerReplaced,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update the entry for `topic`
    pub fn upsert(
        &self,
        topic: &str,
        filter: ActionFilter,
        priority: i32,
        handler: MessageHandler,
    ) -> Upsert {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get_mut(topic) {
            if existing.filter == filter && existing.priority == priority {
                existing.handler = handler;
                return Upsert::HandlerReplaced;
            }
        }

        entries.insert(
            topic.to_string(),
            Entry {
                filter,
                priority,
                handler,
            },
        );
        Upsert::Changed
    }

    /// Remove the entry for `topic`. Returns false if there was none.
    pub fn remove(&self, topic: &str) -> bool {
        self.entries.lock().remove(topic).is_some()
    }

    /// Handler that should receive a frame with `action` on `topic`, if any
    pub fn handler_for(&self, topic: &str, action: ActionType) -> Option<MessageHandler> {
        let entries = self.entries.lock();
        entries
            .get(topic)
            .filter(|entry| entry.filter.accepts(action))
            .map(|entry| entry.handler.clone())
    }

    pub fn get(&self, topic: &str) -> Option<Subscription> {
        self.entries.lock().get(topic).map(|entry| Subscription {
            action: entry.filter,
            topic: topic.to_string(),
            priority: entry.priority,
        })
    }

    /// Current entries, sorted by topic
    pub fn snapshot(&self) -> Vec<Subscription> {
        let mut subscriptions: Vec<Subscription> = self
            .entries
            .lock()
            .iter()
            .map(|(topic, entry)| Subscription {
                action: entry.filter,
                topic: topic.clone(),
                priority: entry.priority,
            })
            .collect();
        subscriptions.sort_by(|a, b| a.topic.cmp(&b.topic));
        subscriptions
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
