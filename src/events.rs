//! Typed session events
//!
//! Each event kind gets its own [`Emitter`]; listeners register a closure and
//! receive a [`ListenerId`] they can later pass to [`Emitter::off`].

use crate::error::WirebusError;
use crate::message::Message;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned when a listener is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entry<T> {
    id: ListenerId,
    once: bool,
    listener: Listener<T>,
}

/// A list of listeners for one event kind
pub struct Emitter<T> {
    listeners: Mutex<Vec<Entry<T>>>,
}

impl<T> Emitter<T> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener called on every emit
    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.add(listener, false)
    }

    /// Register a listener that is removed after its first call
    pub fn once<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.add(listener, true)
    }

    fn add<F>(&self, listener: F, once: bool) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push(Entry {
            id,
            once,
            listener: Arc::new(listener),
        });
        id
    }

    /// Remove a listener. Returns false if it was not registered here.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        listeners.len() != before
    }

    /// Call every listener with `value`.
    ///
    /// Listeners run outside the lock, so they may register or remove
    /// listeners on this emitter.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = {
            let mut listeners = self.listeners.lock();
            let snapshot = listeners.iter().map(|e| e.listener.clone()).collect();
            listeners.retain(|entry| !entry.once);
            snapshot
        };

        for listener in snapshot {
            listener(value);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Remove all listeners
    pub fn clear(&self) {
        self.listeners.lock().clear();
    }
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload of the `reconnecting` event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectAttempt {
    /// 1-based attempt number
    pub attempt: u32,
    /// `None` when attempts are unbounded
    pub max_attempts: Option<u32>,
}

/// All events a session publishes
#[derive(Default)]
pub struct ClientEvents {
    /// Resume protocol finished after a (re)connection
    pub connected: Emitter<()>,
    /// Transport closed
    pub disconnected: Emitter<()>,
    /// Every successfully decoded inbound frame
    pub message: Emitter<Message>,
    /// Decode failures, transport errors, resume failures, reconnect exhaustion
    pub error: Emitter<Arc<WirebusError>>,
    /// A reconnect attempt has been scheduled
    pub reconnecting: Emitter<ReconnectAttempt>,
}
