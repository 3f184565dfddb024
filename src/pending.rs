//! Correlation table for requests awaiting a reply
//!
//! Every entry is keyed by its request id and removed exactly once: by the
//! reply, by a remote error, by its timer, or when the waiting side goes away.
//! Whichever comes first wins; the others find nothing to remove.

use crate::error::{Result, WirebusError};
use crate::message::Message;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

type Completion = oneshot::Sender<Result<Message>>;

/// Outstanding requests by id
#[derive(Default)]
pub struct PendingRequests {
    entries: Mutex<HashMap<String, Completion>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the handle that waits for its outcome
    pub fn register(self: &Arc<Self>, id: &str) -> Result<PendingReply> {
        let (tx, rx) = oneshot::channel();
        {
            let mut entries = self.entries.lock();
            if entries.contains_key(id) {
                return Err(WirebusError::DuplicateRequestId(id.to_string()));
            }
            entries.insert(id.to_string(), tx);
        }

        Ok(PendingReply {
            id: id.to_string(),
            table: self.clone(),
            rx: Some(rx),
        })
    }

    /// Complete `id` with a reply. Returns false if nothing was waiting.
    pub fn resolve(&self, id: &str, message: Message) -> bool {
        self.complete(id, Ok(message))
    }

    /// Fail `id`. Returns false if nothing was waiting.
    pub fn reject(&self, id: &str, error: WirebusError) -> bool {
        self.complete(id, Err(error))
    }

    fn complete(&self, id: &str, outcome: Result<Message>) -> bool {
        // take the entry out before running the completion
        let entry = self.entries.lock().remove(id);
        match entry {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drop `id` without completing it
    pub fn remove(&self, id: &str) -> bool {
        self.entries.lock().remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// The waiting side of a pending request.
///
/// Dropping it before the outcome arrives removes the table entry.
pub struct PendingReply {
    id: String,
    table: Arc<PendingRequests>,
    rx: Option<oneshot::Receiver<Result<Message>>>,
}

impl PendingReply {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the outcome, failing with [`WirebusError::Timeout`] after `timeout`
    pub async fn wait(mut self, timeout: Duration) -> Result<Message> {
        let Some(rx) = self.rx.take() else {
            return Err(WirebusError::Shutdown);
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(WirebusError::Shutdown),
            Err(_) => {
                if self.table.remove(&self.id) {
                    debug!(request_id = %self.id, ?timeout, "Request timed out");
                }
                Err(WirebusError::Timeout)
            }
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}
