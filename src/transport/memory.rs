//! In-process transport binding
//!
//! [`MemoryTransport`] is the client side; [`MemoryBroker`] is a handle that
//! plays the broker: it sees every frame the client sends, can inject frames,
//! and can drop or refuse connections. Useful for tests and for embedding a
//! client next to an in-process broker.

use super::{Transport, TransportEvent, TransportEvents};
use crate::error::{Result, WirebusError};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct Shared {
    events: Option<TransportEvents>,
    refuse_opens: bool,
    open_delay: Option<Duration>,
    opens: usize,
    last_url: Option<String>,
}

/// Client side of an in-process connection
pub struct MemoryTransport {
    shared: Arc<Mutex<Shared>>,
    outbound: mpsc::UnboundedSender<String>,
}

/// Broker side of an in-process connection
pub struct MemoryBroker {
    shared: Arc<Mutex<Shared>>,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl MemoryTransport {
    /// Create a connected transport/broker pair
    pub fn pair() -> (Arc<MemoryTransport>, MemoryBroker) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(MemoryTransport {
                shared: shared.clone(),
                outbound: tx,
            }),
            MemoryBroker { shared, inbound: rx },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, url: &str, events: TransportEvents) -> Result<()> {
        let delay = self.shared.lock().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut shared = self.shared.lock();
        shared.last_url = Some(url.to_string());
        if shared.refuse_opens {
            return Err(WirebusError::Connection(format!("{} refused connection", url)));
        }
        shared.opens += 1;
        let _ = events.send(TransportEvent::Opened);
        shared.events = Some(events);
        Ok(())
    }

    fn send(&self, frame: String) -> Result<()> {
        if self.shared.lock().events.is_none() {
            return Err(WirebusError::NotConnected);
        }
        self.outbound
            .send(frame)
            .map_err(|_| WirebusError::Transport("broker handle dropped".to_string()))
    }

    async fn close(&self) -> Result<()> {
        let events = self.shared.lock().events.take();
        match events {
            Some(events) => {
                let _ = events.send(TransportEvent::Closed);
                Ok(())
            }
            None => Err(WirebusError::NotConnected),
        }
    }
}

impl MemoryBroker {
    /// Next frame sent by the client, waiting for it if needed
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Like [`MemoryBroker::recv`], giving up after `timeout`
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<String> {
        tokio::time::timeout(timeout, self.inbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next frame sent by the client, if one is already queued
    pub fn try_recv(&mut self) -> Option<String> {
        self.inbound.try_recv().ok()
    }

    /// Deliver a frame to the client. Returns false if no connection is open.
    pub fn inject(&self, frame: impl Into<String>) -> bool {
        self.notify(TransportEvent::Frame(frame.into()))
    }

    /// Report a non-fatal transport error to the client
    pub fn raise_error(&self, error: impl Into<String>) -> bool {
        self.notify(TransportEvent::Error(error.into()))
    }

    /// Close the connection from the broker side
    pub fn drop_connection(&self) -> bool {
        let events = self.shared.lock().events.take();
        match events {
            Some(events) => events.send(TransportEvent::Closed).is_ok(),
            None => false,
        }
    }

    /// Make subsequent opens fail (or succeed again)
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.lock().refuse_opens = refuse;
    }

    /// Make subsequent opens take `delay` before they complete
    pub fn delay_opens(&self, delay: Duration) {
        self.shared.lock().open_delay = Some(delay);
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().events.is_some()
    }

    /// Number of successful opens so far
    pub fn open_count(&self) -> usize {
        self.shared.lock().opens
    }

    /// URL passed to the most recent open
    pub fn last_url(&self) -> Option<String> {
        self.shared.lock().last_url.clone()
    }

    fn notify(&self, event: TransportEvent) -> bool {
        match self.shared.lock().events.as_ref() {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }
}
