//! Transport bindings
//!
//! The session drives a [`Transport`] through `open`, `send` and `close`, and
//! learns what happened on the connection through [`TransportEvent`]s the
//! binding pushes into the channel handed to `open`.

mod memory;
mod websocket;

pub use memory::{MemoryBroker, MemoryTransport};
pub use websocket::WebSocketTransport;

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Notifications from a transport binding to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established and frames may be sent
    Opened,
    /// One inbound frame
    Frame(String),
    /// Something went wrong; the connection is not considered closed
    Error(String),
    /// The connection is gone. Always the last event of a connection.
    Closed,
}

/// Sender half handed to [`Transport::open`]
pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

/// A duplex channel to the broker
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start connecting to `url`. Events for this connection go to `events`,
    /// beginning with [`TransportEvent::Opened`] on success.
    async fn open(&self, url: &str, events: TransportEvents) -> Result<()>;

    /// Queue one frame. Fails if the connection is not open.
    fn send(&self, frame: String) -> Result<()>;

    /// Begin closing. Completion is signalled by [`TransportEvent::Closed`].
    async fn close(&self) -> Result<()>;
}
