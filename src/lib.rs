//! Wirebus - client for a topic-based request/response message bus
//!
//! Frames are a one-line text header followed by a JSON payload. The client
//! correlates replies with requests, keeps a local subscription table that is
//! replayed after every reconnect, and answers broker heartbeats on its own.
//!
//! # Example
//!
//! ```no_run
//! use wirebus::{ActionFilter, PublishOptions, RequestOptions, WirebusClient, WirebusConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WirebusConfig::new("ws://localhost:8000").reconnect(Duration::from_secs(1));
//!     let client = WirebusClient::new(config);
//!
//!     client.connect().await?;
//!     client.register("echo", "Echoes requests").await?;
//!
//!     // Answer requests on a topic
//!     client
//!         .subscribe(ActionFilter::Request, "test.echo", 0, |message| {
//!             let _ = message.response(message.payload().clone());
//!         })
//!         .await?;
//!
//!     // Fire and forget
//!     client
//!         .publish("test.event", &serde_json::json!({"status": "running"}), PublishOptions::default())
//!         .await?;
//!
//!     // Request/response with correlation
//!     let reply = client
//!         .request("test.echo", &serde_json::json!({"hello": "world"}), RequestOptions::default())
//!         .await?;
//!     println!("{:?}", reply.payload());
//!
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod events;
pub mod pending;
pub mod protocol;
pub mod request_id;
pub mod subscriptions;
pub mod topic;
pub mod transport;

mod client;
mod config;
mod error;
mod message;

pub use client::{
    ConnectionState, PublishOptions, RequestOptions, ServiceIdentity, WirebusClient,
};
pub use codec::{DecodeError, FrameCodec, PROTOCOL_VERSION};
pub use config::WirebusConfig;
pub use error::{Result, WirebusError};
pub use events::{ClientEvents, Emitter, ListenerId, ReconnectAttempt};
pub use message::Message;
pub use protocol::{ActionFilter, ActionType, Envelope, Header, Payload, PayloadError};
pub use subscriptions::{MessageHandler, Subscription};
pub use topic::{Topic, TopicError};
pub use transport::{MemoryBroker, MemoryTransport, Transport, TransportEvent, WebSocketTransport};
