//! Error types for the wirebus client

use crate::codec::DecodeError;
use crate::protocol::PayloadError;
use crate::topic::TopicError;
use thiserror::Error;

/// Errors that can occur when using the wirebus client
#[derive(Error, Debug)]
pub enum WirebusError {
    /// Opening the connection failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Not currently connected to the broker
    #[error("Not connected")]
    NotConnected,

    /// No reply arrived before the request timer fired
    #[error("Request timed out")]
    Timeout,

    /// Topic name failed validation
    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),

    /// Inbound frame could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The peer answered with an error payload
    #[error("Remote error: {0}")]
    Remote(PayloadError),

    /// The transport binding reported a failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Automatic reconnection gave up
    #[error("Maximum reconnection attempts ({0}) exceeded")]
    ReconnectExhausted(u32),

    /// A request id is already waiting for a reply
    #[error("Request id already pending: {0}")]
    DuplicateRequestId(String),

    /// Outbound payload is not a JSON object
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Failed to serialize a payload
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The session went away while the operation was in flight
    #[error("Client shut down")]
    Shutdown,
}

/// Result type for wirebus operations
pub type Result<T> = std::result::Result<T, WirebusError>;
