//! Inbound message wrapper
//!
//! A [`Message`] pairs a decoded frame with the client that received it, so a
//! handler can answer it or emit follow-up traffic. Follow-ups sent through
//! [`Message::publish`] and [`Message::request`] carry the wrapped frame's
//! request id as their parent request id.

use crate::client::{PublishOptions, RequestOptions, WirebusClient};
use crate::error::Result;
use crate::protocol::{ActionType, Envelope, Header, Payload};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A received frame bound to its client. Cheap to clone.
#[derive(Clone)]
pub struct Message {
    client: WirebusClient,
    envelope: Arc<Envelope>,
}

impl Message {
    pub(crate) fn new(client: WirebusClient, envelope: Envelope) -> Self {
        Self {
            client,
            envelope: Arc::new(envelope),
        }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn header(&self) -> &Header {
        &self.envelope.header
    }

    pub fn payload(&self) -> &Payload {
        &self.envelope.payload
    }

    pub fn topic(&self) -> &str {
        &self.envelope.header.topic
    }

    pub fn action(&self) -> ActionType {
        self.envelope.header.action
    }

    pub fn request_id(&self) -> Option<&str> {
        self.envelope.header.request_id.as_deref()
    }

    pub fn parent_request_id(&self) -> Option<&str> {
        self.envelope.header.parent_request_id.as_deref()
    }

    /// Publish on behalf of this message; the parent request id is set to ours
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        payload: &T,
        options: PublishOptions,
    ) -> Result<Option<Message>> {
        let options = PublishOptions {
            parent_request_id: self.request_id().map(str::to_string),
            ..options
        };
        self.client.publish(topic, payload, options).await
    }

    /// Send a request on behalf of this message; the parent request id is set to ours
    pub async fn request<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        payload: &T,
        options: RequestOptions,
    ) -> Result<Message> {
        let options = RequestOptions {
            parent_request_id: self.request_id().map(str::to_string),
            ..options
        };
        self.client.request(topic, payload, options).await
    }

    /// Reply to exactly this message
    pub fn response(&self, payload: impl Into<Payload>) -> Result<()> {
        self.client.response(&self.envelope, payload.into())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("header", &self.envelope.header)
            .field("payload", &self.envelope.payload)
            .finish()
    }
}
