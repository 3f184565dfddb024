//! WebSocket transport binding
//!
//! Frames travel as WebSocket text messages. Binary messages are accepted if
//! they hold valid UTF-8. Ping/pong is left to tungstenite.

use super::{Transport, TransportEvent, TransportEvents};
use crate::error::{Result, WirebusError};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

enum Outbound {
    Frame(String),
    Close,
}

struct Writer {
    generation: u64,
    tx: mpsc::UnboundedSender<Outbound>,
}

/// WebSocket client binding built on tokio-tungstenite
#[derive(Default)]
pub struct WebSocketTransport {
    writer: Arc<Mutex<Option<Writer>>>,
    generation: Mutex<u64>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str, events: TransportEvents) -> Result<()> {
        debug!(url, "Opening WebSocket");
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| WirebusError::Connection(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let generation = {
            let mut generation = self.generation.lock();
            *generation += 1;
            *generation
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.writer.lock() = Some(Writer { generation, tx });

        let writer_events = events.clone();
        tokio::spawn(async move {
            while let Some(outbound) = rx.recv().await {
                match outbound {
                    Outbound::Frame(text) => {
                        if let Err(e) = sink.send(WsMessage::text(text)).await {
                            let _ = writer_events.send(TransportEvent::Error(e.to_string()));
                            break;
                        }
                    }
                    Outbound::Close => {
                        if let Err(e) = sink.close().await {
                            warn!("WebSocket close handshake failed: {}", e);
                        }
                        break;
                    }
                }
            }
        });

        // Opened must precede any frame the reader forwards
        let _ = events.send(TransportEvent::Opened);

        let writer = self.writer.clone();
        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(WsMessage::Text(text)) => {
                        let _ = events.send(TransportEvent::Frame(text.as_str().to_owned()));
                    }
                    Ok(WsMessage::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => {
                            let _ = events.send(TransportEvent::Frame(text));
                        }
                        Err(_) => {
                            let _ = events.send(TransportEvent::Error(
                                "binary frame is not valid UTF-8".to_string(),
                            ));
                        }
                    },
                    Ok(WsMessage::Close(frame)) => {
                        debug!(?frame, "WebSocket closed by peer");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
            }

            {
                let mut slot = writer.lock();
                if slot.as_ref().map(|w| w.generation) == Some(generation) {
                    *slot = None;
                }
            }
            let _ = events.send(TransportEvent::Closed);
        });

        Ok(())
    }

    fn send(&self, frame: String) -> Result<()> {
        let writer = self.writer.lock();
        match writer.as_ref() {
            Some(writer) => writer
                .tx
                .send(Outbound::Frame(frame))
                .map_err(|_| WirebusError::NotConnected),
            None => Err(WirebusError::NotConnected),
        }
    }

    async fn close(&self) -> Result<()> {
        let writer = self.writer.lock().take();
        match writer {
            Some(writer) => writer
                .tx
                .send(Outbound::Close)
                .map_err(|_| WirebusError::NotConnected),
            None => Err(WirebusError::NotConnected),
        }
    }
}
