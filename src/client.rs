//! Wirebus client implementation

use crate::codec::FrameCodec;
use crate::config::WirebusConfig;
use crate::error::{Result, WirebusError};
use crate::events::{ClientEvents, ReconnectAttempt};
use crate::message::Message;
use crate::pending::PendingRequests;
use crate::protocol::{ActionFilter, ActionType, Envelope, Header, Payload};
use crate::request_id::new_request_id;
use crate::subscriptions::{MessageHandler, Subscription, SubscriptionRegistry, Upsert};
use crate::topic::{self, HEARTBEAT, SERVICE_REGISTER, TOPIC_SUBSCRIBE, TOPIC_UNSUBSCRIBE};
use crate::transport::{Transport, TransportEvent, WebSocketTransport};

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

/// Connection state of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected to the broker
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Transport open
    Connected,
    /// Waiting to retry after the transport closed
    Reconnecting,
}

/// Options for [`WirebusClient::request`]
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub parent_request_id: Option<String>,
    /// Protocol version stamped on the frame instead of the local one
    pub version: Option<String>,
    /// Overrides the configured timeout and is advertised in the header
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent(mut self, request_id: impl Into<String>) -> Self {
        self.parent_request_id = Some(request_id.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Options for [`WirebusClient::publish`]
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Attach a request id and wait for a correlated reply
    pub with_request_id: bool,
    pub parent_request_id: Option<String>,
    pub version: Option<String>,
    pub timeout: Option<Duration>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self) -> Self {
        self.with_request_id = true;
        self
    }

    pub fn parent(mut self, request_id: impl Into<String>) -> Self {
        self.parent_request_id = Some(request_id.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Service identity announced through `system.service.register`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceIdentity {
    pub name: String,
    pub description: String,
}

/// Internal client state
struct ClientInner {
    config: WirebusConfig,
    codec: FrameCodec,
    transport: Arc<dyn Transport>,
    state: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    events: ClientEvents,

    identity: Mutex<Option<ServiceIdentity>>,
    subscriptions: SubscriptionRegistry,
    pending: Arc<PendingRequests>,

    // Reconnection
    reconnect_attempts: AtomicU32,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,

    // Set by disconnect() so the resulting close does not schedule a reconnect
    closing: AtomicBool,
    // Bumped by disconnect(); reconnects and opens started earlier stand down
    epoch: AtomicU64,
    // Bumped by every connect(); a resume only completes for the current one
    connection: AtomicU64,
    resume_task: Mutex<Option<JoinHandle<()>>>,

    // connect() waiting for the session to be resumed, keyed by connection
    ready: Mutex<Option<(u64, oneshot::Sender<Result<()>>)>>,
    // disconnect() waiting for the transport to confirm the close
    close_waiters: Mutex<Vec<oneshot::Sender<()>>>,
}

impl ClientInner {
    fn set_state(&self, state: ConnectionState) {
        let _ = self.state.send(state);
    }

    fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    fn emit_error(&self, error: WirebusError) {
        self.events.error.emit(&Arc::new(error));
    }

    fn cancel_reconnect(&self) {
        if let Some(handle) = self.reconnect_task.lock().take() {
            debug!("Cancelling scheduled reconnect");
            handle.abort();
        }
    }

    fn finish_ready(&self, connection: u64, result: Result<()>) {
        let mut ready = self.ready.lock();
        if ready.as_ref().map(|(id, _)| *id) != Some(connection) {
            return;
        }
        if let Some((_, tx)) = ready.take() {
            let _ = tx.send(result);
        }
    }

    fn notify_closed(&self) {
        for waiter in self.close_waiters.lock().drain(..) {
            let _ = waiter.send(());
        }
    }
}

/// Wirebus client
///
/// Cloning is cheap: clones share the same connection, subscriptions, and
/// pending requests.
#[derive(Clone)]
pub struct WirebusClient {
    inner: Arc<ClientInner>,
}

impl WirebusClient {
    /// Create a client that talks WebSocket to `config.url`
    pub fn new(config: WirebusConfig) -> Self {
        Self::with_transport(config, Arc::new(WebSocketTransport::new()))
    }

    /// Create a client over any transport binding
    pub fn with_transport(config: WirebusConfig, transport: Arc<dyn Transport>) -> Self {
        let (state, state_rx) = watch::channel(ConnectionState::Disconnected);
        let codec = FrameCodec::new(config.protocol_version.clone());

        Self {
            inner: Arc::new(ClientInner {
                config,
                codec,
                transport,
                state,
                state_rx,
                events: ClientEvents::default(),
                identity: Mutex::new(None),
                subscriptions: SubscriptionRegistry::new(),
                pending: Arc::new(PendingRequests::new()),
                reconnect_attempts: AtomicU32::new(0),
                reconnect_task: Mutex::new(None),
                closing: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                connection: AtomicU64::new(0),
                resume_task: Mutex::new(None),
                ready: Mutex::new(None),
                close_waiters: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Get the current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Get a receiver for connection state changes
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Lifecycle and message events
    pub fn events(&self) -> &ClientEvents {
        &self.inner.events
    }

    pub fn config(&self) -> &WirebusConfig {
        &self.inner.config
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.inner.codec
    }

    /// Consecutive reconnect attempts since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Number of requests waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Subscriptions that will be replayed on every (re)connect
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.subscriptions.snapshot()
    }

    pub fn registered_identity(&self) -> Option<ServiceIdentity> {
        self.inner.identity.lock().clone()
    }

    /// Open the transport and resume the session.
    ///
    /// Resolves once the identity and every subscription have been replayed.
    /// Returns immediately if already connected.
    pub async fn connect(&self) -> Result<()> {
        match self.connection_state() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Connecting => {
                return Err(WirebusError::Connection(
                    "connection attempt already in progress".to_string(),
                ))
            }
            ConnectionState::Disconnected | ConnectionState::Reconnecting => {}
        }

        let url = self.inner.config.url.clone();
        info!(url = %url, "Connecting");
        self.inner.set_state(ConnectionState::Connecting);
        self.inner.closing.store(false, Ordering::SeqCst);

        let connection = self.inner.connection.fetch_add(1, Ordering::SeqCst) + 1;
        let epoch = self.inner.epoch.load(Ordering::SeqCst);

        let (ready_tx, ready_rx) = oneshot::channel();
        *self.inner.ready.lock() = Some((connection, ready_tx));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(self.clone(), connection, epoch, events_rx));

        if let Err(e) = self.inner.transport.open(&url, events_tx).await {
            warn!(url = %url, "Failed to open transport: {}", e);
            self.inner.ready.lock().take();
            self.inner.closing.store(false, Ordering::SeqCst);
            self.inner.set_state(ConnectionState::Disconnected);
            self.inner.notify_closed();
            return Err(e);
        }

        match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(WirebusError::Connection(
                "connection closed before the session resumed".to_string(),
            )),
        }
    }

    /// Close the transport without reconnecting.
    ///
    /// Cancels a scheduled reconnect and stops any reconnect attempt in flight.
    /// If the transport is still opening, it is closed as soon as it opens.
    /// Waits up to the configured disconnect timeout for the close to be
    /// confirmed.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.cancel_reconnect();

        let state = self.connection_state();
        match state {
            ConnectionState::Disconnected => return Ok(()),
            ConnectionState::Reconnecting => {
                info!("Reconnect abandoned");
                self.inner.set_state(ConnectionState::Disconnected);
                return Ok(());
            }
            ConnectionState::Connecting | ConnectionState::Connected => {}
        }

        let (tx, rx) = oneshot::channel();
        self.inner.close_waiters.lock().push(tx);
        self.inner.closing.store(true, Ordering::SeqCst);

        match self.inner.transport.close().await {
            Ok(()) => {}
            Err(WirebusError::NotConnected) if state == ConnectionState::Connecting => {
                debug!("Close deferred until the transport opens");
            }
            Err(e) => {
                self.inner.closing.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        match timeout(self.inner.config.disconnect_timeout, rx).await {
            Ok(_) => Ok(()),
            Err(_) => {
                warn!("Transport did not confirm close in time");
                Err(WirebusError::Timeout)
            }
        }
    }

    /// Publish `payload` on `topic`.
    ///
    /// Without [`PublishOptions::with_request_id`] this resolves to `None` as
    /// soon as the frame is sent. With it, the frame carries a fresh request id
    /// and this waits for the correlated reply like [`WirebusClient::request`].
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        payload: &T,
        options: PublishOptions,
    ) -> Result<Option<Message>> {
        topic::validate(topic)?;
        let payload = Payload::from_serializable(payload)?;
        let header = self.header(
            ActionType::Publish,
            topic,
            options.version.as_deref(),
            options.parent_request_id,
            options.timeout,
        );

        if !options.with_request_id {
            self.send(&header, &payload)?;
            return Ok(None);
        }

        self.send_correlated(header, payload, options.timeout)
            .await
            .map(Some)
    }

    /// Send a request on `topic` and wait for the correlated reply.
    ///
    /// A reply whose payload is an error resolves to [`WirebusError::Remote`].
    pub async fn request<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        payload: &T,
        options: RequestOptions,
    ) -> Result<Message> {
        topic::validate(topic)?;
        let payload = Payload::from_serializable(payload)?;
        let header = self.header(
            ActionType::Request,
            topic,
            options.version.as_deref(),
            options.parent_request_id,
            options.timeout,
        );

        self.send_correlated(header, payload, options.timeout).await
    }

    /// Reply to `source`, echoing its header with the action set to response
    pub fn response(&self, source: &Envelope, payload: Payload) -> Result<()> {
        topic::validate(&source.header.topic)?;
        let mut header = source.header.clone();
        header.action = ActionType::Response;
        self.send(&header, &payload)
    }

    /// Announce this client as a named service.
    ///
    /// The identity is remembered and replayed on every (re)connect, even if
    /// this call fails.
    pub async fn register(&self, name: &str, description: &str) -> Result<Message> {
        let identity = ServiceIdentity {
            name: name.to_string(),
            description: description.to_string(),
        };
        *self.inner.identity.lock() = Some(identity.clone());
        info!(name, "Registering service");
        self.request(SERVICE_REGISTER, &identity, RequestOptions::default())
            .await
    }

    /// Subscribe `handler` to `topic`.
    ///
    /// Calling again with the same filter and priority only swaps the handler
    /// and sends nothing. While offline the subscription is recorded and sent
    /// on the next connect.
    pub async fn subscribe<F>(
        &self,
        filter: ActionFilter,
        topic: &str,
        priority: i32,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        topic::validate(topic)?;
        let handler: MessageHandler = Arc::new(handler);

        match self.inner.subscriptions.upsert(topic, filter, priority, handler) {
            Upsert::HandlerReplaced => {
                debug!(topic, "Subscription handler replaced");
                Ok(())
            }
            Upsert::Changed => {
                if self.connection_state() != ConnectionState::Connected {
                    debug!(topic, "Subscription deferred until connected");
                    return Ok(());
                }
                let subscription = Subscription {
                    action: filter,
                    topic: topic.to_string(),
                    priority,
                };
                self.request(TOPIC_SUBSCRIBE, &subscription, RequestOptions::default())
                    .await
                    .map(|_| ())
            }
        }
    }

    /// Drop the subscription for `topic`. Unknown topics are a no-op.
    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        if !self.inner.subscriptions.remove(topic) {
            return Ok(());
        }
        if self.connection_state() != ConnectionState::Connected {
            return Ok(());
        }
        self.request(
            TOPIC_UNSUBSCRIBE,
            &serde_json::json!({ "topic": topic }),
            RequestOptions::default(),
        )
        .await
        .map(|_| ())
    }

    fn header(
        &self,
        action: ActionType,
        topic: &str,
        version: Option<&str>,
        parent_request_id: Option<String>,
        timeout: Option<Duration>,
    ) -> Header {
        let version = version
            .map(str::to_string)
            .unwrap_or_else(|| self.inner.codec.version().to_string());
        let mut header = Header::new(action, topic, version);
        header.parent_request_id = parent_request_id;
        header.timeout =
            explicit_timeout(timeout).map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        header
    }

    async fn send_correlated(
        &self,
        mut header: Header,
        payload: Payload,
        timeout: Option<Duration>,
    ) -> Result<Message> {
        if self.connection_state() != ConnectionState::Connected {
            return Err(WirebusError::NotConnected);
        }

        let request_id = new_request_id();
        header.request_id = Some(request_id.clone());

        // Dropping the reply guard on any early return removes the entry
        let reply = self.inner.pending.register(&request_id)?;
        self.send(&header, &payload)?;
        debug!(request_id = %request_id, topic = %header.topic, "Awaiting reply");

        reply
            .wait(explicit_timeout(timeout).unwrap_or(self.inner.config.request_timeout))
            .await
    }

    fn send(&self, header: &Header, payload: &Payload) -> Result<()> {
        if self.connection_state() != ConnectionState::Connected {
            return Err(WirebusError::NotConnected);
        }
        let frame = self.inner.codec.encode(header, payload)?;
        debug!(action = %header.action, topic = %header.topic, "Sending frame");
        self.inner.transport.send(frame)
    }

    fn handle_frame(&self, text: &str) {
        let envelope = match self.inner.codec.decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping undecodable frame: {}", e);
                self.inner.emit_error(WirebusError::Decode(e));
                return;
            }
        };

        let message = Message::new(self.clone(), envelope);
        debug!(action = %message.action(), topic = message.topic(), "Received frame");

        if message.topic() == HEARTBEAT {
            if let Err(e) = message.response(Payload::empty()) {
                warn!("Failed to answer heartbeat: {}", e);
            }
        }

        if let Some(request_id) = message.request_id() {
            let settled = match message.payload().as_error() {
                Some(err) => self
                    .inner
                    .pending
                    .reject(request_id, WirebusError::Remote(err.clone())),
                None => self.inner.pending.resolve(request_id, message.clone()),
            };
            if settled {
                debug!(request_id, "Reply delivered");
            }
        }

        if let Some(handler) = self
            .inner
            .subscriptions
            .handler_for(message.topic(), message.action())
        {
            handler(message.clone());
        }

        self.inner.events.message.emit(&message);
    }

    fn handle_open(&self, connection: u64, epoch: u64) {
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            info!("Disconnect requested while opening, closing transport");
            self.inner.closing.store(true, Ordering::SeqCst);
            let transport = self.inner.transport.clone();
            tokio::spawn(async move {
                if let Err(e) = transport.close().await {
                    debug!("Close after open failed: {}", e);
                }
            });
            return;
        }

        self.inner.cancel_reconnect();
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Connected);
        info!(url = %self.inner.config.url, connection, "Connected");

        let client = self.clone();
        let mut slot = self.inner.resume_task.lock();
        *slot = Some(tokio::spawn(async move { client.resume(connection).await }));
    }

    /// Replay the identity, then every subscription, then announce the connection
    async fn resume(&self, connection: u64) {
        let identity = self.inner.identity.lock().clone();
        if let Some(identity) = identity {
            if let Err(e) = self
                .request(SERVICE_REGISTER, &identity, RequestOptions::default())
                .await
            {
                warn!(name = %identity.name, "Failed to replay registration: {}", e);
                self.inner.emit_error(e);
            }
        }

        let subscriptions = self.inner.subscriptions.snapshot();
        let results = join_all(
            subscriptions
                .iter()
                .map(|s| self.request(TOPIC_SUBSCRIBE, s, RequestOptions::default())),
        )
        .await;
        for (subscription, result) in subscriptions.iter().zip(results) {
            if let Err(e) = result {
                warn!(topic = %subscription.topic, "Failed to replay subscription: {}", e);
                self.inner.emit_error(e);
            }
        }

        if self.inner.connection.load(Ordering::SeqCst) != connection
            || self.connection_state() != ConnectionState::Connected
        {
            debug!(connection, "Connection lost while resuming");
            return;
        }

        debug!(connection, subscriptions = subscriptions.len(), "Session resumed");
        self.inner.events.connected.emit(&());
        self.inner.finish_ready(connection, Ok(()));
    }

    fn handle_close(&self, connection: u64) {
        self.inner.cancel_reconnect();
        // Replays of a closed connection can never be answered
        if let Some(handle) = self.inner.resume_task.lock().take() {
            handle.abort();
        }
        self.inner.set_state(ConnectionState::Disconnected);
        info!(connection, "Disconnected");

        self.inner.finish_ready(
            connection,
            Err(WirebusError::Connection(
                "connection closed before the session resumed".to_string(),
            )),
        );
        self.inner.events.disconnected.emit(&());
        self.inner.notify_closed();

        let explicit = self.inner.closing.swap(false, Ordering::SeqCst);
        if !explicit && self.inner.config.auto_reconnect {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&self) {
        let attempts = self.inner.reconnect_attempts.load(Ordering::SeqCst);
        let max_attempts = self.inner.config.max_reconnect_attempts;
        if let Some(max) = max_attempts {
            if attempts >= max {
                error!(max, "Giving up on reconnecting");
                self.inner.set_state(ConnectionState::Disconnected);
                self.inner.emit_error(WirebusError::ReconnectExhausted(max));
                return;
            }
        }

        let attempt = attempts + 1;
        self.inner.reconnect_attempts.store(attempt, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Reconnecting);
        self.inner.events.reconnecting.emit(&ReconnectAttempt {
            attempt,
            max_attempts,
        });

        let delay = self.inner.config.reconnect_delay;
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        info!(attempt, ?delay, "Scheduling reconnect");

        let client = self.clone();
        // Hold the slot while spawning so the task cannot take it before it is filled
        let mut slot = self.inner.reconnect_task.lock();
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            drop(client.inner.reconnect_task.lock().take());

            if let Err(e) = client.connect().await {
                if client.inner.epoch.load(Ordering::SeqCst) != epoch {
                    debug!(attempt, "Reconnect attempt stopped by disconnect");
                    return;
                }
                warn!(attempt, "Reconnect attempt failed: {}", e);
                client.inner.emit_error(e);
                if client.connection_state() == ConnectionState::Disconnected {
                    client.schedule_reconnect();
                }
            }
        }));
    }
}

/// Timeouts of zero count as unset
fn explicit_timeout(timeout: Option<Duration>) -> Option<Duration> {
    timeout.filter(|t| !t.is_zero())
}

/// Process transport events for one connection, in order
async fn drive(
    client: WirebusClient,
    connection: u64,
    epoch: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Opened => client.handle_open(connection, epoch),
            TransportEvent::Frame(text) => client.handle_frame(&text),
            TransportEvent::Error(e) => {
                warn!("Transport error: {}", e);
                client.inner.emit_error(WirebusError::Transport(e));
            }
            TransportEvent::Closed => {
                client.handle_close(connection);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn offline_client() -> WirebusClient {
        let (transport, _broker) = MemoryTransport::pair();
        WirebusClient::with_transport(WirebusConfig::new("mem://broker"), transport)
    }

    #[test]
    fn test_initial_state() {
        let client = offline_client();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(client.reconnect_attempts(), 0);
        assert_eq!(client.pending_requests(), 0);
        assert!(client.subscriptions().is_empty());
        assert!(client.registered_identity().is_none());
    }

    #[test]
    fn test_request_options_builder() {
        let options = RequestOptions::new()
            .parent("abc")
            .version("1.2.0")
            .timeout(Duration::from_millis(50));
        assert_eq!(options.parent_request_id.as_deref(), Some("abc"));
        assert_eq!(options.version.as_deref(), Some("1.2.0"));
        assert_eq!(options.timeout, Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_publish_options_builder() {
        let options = PublishOptions::new().with_request_id();
        assert!(options.with_request_id);
        assert!(options.parent_request_id.is_none());
    }

    #[test]
    fn test_header_timeout_only_when_explicit() {
        let client = offline_client();
        let header = client.header(ActionType::Request, "a.b", None, None, None);
        assert_eq!(header.timeout, None);
        assert_eq!(header.version, "1.0.0");

        let header = client.header(
            ActionType::Request,
            "a.b",
            Some("1.3.0"),
            Some("parent".to_string()),
            Some(Duration::from_millis(1500)),
        );
        assert_eq!(header.timeout, Some(1500));
        assert_eq!(header.version, "1.3.0");
        assert_eq!(header.parent_request_id.as_deref(), Some("parent"));
    }

    #[test]
    fn test_header_zero_timeout_omitted() {
        let client = offline_client();
        let header = client.header(ActionType::Request, "a.b", None, None, Some(Duration::ZERO));
        assert_eq!(header.timeout, None);
    }

    #[test]
    fn test_header_timeout_saturates() {
        let client = offline_client();
        let header = client.header(
            ActionType::Request,
            "a.b",
            None,
            None,
            Some(Duration::from_secs(u64::MAX)),
        );
        assert_eq!(header.timeout, Some(u64::MAX));
    }

    #[tokio::test]
    async fn test_publish_when_disconnected() {
        let client = offline_client();
        let result = client
            .publish("test.topic", &serde_json::json!({}), PublishOptions::default())
            .await;
        assert!(matches!(result, Err(WirebusError::NotConnected)));
    }

    #[tokio::test]
    async fn test_request_when_disconnected_leaves_no_entry() {
        let client = offline_client();
        let result = client
            .request("test.topic", &serde_json::json!({}), RequestOptions::default())
            .await;
        assert!(matches!(result, Err(WirebusError::NotConnected)));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_invalid_topic_rejected_before_sending() {
        let client = offline_client();
        let result = client
            .publish("bad topic", &serde_json::json!({}), PublishOptions::default())
            .await;
        assert!(matches!(result, Err(WirebusError::InvalidTopic(_))));

        let result = client
            .subscribe(ActionFilter::All, "a..b", 0, |_| {})
            .await;
        assert!(matches!(result, Err(WirebusError::InvalidTopic(_))));
    }

    #[tokio::test]
    async fn test_non_object_payload_rejected() {
        let client = offline_client();
        let result = client
            .publish("a.b", &serde_json::json!([1, 2]), PublishOptions::default())
            .await;
        assert!(matches!(result, Err(WirebusError::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn test_subscribe_offline_is_recorded() {
        let client = offline_client();
        client
            .subscribe(ActionFilter::Request, "test.end", 1, |_| {})
            .await
            .unwrap();

        let subscriptions = client.subscriptions();
        assert_eq!(subscriptions.len(), 1);
        assert_eq!(subscriptions[0].topic, "test.end");

        client.unsubscribe("test.end").await.unwrap();
        assert!(client.subscriptions().is_empty());
        client.unsubscribe("test.end").await.unwrap();
    }

    #[tokio::test]
    async fn test_register_offline_remembers_identity() {
        let client = offline_client();
        let result = client.register("svc", "A test service").await;
        assert!(matches!(result, Err(WirebusError::NotConnected)));
        assert_eq!(
            client.registered_identity(),
            Some(ServiceIdentity {
                name: "svc".to_string(),
                description: "A test service".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_disconnect_when_disconnected() {
        let client = offline_client();
        client.disconnect().await.unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }
}
