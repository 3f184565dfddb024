//! Session tests against an in-process broker
//!
//! Every test drives a real `WirebusClient` over `MemoryTransport`, with the
//! test body playing the broker through `MemoryBroker`.

use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use wirebus::request_id::{is_uuid4, new_request_id};
use wirebus::topic::{HEARTBEAT, SERVICE_REGISTER, TOPIC_SUBSCRIBE, TOPIC_UNSUBSCRIBE};
use wirebus::{
    ActionFilter, ActionType, ConnectionState, DecodeError, Emitter, Envelope, FrameCodec,
    MemoryBroker, MemoryTransport, Payload, PublishOptions, ReconnectAttempt, RequestOptions,
    WirebusClient, WirebusConfig, WirebusError,
};

const WAIT: Duration = Duration::from_secs(2);

fn setup(config: WirebusConfig) -> (WirebusClient, MemoryBroker) {
    let (transport, broker) = MemoryTransport::pair();
    (WirebusClient::with_transport(config, transport), broker)
}

async fn connected(config: WirebusConfig) -> (WirebusClient, MemoryBroker) {
    let (client, broker) = setup(config);
    client.connect().await.expect("Failed to connect");
    (client, broker)
}

fn config() -> WirebusConfig {
    WirebusConfig::new("mem://broker")
}

fn capture<T: Clone + Send + 'static>(emitter: &Emitter<T>) -> mpsc::UnboundedReceiver<T> {
    let (tx, rx) = mpsc::unbounded_channel();
    emitter.on(move |value: &T| {
        let _ = tx.send(value.clone());
    });
    rx
}

async fn next_event<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv())
        .await
        .expect("Timed out waiting for event")
        .expect("Event channel closed")
}

async fn next_envelope(broker: &mut MemoryBroker) -> Envelope {
    let frame = broker.recv_timeout(WAIT).await.expect("Client sent nothing");
    FrameCodec::default()
        .decode(&frame)
        .expect("Client sent an undecodable frame")
}

fn reply(broker: &MemoryBroker, request: &Envelope, payload: serde_json::Value) {
    let mut header = request.header.clone();
    header.action = ActionType::Response;
    let payload = Payload::from_value(payload).unwrap();
    let frame = FrameCodec::default().encode(&header, &payload).unwrap();
    assert!(broker.inject(frame), "Connection is not open");
}

async fn answer_next(broker: &mut MemoryBroker) -> Envelope {
    let envelope = next_envelope(broker).await;
    reply(broker, &envelope, json!({}));
    envelope
}

#[tokio::test]
async fn test_connect_and_disconnect() {
    let (client, broker) = setup(config());
    let mut connected_rx = capture(&client.events().connected);
    let mut disconnected_rx = capture(&client.events().disconnected);

    client.connect().await.unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Connected);
    assert_eq!(broker.last_url().as_deref(), Some("mem://broker"));
    next_event(&mut connected_rx).await;

    // Second connect is a no-op
    client.connect().await.unwrap();
    assert_eq!(broker.open_count(), 1);

    client.disconnect().await.unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    next_event(&mut disconnected_rx).await;
    assert!(!broker.is_open());
}

#[tokio::test]
async fn test_connect_refused() {
    let (client, broker) = setup(config());
    broker.refuse_connections(true);

    let result = client.connect().await;
    assert!(matches!(result, Err(WirebusError::Connection(_))));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_publish_frame_on_the_wire() {
    let (client, mut broker) = connected(config()).await;

    let reply = client
        .publish("test.event", &json!({"a": 1}), PublishOptions::default())
        .await
        .unwrap();
    assert!(reply.is_none());

    let frame = broker.recv_timeout(WAIT).await.unwrap();
    assert_eq!(frame, "publish:test.event:1.0.0\n{\"a\":1}");
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_request_resolves_with_reply() {
    let (client, mut broker) = connected(config()).await;

    let task = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .request("test.echo", &json!({"ping": true}), RequestOptions::default())
                .await
        }
    });

    let request = next_envelope(&mut broker).await;
    assert_eq!(request.header.action, ActionType::Request);
    assert_eq!(request.header.topic, "test.echo");
    assert_eq!(request.header.timeout, None);
    let id = request.header.request_id.clone().unwrap();
    assert!(is_uuid4(&id));
    assert_eq!(client.pending_requests(), 1);

    reply(&broker, &request, json!({"pong": true}));

    let message = task.await.unwrap().unwrap();
    assert_eq!(message.action(), ActionType::Response);
    assert_eq!(message.request_id(), Some(id.as_str()));
    assert_eq!(message.payload().get("pong"), Some(&json!(true)));
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_publish_with_request_id_waits_for_reply() {
    let (client, mut broker) = connected(config()).await;

    let task = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .publish(
                    "test.event",
                    &json!({}),
                    PublishOptions::default().with_request_id(),
                )
                .await
        }
    });

    let publish = next_envelope(&mut broker).await;
    assert_eq!(publish.header.action, ActionType::Publish);
    assert!(publish.header.request_id.is_some());

    reply(&broker, &publish, json!({"seen": 1}));
    let message = task.await.unwrap().unwrap().expect("Expected a reply");
    assert_eq!(message.payload().get("seen"), Some(&json!(1)));
}

#[tokio::test]
async fn test_remote_error_rejects_request() {
    let (client, mut broker) = connected(config()).await;

    let task = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .request("test.fail", &json!({}), RequestOptions::default())
                .await
        }
    });

    let request = next_envelope(&mut broker).await;
    reply(
        &broker,
        &request,
        json!({"error": {"code": "E_FAIL", "message": "boom", "timestamp": "2024-01-01T00:00:00Z"}}),
    );

    match task.await.unwrap() {
        Err(WirebusError::Remote(err)) => {
            assert_eq!(err.code, "E_FAIL");
            assert_eq!(err.message, "boom");
        }
        other => panic!("Expected remote error, got {:?}", other),
    }
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_remote_error_string_member() {
    let (client, mut broker) = connected(config()).await;

    let task = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .request("test.fail", &json!({}), RequestOptions::default())
                .await
        }
    });

    let request = next_envelope(&mut broker).await;
    reply(&broker, &request, json!({"error": "no handler"}));

    match task.await.unwrap() {
        Err(WirebusError::Remote(err)) => assert_eq!(err.message, "no handler"),
        _ => panic!("Expected remote error"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_request_times_out_at_configured_duration() {
    let (client, mut broker) = connected(config().request_timeout(Duration::from_secs(10))).await;
    let mut messages = capture(&client.events().message);

    let start = Instant::now();
    let task = tokio::spawn({
        let client = client.clone();
        async move {
            let result = client
                .request("test.slow", &json!({}), RequestOptions::default())
                .await;
            (result, Instant::now())
        }
    });

    let request = next_envelope(&mut broker).await;
    let (result, finished) = task.await.unwrap();
    assert!(matches!(result, Err(WirebusError::Timeout)));

    let elapsed = finished - start;
    assert!(elapsed >= Duration::from_secs(10), "fired early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(10_050), "fired late: {:?}", elapsed);
    assert_eq!(client.pending_requests(), 0);

    // A late reply resolves nothing but is still surfaced as a message
    reply(&broker, &request, json!({"late": true}));
    let late = next_event(&mut messages).await;
    assert_eq!(late.payload().get("late"), Some(&json!(true)));
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_timeout_is_advertised_and_used() {
    let (client, mut broker) = connected(config()).await;

    let start = Instant::now();
    let task = tokio::spawn({
        let client = client.clone();
        async move {
            let result = client
                .request(
                    "test.slow",
                    &json!({}),
                    RequestOptions::new().timeout(Duration::from_millis(250)),
                )
                .await;
            (result, Instant::now())
        }
    });

    let request = next_envelope(&mut broker).await;
    assert_eq!(request.header.timeout, Some(250));

    let (result, finished) = task.await.unwrap();
    assert!(matches!(result, Err(WirebusError::Timeout)));
    assert!(finished - start >= Duration::from_millis(250));
    assert!(finished - start < Duration::from_secs(1));
}

#[tokio::test]
async fn test_concurrent_requests_get_distinct_ids() {
    let (client, mut broker) = connected(config()).await;

    let spawn_request = |n: u32| {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .request("test.calc", &json!({ "n": n }), RequestOptions::default())
                .await
        })
    };
    let first = spawn_request(1);
    let second = spawn_request(2);

    let a = next_envelope(&mut broker).await;
    let b = next_envelope(&mut broker).await;
    assert_ne!(a.header.request_id, b.header.request_id);

    // Answer out of order, echoing the input
    reply(&broker, &b, json!({ "n": b.payload.get("n").cloned() }));
    reply(&broker, &a, json!({ "n": a.payload.get("n").cloned() }));

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first.payload().get("n"), Some(&json!(1)));
    assert_eq!(second.payload().get("n"), Some(&json!(2)));
}

#[tokio::test]
async fn test_dropped_request_removes_entry() {
    let (client, mut broker) = connected(config()).await;

    let task = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .request("test.slow", &json!({}), RequestOptions::default())
                .await
        }
    });
    next_envelope(&mut broker).await;
    assert_eq!(client.pending_requests(), 1);

    task.abort();
    let _ = task.await;
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_heartbeat_is_answered() {
    let (_client, mut broker) = connected(config()).await;

    let id = new_request_id();
    broker.inject(format!("request:{}:1.0.0:{}\n{{}}", HEARTBEAT, id));

    let frame = broker.recv_timeout(WAIT).await.unwrap();
    assert_eq!(frame, format!("response:{}:1.0.0:{}\n{{}}", HEARTBEAT, id));
}

#[tokio::test]
async fn test_undecodable_frame_emits_one_error() {
    let (client, mut broker) = setup(config());
    client
        .subscribe(ActionFilter::All, "test.topic", 0, |_| {})
        .await
        .unwrap();
    let connect = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    answer_next(&mut broker).await;
    connect.await.unwrap().unwrap();

    let mut errors = capture(&client.events().error);
    let mut messages = capture(&client.events().message);

    broker.inject("no newline here");
    let err = next_event(&mut errors).await;
    assert!(matches!(
        err.as_ref(),
        WirebusError::Decode(DecodeError::MissingSection)
    ));

    broker.inject("publish:test.topic:2.0.0\n{}");
    let err = next_event(&mut errors).await;
    assert!(matches!(
        err.as_ref(),
        WirebusError::Decode(DecodeError::UnsupportedVersion(_))
    ));

    broker.inject(format!("response:test.topic:1.0.0:{}\n[1]", new_request_id()));
    let err = next_event(&mut errors).await;
    assert!(matches!(
        err.as_ref(),
        WirebusError::Decode(DecodeError::InvalidPayload(_))
    ));

    assert!(errors.try_recv().is_err());
    assert!(messages.try_recv().is_err());
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client.subscriptions().len(), 1);
    assert_eq!(client.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_transport_error_keeps_connection() {
    let (client, broker) = connected(config()).await;
    let mut errors = capture(&client.events().error);

    assert!(broker.raise_error("socket hiccup"));
    let err = next_event(&mut errors).await;
    assert!(matches!(err.as_ref(), WirebusError::Transport(msg) if msg == "socket hiccup"));
    assert_eq!(client.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_subscription_dispatch_applies_filter() {
    let (client, mut broker) = connected(config()).await;
    let mut messages = capture(&client.events().message);
    let (tx, mut handled) = mpsc::unbounded_channel();

    let task = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .subscribe(ActionFilter::Request, "test.end", 3, move |message| {
                    let _ = tx.send(message);
                })
                .await
        }
    });

    let control = answer_next(&mut broker).await;
    assert_eq!(control.header.action, ActionType::Request);
    assert_eq!(control.header.topic, TOPIC_SUBSCRIBE);
    assert_eq!(control.payload.get("action"), Some(&json!("request")));
    assert_eq!(control.payload.get("topic"), Some(&json!("test.end")));
    assert_eq!(control.payload.get("priority"), Some(&json!(3)));
    task.await.unwrap().unwrap();
    next_event(&mut messages).await;

    // Publishes are filtered out but still surface as messages
    broker.inject("publish:test.end:1.0.0\n{\"n\":1}");
    next_event(&mut messages).await;
    assert!(handled.try_recv().is_err());

    let id = new_request_id();
    broker.inject(format!("request:test.end:1.0.0:{}\n{{\"n\":2}}", id));
    let message = next_event(&mut handled).await;
    assert_eq!(message.request_id(), Some(id.as_str()));
    assert_eq!(message.payload().get("n"), Some(&json!(2)));
}

#[tokio::test]
async fn test_handler_swap_sends_nothing() {
    let (client, mut broker) = connected(config()).await;
    let first_calls = Arc::new(AtomicUsize::new(0));
    let (tx, mut second) = mpsc::unbounded_channel();

    let task = tokio::spawn({
        let client = client.clone();
        let first_calls = first_calls.clone();
        async move {
            client
                .subscribe(ActionFilter::All, "test.swap", 0, move |_| {
                    first_calls.fetch_add(1, Ordering::SeqCst);
                })
                .await
        }
    });
    answer_next(&mut broker).await;
    task.await.unwrap().unwrap();

    // Same filter and priority: only the handler changes
    client
        .subscribe(ActionFilter::All, "test.swap", 0, move |message| {
            let _ = tx.send(message);
        })
        .await
        .unwrap();
    assert!(broker.recv_timeout(Duration::from_millis(50)).await.is_none());

    broker.inject("publish:test.swap:1.0.0\n{}");
    next_event(&mut second).await;
    assert_eq!(first_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unsubscribe_sends_control_request() {
    let (client, mut broker) = connected(config()).await;

    let task = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .subscribe(ActionFilter::All, "test.gone", 0, |_| {})
                .await
        }
    });
    answer_next(&mut broker).await;
    task.await.unwrap().unwrap();

    let task = tokio::spawn({
        let client = client.clone();
        async move { client.unsubscribe("test.gone").await }
    });
    let control = answer_next(&mut broker).await;
    assert_eq!(control.header.topic, TOPIC_UNSUBSCRIBE);
    assert_eq!(control.payload.to_value(), json!({"topic": "test.gone"}));
    task.await.unwrap().unwrap();
    assert!(client.subscriptions().is_empty());

    // Unknown topic: nothing on the wire
    client.unsubscribe("test.gone").await.unwrap();
    assert!(broker.recv_timeout(Duration::from_millis(50)).await.is_none());
}

#[tokio::test]
async fn test_resume_replays_before_connected() {
    let (client, mut broker) = setup(config().reconnect(Duration::from_millis(10)));
    let mut connected_rx = capture(&client.events().connected);
    let mut disconnected_rx = capture(&client.events().disconnected);
    let mut reconnecting_rx = capture(&client.events().reconnecting);
    let (tx, mut handled) = mpsc::unbounded_channel();

    // Offline: recorded locally, replayed on connect
    client
        .subscribe(ActionFilter::Publish, "a.one", 1, move |message| {
            let _ = tx.send(message);
        })
        .await
        .unwrap();
    client
        .subscribe(ActionFilter::All, "b.two", 0, |_| {})
        .await
        .unwrap();
    assert!(matches!(
        client.register("svc", "Test service").await,
        Err(WirebusError::NotConnected)
    ));

    for round in 1..=2 {
        let connect = if round == 1 {
            let client = client.clone();
            Some(tokio::spawn(async move { client.connect().await }))
        } else {
            None
        };

        let register = answer_next(&mut broker).await;
        assert_eq!(register.header.topic, SERVICE_REGISTER);
        assert_eq!(register.payload.get("name"), Some(&json!("svc")));
        assert_eq!(
            register.payload.get("description"),
            Some(&json!("Test service"))
        );

        let first = next_envelope(&mut broker).await;
        let second = next_envelope(&mut broker).await;
        assert!(connected_rx.try_recv().is_err(), "connected before resume finished");

        let topics: HashSet<_> = [&first, &second]
            .iter()
            .map(|e| {
                assert_eq!(e.header.topic, TOPIC_SUBSCRIBE);
                e.payload.get("topic").and_then(|t| t.as_str()).unwrap().to_string()
            })
            .collect();
        assert_eq!(
            topics,
            HashSet::from(["a.one".to_string(), "b.two".to_string()])
        );

        reply(&broker, &first, json!({}));
        reply(&broker, &second, json!({}));

        next_event(&mut connected_rx).await;
        if let Some(connect) = connect {
            connect.await.unwrap().unwrap();
        }
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        assert_eq!(client.reconnect_attempts(), 0);

        if round == 1 {
            assert!(broker.drop_connection());
            next_event(&mut disconnected_rx).await;
            assert_eq!(
                next_event(&mut reconnecting_rx).await,
                ReconnectAttempt {
                    attempt: 1,
                    max_attempts: None,
                }
            );
        }
    }

    assert_eq!(broker.open_count(), 2);

    broker.inject("publish:a.one:1.0.0\n{}");
    let message = next_event(&mut handled).await;
    assert_eq!(message.topic(), "a.one");
}

#[tokio::test]
async fn test_explicit_disconnect_does_not_reconnect() {
    let (client, broker) = connected(config().reconnect(Duration::from_millis(10))).await;
    let mut reconnecting_rx = capture(&client.events().reconnecting);

    client.disconnect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(broker.open_count(), 1);
    assert!(reconnecting_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_no_reconnect_by_default() {
    let (client, broker) = connected(config()).await;
    let mut disconnected_rx = capture(&client.events().disconnected);

    assert!(broker.drop_connection());
    next_event(&mut disconnected_rx).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(broker.open_count(), 1);
}

#[tokio::test]
async fn test_reconnect_gives_up_after_max_attempts() {
    let (client, broker) = connected(
        config()
            .reconnect(Duration::from_millis(10))
            .max_reconnect_attempts(2),
    )
    .await;
    let mut errors = capture(&client.events().error);
    let mut reconnecting_rx = capture(&client.events().reconnecting);

    broker.refuse_connections(true);
    assert!(broker.drop_connection());

    let mut connection_errors = 0;
    loop {
        let err = next_event(&mut errors).await;
        match err.as_ref() {
            WirebusError::Connection(_) => connection_errors += 1,
            WirebusError::ReconnectExhausted(max) => {
                assert_eq!(*max, 2);
                break;
            }
            other => panic!("Unexpected error: {}", other),
        }
    }
    assert_eq!(connection_errors, 2);

    let attempts: Vec<u32> = std::iter::from_fn(|| reconnecting_rx.try_recv().ok())
        .map(|a| a.attempt)
        .collect();
    assert_eq!(attempts, vec![1, 2]);
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(broker.open_count(), 1);
}

#[tokio::test]
async fn test_disconnect_cancels_pending_reconnect() {
    let (client, broker) = connected(config().reconnect(Duration::from_secs(60))).await;
    let mut reconnecting_rx = capture(&client.events().reconnecting);

    assert!(broker.drop_connection());
    next_event(&mut reconnecting_rx).await;
    assert_eq!(client.connection_state(), ConnectionState::Reconnecting);

    client.disconnect().await.unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_manual_connect_during_reconnect_wait() {
    let (client, broker) = connected(config().reconnect(Duration::from_secs(60))).await;
    let mut reconnecting_rx = capture(&client.events().reconnecting);

    assert!(broker.drop_connection());
    next_event(&mut reconnecting_rx).await;

    client.connect().await.unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Connected);
    assert_eq!(client.reconnect_attempts(), 0);
    assert_eq!(broker.open_count(), 2);
}

#[tokio::test]
async fn test_message_chains_parent_request_id() {
    let (client, mut broker) = connected(config()).await;
    let mut messages = capture(&client.events().message);

    let id = new_request_id();
    broker.inject(format!("request:test.job:1.0.0:{}\n{{\"job\":7}}", id));
    let job = next_event(&mut messages).await;
    assert_eq!(job.request_id(), Some(id.as_str()));

    // Publish on behalf of the job
    job.publish("test.job_started", &json!({"job": 7}), PublishOptions::default())
        .await
        .unwrap();
    let frame = broker.recv_timeout(WAIT).await.unwrap();
    assert_eq!(
        frame,
        format!("publish:test.job_started:1.0.0::{}\n{{\"job\":7}}", id)
    );

    // Request on behalf of the job
    let task = tokio::spawn({
        let job = job.clone();
        async move {
            job.request("test.lookup", &json!({}), RequestOptions::default())
                .await
        }
    });
    let lookup = next_envelope(&mut broker).await;
    assert_eq!(lookup.header.parent_request_id.as_deref(), Some(id.as_str()));
    assert_ne!(lookup.header.request_id.as_deref(), Some(id.as_str()));
    reply(&broker, &lookup, json!({"found": true}));
    task.await.unwrap().unwrap();

    // Answer the job itself
    job.response(json!({"done": true}).as_object().cloned().unwrap())
        .unwrap();
    let frame = broker.recv_timeout(WAIT).await.unwrap();
    assert_eq!(
        frame,
        format!("response:test.job:1.0.0:{}\n{{\"done\":true}}", id)
    );
}

#[tokio::test]
async fn test_operations_fail_after_disconnect() {
    let (client, _broker) = connected(config()).await;
    client.disconnect().await.unwrap();

    let result = client
        .publish("test.event", &json!({}), PublishOptions::default())
        .await;
    assert!(matches!(result, Err(WirebusError::NotConnected)));

    let result = client
        .request("test.event", &json!({}), RequestOptions::default())
        .await;
    assert!(matches!(result, Err(WirebusError::NotConnected)));
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_disconnect_during_reconnect_resume_stays_down() {
    let (client, mut broker) = setup(config().reconnect(Duration::from_millis(10)));
    let mut reconnecting_rx = capture(&client.events().reconnecting);
    client
        .subscribe(ActionFilter::All, "test.topic", 0, |_| {})
        .await
        .unwrap();

    let connect = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    answer_next(&mut broker).await;
    connect.await.unwrap().unwrap();

    assert!(broker.drop_connection());
    next_event(&mut reconnecting_rx).await;

    // Replayed subscribe on the second connection, never answered
    let replay = next_envelope(&mut broker).await;
    assert_eq!(replay.header.topic, TOPIC_SUBSCRIBE);
    assert_eq!(broker.open_count(), 2);

    client.disconnect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(broker.open_count(), 2);
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert!(reconnecting_rx.try_recv().is_err());
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connected_fires_once_per_connection() {
    let (client, mut broker) = setup(
        config()
            .reconnect(Duration::from_millis(10))
            .request_timeout(Duration::from_secs(10)),
    );
    client
        .subscribe(ActionFilter::All, "test.topic", 0, |_| {})
        .await
        .unwrap();
    let (tx, mut connected_at) = mpsc::unbounded_channel();
    client.events().connected.on(move |_| {
        let _ = tx.send(Instant::now());
    });

    let start = Instant::now();
    let first = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });

    // First connection drops while its replay is unanswered
    next_envelope(&mut broker).await;
    assert!(broker.drop_connection());
    assert!(first.await.unwrap().is_err());

    let replay = next_envelope(&mut broker).await;
    assert_eq!(broker.open_count(), 2);

    // Past the first replay's deadline, before the second one's
    tokio::time::sleep_until(start + Duration::from_millis(10_005)).await;
    assert!(connected_at.try_recv().is_err());
    assert_eq!(client.pending_requests(), 1);

    reply(&broker, &replay, json!({}));
    let at = next_event(&mut connected_at).await;
    assert!(at >= start + Duration::from_millis(10_005));
    assert_eq!(client.connection_state(), ConnectionState::Connected);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(connected_at.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_recovers_after_failed_attempt() {
    let (client, broker) = connected(config().reconnect(Duration::from_millis(10))).await;
    let mut reconnecting_rx = capture(&client.events().reconnecting);
    let mut errors = capture(&client.events().error);
    let mut connected_rx = capture(&client.events().connected);

    broker.refuse_connections(true);
    assert!(broker.drop_connection());
    assert_eq!(next_event(&mut reconnecting_rx).await.attempt, 1);
    assert!(matches!(
        next_event(&mut errors).await.as_ref(),
        WirebusError::Connection(_)
    ));
    assert_eq!(next_event(&mut reconnecting_rx).await.attempt, 2);
    assert_eq!(client.reconnect_attempts(), 2);

    broker.refuse_connections(false);
    next_event(&mut connected_rx).await;
    assert_eq!(client.connection_state(), ConnectionState::Connected);
    assert_eq!(client.reconnect_attempts(), 0);
    assert_eq!(broker.open_count(), 2);
    assert!(reconnecting_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_opening() {
    let (client, broker) = setup(config().reconnect(Duration::from_millis(10)));
    let mut connected_rx = capture(&client.events().connected);
    broker.delay_opens(Duration::from_millis(100));

    let connect = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(client.connection_state(), ConnectionState::Connecting);

    client.disconnect().await.unwrap();
    assert!(connect.await.unwrap().is_err());
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert!(!broker.is_open());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(connected_rx.try_recv().is_err());
    assert_eq!(broker.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_uses_configured_default() {
    let (client, mut broker) = connected(config().request_timeout(Duration::from_secs(3))).await;

    let start = Instant::now();
    let task = tokio::spawn({
        let client = client.clone();
        async move {
            let result = client
                .request(
                    "test.slow",
                    &json!({}),
                    RequestOptions::new().timeout(Duration::ZERO),
                )
                .await;
            (result, Instant::now())
        }
    });

    let request = next_envelope(&mut broker).await;
    assert_eq!(request.header.timeout, None);

    let (result, finished) = task.await.unwrap();
    assert!(matches!(result, Err(WirebusError::Timeout)));
    assert!(finished - start >= Duration::from_secs(3));
}
