//! Integration tests driving the link client against in-process WebSocket
//! servers on the loopback interface.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;

use telemetry_link::{
    Endpoint, LinkClient, LinkConfig, LinkError, LinkEvent, LinkState, ReconnectPolicy,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Test-sized backoff so reconnect scenarios complete in milliseconds.
fn test_config(max_attempts: u32) -> LinkConfig {
    LinkConfig {
        reconnect: ReconnectPolicy {
            max_attempts,
            base_delay_ms: 5,
            max_delay_ms: 40,
        },
        event_capacity: 256,
    }
}

fn endpoint_for(addr: SocketAddr) -> Endpoint {
    Endpoint::parse(&format!("ws://{addr}")).expect("loopback endpoint parses")
}

async fn next_event(events: &mut broadcast::Receiver<LinkEvent>) -> LinkEvent {
    timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for link event")
        .expect("event channel closed")
}

async fn wait_for_open(events: &mut broadcast::Receiver<LinkEvent>) {
    loop {
        if matches!(next_event(events).await, LinkEvent::Open) {
            return;
        }
    }
}

/// Accept one connection and forward every text frame it carries.
async fn spawn_capture_server() -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let _ = frame_tx.send(text.to_string());
            }
        }
    });

    (addr, frame_rx)
}

/// Accept one connection, push the given frames, then hold the socket open
/// until the peer goes away.
async fn spawn_feed_server(frames: Vec<String>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        for frame in frames {
            ws.send(Message::Text(frame.into())).await.unwrap();
        }
        while let Some(Ok(_)) = ws.next().await {}
    });

    addr
}

/// Accept TCP connections and drop them before the WebSocket handshake, so
/// every connect attempt fails without a successful open. Counts accepts.
async fn spawn_rejecting_server(accepts: Arc<AtomicUsize>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            accepts.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    addr
}

/// Complete the handshake and then drop the connection `drops` times; hold
/// the connection after that.
async fn spawn_flaky_server(drops: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        for _ in 0..drops {
            let (stream, _) = listener.accept().await.unwrap();
            if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                drop(ws);
            }
        }
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    addr
}

#[tokio::test]
async fn test_send_transmits_exactly_one_frame() {
    let (addr, mut frames) = spawn_capture_server().await;
    let client = LinkClient::new(test_config(5));
    let mut events = client.subscribe();

    client.connect(endpoint_for(addr)).await.unwrap();
    wait_for_open(&mut events).await;

    let payload = json!({"type": "ping", "timestamp": "T"});
    client.send(&payload).await.unwrap();

    let received = timeout(EVENT_TIMEOUT, frames.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("server closed");
    assert_eq!(received, serde_json::to_string(&payload).unwrap());

    // At-most-once: nothing else arrives.
    sleep(Duration::from_millis(100)).await;
    assert!(frames.try_recv().is_err());

    client.disconnect().await;
}

#[tokio::test]
async fn test_send_raw_passes_frame_through() {
    let (addr, mut frames) = spawn_capture_server().await;
    let client = LinkClient::new(test_config(5));
    let mut events = client.subscribe();

    client.connect(endpoint_for(addr)).await.unwrap();
    wait_for_open(&mut events).await;

    let raw = r#"{"type":"status","data":{"battery":85,"speed":2.5,"mode":"autonomous"}}"#;
    client.send_raw(raw).await.unwrap();

    let received = timeout(EVENT_TIMEOUT, frames.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("server closed");
    assert_eq!(received, raw);

    client.disconnect().await;
}

#[tokio::test]
async fn test_send_while_not_open_never_transmits() {
    let client = LinkClient::new(test_config(5));

    let result = client.send(&json!({"type": "ping"})).await;
    assert!(matches!(result, Err(LinkError::NotConnected)));
}

#[tokio::test]
async fn test_connect_while_connected_fails_fast() {
    let addr = spawn_feed_server(vec![]).await;
    let client = LinkClient::new(test_config(5));
    let mut events = client.subscribe();

    client.connect(endpoint_for(addr)).await.unwrap();
    wait_for_open(&mut events).await;

    let result = client.connect(endpoint_for(addr)).await;
    assert!(matches!(result, Err(LinkError::AlreadyConnecting)));

    client.disconnect().await;
}

#[tokio::test]
async fn test_inbound_frames_dispatch_to_handlers() {
    let addr = spawn_feed_server(vec![
        r#"{"type":"robot_location","robotId":"r-1","data":{"lat":37.7749,"lng":-122.4194}}"#
            .to_string(),
        "not json at all".to_string(),
    ])
    .await;

    let client = LinkClient::new(test_config(5));
    let mut events = client.subscribe();

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Value>();
    client.on("robot_location", move |payload| {
        let _ = seen_tx.send(payload);
    });

    client.connect(endpoint_for(addr)).await.unwrap();
    wait_for_open(&mut events).await;

    // The decodable frame reaches its handler with the full payload.
    let payload = timeout(EVENT_TIMEOUT, seen_rx.recv())
        .await
        .expect("timed out waiting for handler")
        .expect("handler channel closed");
    assert_eq!(payload["robotId"], "r-1");

    // Both frames surface as message events, in order.
    match next_event(&mut events).await {
        LinkEvent::Message {
            parsed,
            decode_error,
            ..
        } => {
            assert!(parsed.is_some());
            assert!(decode_error.is_none());
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match next_event(&mut events).await {
        LinkEvent::Message {
            raw,
            parsed,
            decode_error,
        } => {
            assert_eq!(raw, "not json at all");
            assert!(parsed.is_none());
            assert!(decode_error.is_some());
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // The malformed frame never reached a handler.
    assert!(seen_rx.try_recv().is_err());

    client.disconnect().await;
}

#[tokio::test]
async fn test_backoff_sequence_then_exhaustion() {
    let accepts = Arc::new(AtomicUsize::new(0));
    let addr = spawn_rejecting_server(accepts.clone()).await;

    let client = LinkClient::new(test_config(5));
    let mut events = client.subscribe();
    client.connect(endpoint_for(addr)).await.unwrap();

    let mut scheduled: Vec<(u32, Duration)> = Vec::new();
    loop {
        match next_event(&mut events).await {
            LinkEvent::ReconnectScheduled { attempt, delay } => {
                scheduled.push((attempt, delay));
            }
            LinkEvent::ReconnectExhausted => break,
            LinkEvent::Error(_) | LinkEvent::Closed { .. } => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    let attempts: Vec<u32> = scheduled.iter().map(|(n, _)| *n).collect();
    assert_eq!(attempts, vec![1, 2, 3, 4, 5]);

    // min(base * 2^n, cap) with base=5ms, cap=40ms.
    let delays: Vec<u64> = scheduled
        .iter()
        .map(|(_, d)| d.as_millis() as u64)
        .collect();
    assert_eq!(delays, vec![10, 20, 40, 40, 40]);

    // One initial attempt plus five retries, then nothing further.
    sleep(Duration::from_millis(200)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 6);
    assert_eq!(client.state().await, LinkState::Disconnected);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_exhaustion_requires_explicit_reconnect() {
    let accepts = Arc::new(AtomicUsize::new(0));
    let addr = spawn_rejecting_server(accepts.clone()).await;

    let client = LinkClient::new(test_config(1));
    let mut events = client.subscribe();
    client.connect(endpoint_for(addr)).await.unwrap();

    loop {
        if matches!(next_event(&mut events).await, LinkEvent::ReconnectExhausted) {
            break;
        }
    }
    assert_eq!(client.state().await, LinkState::Disconnected);

    // The client does not self-heal past exhaustion, but an explicit connect
    // is accepted again. The counter is still spent, so the failed attempt
    // re-exhausts without scheduling.
    client.connect(endpoint_for(addr)).await.unwrap();
    loop {
        match next_event(&mut events).await {
            LinkEvent::ReconnectExhausted => break,
            LinkEvent::ReconnectScheduled { .. } => {
                panic!("spent policy must not schedule reconnects")
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_open_resets_attempt_counter() {
    // Two mid-session drops with max_attempts = 1: each successful open must
    // reset the counter or the second drop would exhaust the policy.
    let addr = spawn_flaky_server(2).await;

    let client = LinkClient::new(test_config(1));
    let mut events = client.subscribe();
    client.connect(endpoint_for(addr)).await.unwrap();

    let mut opens = 0;
    let mut scheduled_attempts = Vec::new();
    while opens < 3 {
        match next_event(&mut events).await {
            LinkEvent::Open => opens += 1,
            LinkEvent::ReconnectScheduled { attempt, .. } => scheduled_attempts.push(attempt),
            LinkEvent::ReconnectExhausted => panic!("policy exhausted despite resets"),
            _ => {}
        }
    }

    assert_eq!(scheduled_attempts, vec![1, 1]);
    assert_eq!(client.state().await, LinkState::Open);

    client.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_is_idempotent_and_never_reconnects() {
    let addr = spawn_feed_server(vec![]).await;
    let client = LinkClient::new(test_config(5));
    let mut events = client.subscribe();

    client.connect(endpoint_for(addr)).await.unwrap();
    wait_for_open(&mut events).await;

    client.disconnect().await;
    match next_event(&mut events).await {
        LinkEvent::Closed { code, .. } => assert_eq!(code, Some(1000)),
        other => panic!("unexpected event: {other:?}"),
    }

    // Second call is a no-op: no second close, no reconnect scheduling.
    client.disconnect().await;
    sleep(Duration::from_millis(150)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(client.state().await, LinkState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_cancels_pending_reconnect() {
    let accepts = Arc::new(AtomicUsize::new(0));
    let addr = spawn_rejecting_server(accepts.clone()).await;

    // Long delays so the timer is still pending when we cancel it.
    let client = LinkClient::new(LinkConfig {
        reconnect: ReconnectPolicy {
            max_attempts: 5,
            base_delay_ms: 5000,
            max_delay_ms: 30000,
        },
        event_capacity: 256,
    });
    let mut events = client.subscribe();
    client.connect(endpoint_for(addr)).await.unwrap();

    loop {
        if matches!(
            next_event(&mut events).await,
            LinkEvent::ReconnectScheduled { .. }
        ) {
            break;
        }
    }

    client.disconnect().await;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 1);
    assert_eq!(client.state().await, LinkState::Disconnected);
}

#[tokio::test]
async fn test_typed_payloads_over_the_link() {
    use telemetry_protocol::{LocationFix, TelemetryMessage};

    let (addr, mut frames) = spawn_capture_server().await;
    let client = LinkClient::new(test_config(5));
    let mut events = client.subscribe();

    client.connect(endpoint_for(addr)).await.unwrap();
    wait_for_open(&mut events).await;

    let msg = TelemetryMessage::location(LocationFix::new(37.7749, -122.4194).with_direction(0.0));
    client.send(&msg.to_value().unwrap()).await.unwrap();

    let received = timeout(EVENT_TIMEOUT, frames.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("server closed");
    let parsed = TelemetryMessage::from_json(&received).unwrap();
    assert_eq!(parsed.msg_type, telemetry_protocol::TelemetryMessageType::Location);
    assert_eq!(parsed.data.unwrap()["lat"], 37.7749);

    client.disconnect().await;
}
