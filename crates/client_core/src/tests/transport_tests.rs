use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use serde_json::json;
use tokio::{
    net::TcpListener,
    sync::mpsc,
    time::{sleep, timeout},
};

use crate::transport::{websocket_url, PushChannel, PushTransport};
use shared::domain::{RideId, RideStatus};

#[derive(Clone)]
struct WsStubState {
    connections: Arc<AtomicUsize>,
    frames: mpsc::UnboundedSender<String>,
    close_first_connection: bool,
}

async fn ws_handler(State(state): State<WsStubState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

/// Answers every subscribe frame with one ride snapshot; the first connection
/// can be closed right after, to exercise the reconnect path.
async fn handle_socket(state: WsStubState, mut socket: WebSocket) {
    let connection = state.connections.fetch_add(1, Ordering::SeqCst);
    while let Some(Ok(message)) = socket.recv().await {
        let WsMessage::Text(text) = message else {
            continue;
        };
        let _ = state.frames.send(text.clone());
        if text.contains("\"type\":\"subscribe\"") {
            let status = if connection == 0 { "REQUESTED" } else { "ACCEPTED" };
            let frame = json!({
                "topic": "ride/42",
                "payload": { "id": 42, "status": status }
            });
            if socket
                .send(WsMessage::Text(frame.to_string()))
                .await
                .is_err()
            {
                break;
            }
            if state.close_first_connection && connection == 0 {
                break;
            }
        }
    }
}

async fn spawn_push_stub(
    close_first_connection: bool,
) -> (String, WsStubState, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let state = WsStubState {
        connections: Arc::new(AtomicUsize::new(0)),
        frames: frames_tx,
        close_first_connection,
    };
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state, frames_rx)
}

#[tokio::test]
async fn early_subscription_is_queued_and_sent_exactly_once() {
    let (server_url, state, mut frames) = spawn_push_stub(false).await;
    let transport = PushTransport::connect(
        websocket_url(&server_url).expect("url"),
        Duration::from_millis(100),
    );

    // subscribe right away; the manager task may not have connected yet
    let mut subscription = transport.subscribe(RideId(42)).await.expect("subscribe");
    assert_eq!(subscription.topic(), "ride/42");

    let update = timeout(Duration::from_secs(5), subscription.next_update())
        .await
        .expect("update in time")
        .expect("stream open");
    assert_eq!(update.id, RideId(42));
    assert_eq!(update.status, RideStatus::Requested);

    let first = timeout(Duration::from_secs(5), frames.recv())
        .await
        .expect("frame in time")
        .expect("server alive");
    assert!(first.contains("\"type\":\"subscribe\""));
    assert!(first.contains("ride/42"));

    sleep(Duration::from_millis(200)).await;
    assert!(frames.try_recv().is_err());
    assert_eq!(state.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dropping_the_subscription_unsubscribes_the_topic() {
    let (server_url, _state, mut frames) = spawn_push_stub(false).await;
    let transport = PushTransport::connect(
        websocket_url(&server_url).expect("url"),
        Duration::from_millis(100),
    );

    let mut subscription = transport.subscribe(RideId(42)).await.expect("subscribe");
    timeout(Duration::from_secs(5), subscription.next_update())
        .await
        .expect("update in time")
        .expect("stream open");
    drop(subscription);

    let subscribe_frame = timeout(Duration::from_secs(5), frames.recv())
        .await
        .expect("frame in time")
        .expect("server alive");
    assert!(subscribe_frame.contains("\"type\":\"subscribe\""));

    let unsubscribe_frame = timeout(Duration::from_secs(5), frames.recv())
        .await
        .expect("frame in time")
        .expect("server alive");
    assert!(unsubscribe_frame.contains("\"type\":\"unsubscribe\""));
    assert!(unsubscribe_frame.contains("ride/42"));
}

#[tokio::test]
async fn reconnect_replays_the_subscription_once_per_connection() {
    let (server_url, state, mut frames) = spawn_push_stub(true).await;
    let transport = PushTransport::connect(
        websocket_url(&server_url).expect("url"),
        Duration::from_millis(100),
    );

    let mut subscription = transport.subscribe(RideId(42)).await.expect("subscribe");
    let first = timeout(Duration::from_secs(5), subscription.next_update())
        .await
        .expect("update in time")
        .expect("stream open");
    assert_eq!(first.status, RideStatus::Requested);

    // the stub drops the first connection after that update; the transport
    // reconnects and replays the subscription on the fresh socket
    let second = timeout(Duration::from_secs(5), subscription.next_update())
        .await
        .expect("update in time")
        .expect("stream open");
    assert_eq!(second.status, RideStatus::Accepted);
    assert_eq!(state.connections.load(Ordering::SeqCst), 2);

    sleep(Duration::from_millis(100)).await;
    let mut subscribe_frames = 0;
    while let Ok(frame) = frames.try_recv() {
        if frame.contains("\"type\":\"subscribe\"") {
            subscribe_frames += 1;
        }
    }
    assert_eq!(subscribe_frames, 2);
}
