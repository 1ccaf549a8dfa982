//! Client lifecycle against a local axum WebSocket server.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message as AxMessage, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::timeout;

use tether_client::{Client, ClientConfig, ClientEvent, ConnState};
use tether_core::error::TetherError;
use tether_core::protocol::Envelope;

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn greet_and_drop(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket| async move {
        let _ = socket
            .send(AxMessage::Text(
                r#"{"type":"telemetry","data":{"alt":1000}}"#.into(),
            ))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    })
}

async fn echo(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket| async move {
        while let Some(Ok(msg)) = socket.recv().await {
            if let AxMessage::Text(t) = msg {
                let echoed = t.replace("\"type\":\"say\"", "\"type\":\"echo\"");
                if socket.send(AxMessage::Text(echoed)).await.is_err() {
                    break;
                }
            }
        }
    })
}

async fn silent(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket| async move {
        while let Some(Ok(_)) = socket.recv().await {}
    })
}

fn cfg(addr: SocketAddr) -> ClientConfig {
    ClientConfig::new(format!("ws://{addr}/ws"))
        .with_reconnect_delays(Duration::from_millis(50), Duration::from_millis(400))
        .with_backoff_factor(2.0)
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<ClientEvent>, pred: F) -> ClientEvent
where
    F: Fn(&ClientEvent) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(ev) if pred(&ev) => return ev,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn delivers_messages_and_reconnects_after_peer_drop() {
    let addr = serve(Router::new().route("/ws", get(greet_and_drop))).await;
    let client = Client::new(cfg(addr)).unwrap();

    let seen: Arc<Mutex<Vec<Envelope>>> = Arc::default();
    let s = Arc::clone(&seen);
    client.router().on_fn("telemetry", move |_, env| {
        s.lock().unwrap().push(env);
        async { Ok(()) }
    });

    let mut rx = client.events();
    client.connect();

    wait_for(&mut rx, |e| matches!(e, ClientEvent::Open)).await;
    let msg = wait_for(&mut rx, |e| matches!(e, ClientEvent::Message(_))).await;
    assert_eq!(
        msg,
        ClientEvent::Message(Envelope::with_data("telemetry", json!({"alt": 1000})))
    );

    let attempt = wait_for(&mut rx, |e| matches!(e, ClientEvent::ReconnectAttempt { .. })).await;
    assert_eq!(
        attempt,
        ClientEvent::ReconnectAttempt {
            attempt: 1,
            delay: Duration::from_millis(50)
        }
    );
    wait_for(&mut rx, |e| matches!(e, ClientEvent::Reconnected { attempt: 1 })).await;

    assert!(!seen.lock().unwrap().is_empty());
    client.close(None, None).await;
}

#[tokio::test]
async fn send_requires_open_and_stamps_sequence() {
    let addr = serve(Router::new().route("/ws", get(echo))).await;
    let client = Client::new(cfg(addr)).unwrap();

    let err = client.send(Envelope::new("say")).err();
    assert!(matches!(err, Some(TetherError::NotOpen)));

    let mut rx = client.events();
    client.connect();
    wait_for(&mut rx, |e| matches!(e, ClientEvent::Open)).await;

    client
        .send(Envelope::with_data("say", json!({"hello": "world"})))
        .unwrap();
    client.send(Envelope::new("say")).unwrap();

    let first = wait_for(&mut rx, |e| matches!(e, ClientEvent::Message(_))).await;
    let second = wait_for(&mut rx, |e| matches!(e, ClientEvent::Message(_))).await;
    let (ClientEvent::Message(a), ClientEvent::Message(b)) = (first, second) else {
        panic!("expected messages");
    };
    assert_eq!(a.type_str(), "echo");
    assert_eq!(a.sequence, Some(1));
    assert_eq!(a.data, Some(json!({"hello": "world"})));
    assert_eq!(b.sequence, Some(2));

    client.close(Some(1000), Some("done")).await;
    assert_eq!(client.state(), ConnState::ClosedByUser);
    assert!(matches!(
        client.send(Envelope::new("say")).err(),
        Some(TetherError::NotOpen)
    ));
}

#[tokio::test]
async fn silent_peer_is_force_closed_by_the_idle_watchdog() {
    let addr = serve(Router::new().route("/ws", get(silent))).await;
    let client = Client::new(cfg(addr).with_idle_timeout(Some(Duration::from_millis(300)))).unwrap();

    let mut rx = client.events();
    client.connect();
    wait_for(&mut rx, |e| matches!(e, ClientEvent::Open)).await;

    let idle = wait_for(&mut rx, |e| matches!(e, ClientEvent::IdleTimeout { .. })).await;
    let ClientEvent::IdleTimeout { idle_for } = idle else {
        unreachable!()
    };
    assert!(idle_for >= Duration::from_millis(300));

    wait_for(&mut rx, |e| matches!(e, ClientEvent::Close { code: Some(4001), .. })).await;
    wait_for(&mut rx, |e| matches!(e, ClientEvent::ReconnectAttempt { attempt: 1, .. })).await;
    wait_for(&mut rx, |e| matches!(e, ClientEvent::Reconnected { .. })).await;

    client.close(None, None).await;
}

#[tokio::test]
async fn refused_connections_back_off_and_close_stops_retrying() {
    // Reserve then release a port so nothing is listening on it.
    let addr = {
        let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap()
    };
    let client = Client::new(cfg(addr)).unwrap();
    let mut rx = client.events();
    client.connect();

    let mut delays = Vec::new();
    while delays.len() < 4 {
        if let ClientEvent::ReconnectAttempt { delay, .. } =
            wait_for(&mut rx, |e| matches!(e, ClientEvent::ReconnectAttempt { .. })).await
        {
            delays.push(delay.as_millis() as u64);
        }
    }
    assert_eq!(delays, vec![50, 100, 200, 400]);

    client.close(None, None).await;
    assert_eq!(client.state(), ConnState::ClosedByUser);

    let more = timeout(
        Duration::from_millis(600),
        wait_for(&mut rx, |e| matches!(e, ClientEvent::ReconnectAttempt { .. } | ClientEvent::ReconnectFailed { .. })),
    )
    .await;
    assert!(more.is_err(), "no reconnect activity after close");
}
