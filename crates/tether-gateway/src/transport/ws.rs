//! WebSocket endpoint.
//!
//! Responsibilities:
//! - Upgrade HTTP -> WS (refused with 503 while draining)
//! - Attach the peer to the registry; its outbound queue feeds a writer task
//! - Lifecycle: server ping + idle cut-off
//! - Feed inbound frames to the registry pipeline, one at a time

use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::Instrument;

use tether_core::protocol::control::{CLOSE_IDLE, CLOSE_NORMAL};

use crate::app_state::AppState;
use crate::registry::Outbound;
use crate::transport::codec::{self, Inbound};

/// How long the writer may take to flush the close frame.
const WRITER_GRACE: Duration = Duration::from_secs(1);
/// Upper bound of the idle check period.
const IDLE_CHECK_MAX: Duration = Duration::from_millis(250);

pub async fn ws_upgrade(
    State(app): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
) -> Response {
    if app.is_draining() {
        return (StatusCode::SERVICE_UNAVAILABLE, "draining").into_response();
    }
    let remote = connect.map(|ConnectInfo(addr)| addr);
    let max = app.cfg().gateway.max_frame_bytes;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| run_session(app, socket, remote))
}

async fn run_session(app: AppState, socket: WebSocket, remote: Option<SocketAddr>) {
    let registry = app.registry();
    let gw = &app.cfg().gateway;
    let (peer, out_rx) = registry.attach(remote, &gw.path);
    let span = tracing::info_span!("peer", id = peer.id(), remote = ?remote);

    async move {
        tracing::info!("peer connected");
        let (ws_tx, mut ws_rx) = socket.split();
        let writer = tokio::spawn(write_loop(ws_tx, out_rx).in_current_span());

        let ping_every = gw.ping_interval();
        let idle_timeout = gw.idle_timeout();
        let mut ping_tick = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
        ping_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut idle_check = tokio::time::interval(IDLE_CHECK_MAX.min(idle_timeout / 2));
        idle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_activity = Instant::now();

        loop {
            tokio::select! {
                // closed by the registry (auth failure, eviction, idle, shutdown)
                _ = peer.closed() => break,

                incoming = ws_rx.next() => {
                    let Some(Ok(msg)) = incoming else { break; };
                    last_activity = Instant::now();
                    match codec::inbound(msg) {
                        Inbound::Frame(frame) => registry.handle_frame(&peer, frame).await,
                        // axum answers pings itself
                        Inbound::Ping | Inbound::Pong => {}
                        Inbound::Close => break,
                    }
                }

                _ = ping_tick.tick() => {
                    let _ = peer.enqueue(Outbound::Ping);
                }

                _ = idle_check.tick() => {
                    if last_activity.elapsed() >= idle_timeout {
                        tracing::info!(idle_ms = idle_timeout.as_millis() as u64, "idle timeout");
                        registry.close(peer.id(), CLOSE_IDLE, "idle timeout");
                    }
                }
            }
        }

        // No-op if the registry already closed it.
        registry.close(peer.id(), CLOSE_NORMAL, "bye");

        let abort = writer.abort_handle();
        if tokio::time::timeout(WRITER_GRACE, writer).await.is_err() {
            abort.abort();
        }
        tracing::info!("peer disconnected");
    }
    .instrument(span)
    .await
}

async fn write_loop(mut ws_tx: SplitSink<WebSocket, Message>, mut out_rx: mpsc::Receiver<Outbound>) {
    while let Some(out) = out_rx.recv().await {
        let (msg, last) = codec::outbound(out);
        if ws_tx.send(msg).await.is_err() {
            return;
        }
        if last {
            break;
        }
    }
    let _ = ws_tx.close().await;
}
