//! Registry pipeline driven in memory (no sockets).

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use serde_json::{json, Value};
use tokio::sync::mpsc::Receiver;

use tether_core::protocol::{Envelope, EventKind, Frame};
use tether_gateway::config::PeerMode;
use tether_gateway::obs::metrics::GatewayMetrics;
use tether_gateway::policy::UpstreamGate;
use tether_gateway::registry::{Outbound, Peer};
use tether_gateway::{PeerCtx, PeerRegistry, RegistryOptions, StaticTokenValidator, UpstreamLiveness};

fn registry(opts: RegistryOptions) -> PeerRegistry {
    PeerRegistry::new(
        opts,
        Arc::new(UpstreamLiveness::new()),
        Arc::new(GatewayMetrics::default()),
    )
}

fn with_auth() -> RegistryOptions {
    RegistryOptions::default().with_auth(Arc::new(StaticTokenValidator::new(["dev-token"])))
}

async fn feed(reg: &PeerRegistry, peer: &Arc<Peer>, text: &str) {
    reg.handle_frame(peer, Frame::Text(text.to_string())).await;
}

/// Everything queued so far, text frames parsed as JSON.
fn drain(rx: &mut Receiver<Outbound>) -> Vec<Outbound> {
    let mut out = Vec::new();
    while let Ok(o) = rx.try_recv() {
        out.push(o);
    }
    out
}

fn texts(rx: &mut Receiver<Outbound>) -> Vec<Value> {
    drain(rx)
        .into_iter()
        .filter_map(|o| match o {
            Outbound::Text(t) => Some(serde_json::from_str(&t).unwrap()),
            _ => None,
        })
        .collect()
}

fn counter(reg: &PeerRegistry, kind: &str) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    reg.router().on_fn(kind, move |_: PeerCtx, _: Envelope| {
        h.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    });
    hits
}

#[tokio::test]
async fn unauthenticated_envelopes_get_one_error_and_no_dispatch() {
    let reg = registry(with_auth());
    let chats = counter(&reg, "chat");
    let (peer, mut rx) = reg.attach(None, "/ws");

    feed(&reg, &peer, r#"{"type":"chat","data":"hi"}"#).await;
    let replies = texts(&mut rx);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["type"], "error");
    assert_eq!(replies[0]["data"]["message"], "unauthenticated");
    assert_eq!(replies[0]["data"]["code"], "UNAUTHENTICATED");
    assert_eq!(chats.load(Ordering::SeqCst), 0);

    feed(&reg, &peer, r#"{"type":"auth","data":{"token":"dev-token"}}"#).await;
    let replies = texts(&mut rx);
    assert_eq!(replies[0]["type"], "status");
    assert_eq!(replies[0]["data"]["code"], "authenticated");
    assert!(peer.is_authenticated());

    feed(&reg, &peer, r#"{"type":"chat","data":"hi"}"#).await;
    assert_eq!(chats.load(Ordering::SeqCst), 1);
    assert_eq!(
        reg.metrics().error_replies.get(&[("code", "UNAUTHENTICATED")]),
        1
    );
}

#[tokio::test]
async fn failed_auth_replies_then_closes_with_policy_violation() {
    let reg = registry(with_auth());
    let (peer, mut rx) = reg.attach(None, "/ws");

    feed(&reg, &peer, r#"{"type":"auth","data":{"token":"wrong"}}"#).await;
    let out = drain(&mut rx);
    assert_eq!(out.len(), 2);
    let Outbound::Text(err) = &out[0] else {
        panic!("expected error envelope first");
    };
    let err: Value = serde_json::from_str(err).unwrap();
    assert_eq!(err["data"]["code"], "AUTH_FAILED");
    assert_eq!(
        out[1],
        Outbound::Close {
            code: 1008,
            reason: "auth failed".into()
        }
    );
    assert!(peer.is_closed());
    assert_eq!(reg.peer_count(), 0);

    // nothing is processed after the close
    feed(&reg, &peer, r#"{"type":"auth","data":{"token":"dev-token"}}"#).await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn without_auth_policy_peers_start_authenticated() {
    let reg = registry(RegistryOptions::default());
    let chats = counter(&reg, "chat");
    let (peer, mut rx) = reg.attach(None, "/ws");
    assert!(peer.is_authenticated());

    feed(&reg, &peer, r#"{"type":"chat"}"#).await;
    assert_eq!(chats.load(Ordering::SeqCst), 1);
    assert!(texts(&mut rx).is_empty());
}

#[tokio::test]
async fn gated_requests_follow_upstream_status() {
    let opts = RegistryOptions {
        gate: UpstreamGate::new(["command"]),
        ..RegistryOptions::default()
    };
    let reg = registry(opts);
    let commands = counter(&reg, "command");
    let (producer, _prx) = reg.attach(None, "/ws");
    let (operator, mut rx) = reg.attach(None, "/ws");

    feed(&reg, &producer, r#"{"type":"status","data":{"code":"producer_connected","label":"sim"}}"#).await;
    assert!(reg.liveness().is_live());
    feed(&reg, &operator, r#"{"type":"command","data":{"arm":true}}"#).await;
    assert_eq!(commands.load(Ordering::SeqCst), 1);
    assert!(texts(&mut rx).is_empty());

    feed(&reg, &producer, r#"{"type":"status","data":{"code":"producer_disconnected"}}"#).await;
    assert!(!reg.liveness().is_live());
    feed(&reg, &operator, r#"{"type":"command","data":{"arm":true}}"#).await;

    let replies = texts(&mut rx);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["type"], "error");
    assert_eq!(replies[0]["data"]["message"], "upstream not connected");
    assert_eq!(replies[0]["data"]["code"], "UPSTREAM_UNAVAILABLE");
    assert_eq!(commands.load(Ordering::SeqCst), 1, "never forwarded");

    // ungated kinds are unaffected
    let chats = counter(&reg, "chat");
    feed(&reg, &operator, r#"{"type":"chat"}"#).await;
    assert_eq!(chats.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_status_codes_leave_liveness_alone() {
    let reg = registry(RegistryOptions::default());
    let statuses = counter(&reg, "status");
    let (peer, _rx) = reg.attach(None, "/ws");

    feed(&reg, &peer, r#"{"type":"status","data":{"code":"producer_connected"}}"#).await;
    feed(&reg, &peer, r#"{"type":"status","data":{"code":"producer_rebooting"}}"#).await;
    feed(&reg, &peer, r#"{"type":"status","data":"producer_disconnected"}"#).await;
    assert!(reg.liveness().is_live());
    // user handlers still see every status envelope
    assert_eq!(statuses.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn publish_reaches_only_subscribers() {
    let reg = registry(RegistryOptions::default());
    let (a, mut a_rx) = reg.attach(None, "/ws");
    let (_b, mut b_rx) = reg.attach(None, "/ws");

    feed(&reg, &a, r#"{"type":"subscribe","data":{"stream":"telemetry"}}"#).await;
    let ack = texts(&mut a_rx);
    assert_eq!(ack[0]["type"], "status");
    assert_eq!(ack[0]["data"], json!({"code": "subscribed", "stream": "telemetry"}));
    assert!(ack[0]["ts"].is_i64());
    assert_eq!(reg.subscribers("telemetry"), vec![a.id()]);

    assert_eq!(reg.publish("telemetry", json!({"alt": 1000})), 1);
    let got = texts(&mut a_rx);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0]["type"], "telemetry");
    assert_eq!(got[0]["data"], json!({"alt": 1000}));
    assert!(texts(&mut b_rx).is_empty());

    feed(&reg, &a, r#"{"type":"unsubscribe","data":{"stream":"telemetry"}}"#).await;
    assert_eq!(texts(&mut a_rx)[0]["data"]["code"], "unsubscribed");
    assert_eq!(reg.publish("telemetry", json!({"alt": 1001})), 0);
    assert!(texts(&mut a_rx).is_empty());
}

#[tokio::test]
async fn malformed_subscribe_is_a_bad_request() {
    let reg = registry(RegistryOptions::default());
    let (peer, mut rx) = reg.attach(None, "/ws");

    feed(&reg, &peer, r#"{"type":"subscribe","data":{"topic":"telemetry"}}"#).await;
    feed(&reg, &peer, r#"{"type":"subscribe"}"#).await;
    let replies = texts(&mut rx);
    assert_eq!(replies.len(), 2);
    assert!(replies.iter().all(|r| r["data"]["code"] == "BAD_REQUEST"));
    assert!(peer.subscriptions().is_empty());
}

#[tokio::test]
async fn ping_is_answered_unless_auto_pong_is_off() {
    let reg = registry(RegistryOptions::default());
    let (peer, mut rx) = reg.attach(None, "/ws");
    feed(&reg, &peer, r#"{"type":"ping","ts":1700000000000}"#).await;
    assert_eq!(texts(&mut rx), vec![json!({"type": "pong", "ts": 1700000000000i64})]);

    let reg = registry(RegistryOptions {
        auto_pong: false,
        ..RegistryOptions::default()
    });
    let pings = counter(&reg, "ping");
    let (peer, mut rx) = reg.attach(None, "/ws");
    feed(&reg, &peer, r#"{"type":"ping"}"#).await;
    assert!(texts(&mut rx).is_empty());
    assert_eq!(pings.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn close_mid_fan_out_skips_the_closed_peer() {
    let reg = registry(RegistryOptions::default());
    let (a, mut a_rx) = reg.attach(None, "/ws");
    let (_b, mut b_rx) = reg.attach(None, "/ws");

    assert!(reg.close(a.id(), 1000, "bye"));
    assert!(!reg.close(a.id(), 1000, "bye"));
    assert_eq!(reg.broadcast(&Envelope::new("tick")), 1);
    assert!(!reg.send_to(a.id(), &Envelope::new("tick")));
    assert!(!reg.send_to(9999, &Envelope::new("tick")));

    assert_eq!(
        drain(&mut a_rx),
        vec![Outbound::Close {
            code: 1000,
            reason: "bye".into()
        }]
    );
    assert_eq!(texts(&mut b_rx), vec![json!({"type": "tick"})]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_close_and_broadcast_never_fail() {
    let reg = registry(RegistryOptions::default());
    let mut peers = Vec::new();
    for _ in 0..32 {
        peers.push(reg.attach(None, "/ws"));
    }

    let closer = {
        let reg = reg.clone();
        let ids: Vec<u64> = peers.iter().map(|(p, _)| p.id()).collect();
        tokio::spawn(async move {
            for id in ids {
                reg.close(id, 1001, "going away");
                tokio::task::yield_now().await;
            }
        })
    };
    for i in 0..200 {
        reg.broadcast(&Envelope::with_data("tick", json!(i)));
        tokio::task::yield_now().await;
    }
    closer.await.unwrap();

    assert_eq!(reg.peer_count(), 0);
    assert_eq!(reg.broadcast(&Envelope::new("tick")), 0);
    for (peer, _) in &peers {
        assert!(peer.is_closed());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn publish_under_subscription_churn_reaches_exactly_the_steady_subscriber() {
    let reg = registry(RegistryOptions::default());
    let (steady, mut steady_rx) = reg.attach(None, "/ws");
    let (_idle, mut idle_rx) = reg.attach(None, "/ws");
    feed(&reg, &steady, r#"{"type":"subscribe","data":{"stream":"telemetry"}}"#).await;
    assert_eq!(texts(&mut steady_rx)[0]["data"]["code"], "subscribed");

    let stop = Arc::new(AtomicBool::new(false));
    let mut churners = Vec::new();
    for _ in 0..6 {
        let reg = reg.clone();
        let stop = Arc::clone(&stop);
        churners.push(tokio::spawn(async move {
            let (peer, mut rx) = reg.attach(None, "/ws");
            while !stop.load(Ordering::SeqCst) {
                feed(&reg, &peer, r#"{"type":"subscribe","data":{"stream":"telemetry"}}"#).await;
                tokio::task::yield_now().await;
                feed(&reg, &peer, r#"{"type":"unsubscribe","data":{"stream":"telemetry"}}"#).await;
                while rx.try_recv().is_ok() {}
            }
        }));
    }

    for i in 0..300 {
        assert!(reg.publish("telemetry", json!({"n": i})) >= 1);
        tokio::task::yield_now().await;
    }
    stop.store(true, Ordering::SeqCst);
    for c in churners {
        c.await.unwrap();
    }

    let got = texts(&mut steady_rx);
    let seen: Vec<i64> = got
        .iter()
        .map(|v| {
            assert_eq!(v["type"], "telemetry");
            v["data"]["n"].as_i64().unwrap()
        })
        .collect();
    assert_eq!(seen, (0..300).collect::<Vec<i64>>());
    assert!(texts(&mut idle_rx).is_empty());
    assert_eq!(reg.subscribers("telemetry"), vec![steady.id()]);
}

#[test]
fn single_peer_mode_holds_under_concurrent_attach() {
    let reg = registry(RegistryOptions {
        peer_mode: PeerMode::Single,
        ..RegistryOptions::default()
    });

    for _ in 0..500 {
        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reg = reg.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    reg.attach(None, "/ws")
                })
            })
            .collect();
        let attached: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(reg.peer_count(), 1);
        let open: Vec<_> = attached.iter().filter(|(p, _)| !p.is_closed()).collect();
        assert_eq!(open.len(), 1);
        assert_eq!(reg.peer_ids(), vec![open[0].0.id()]);
    }
}

#[tokio::test]
async fn single_peer_mode_supersedes_the_previous_peer() {
    let reg = registry(RegistryOptions {
        peer_mode: PeerMode::Single,
        ..RegistryOptions::default()
    });
    let (first, mut first_rx) = reg.attach(None, "/ws");
    let (second, _second_rx) = reg.attach(None, "/ws");

    assert!(first.is_closed());
    assert!(!second.is_closed());
    assert_eq!(reg.peer_ids(), vec![second.id()]);
    assert_eq!(
        drain(&mut first_rx),
        vec![Outbound::Close {
            code: 4000,
            reason: "superseded".into()
        }]
    );
}

#[tokio::test]
async fn handler_context_and_fault_isolation() {
    let reg = registry(RegistryOptions::default());
    reg.router().on_fn("echo", |_: PeerCtx, _: Envelope| async {
        if true {
            panic!("boom");
        }
        Ok(())
    });
    reg.router().on_fn("echo", |ctx: PeerCtx, env: Envelope| async move {
        ctx.subscribe("echoes");
        ctx.send(&Envelope {
            kind: EventKind::from("echoed"),
            ..env
        })
    });
    let (peer, mut rx) = reg.attach(None, "/ws");

    feed(&reg, &peer, r#"{"type":"echo","data":{"n":1}}"#).await;
    assert_eq!(texts(&mut rx), vec![json!({"type": "echoed", "data": {"n": 1}})]);
    assert!(peer.is_subscribed("echoes"));
    assert_eq!(
        reg.metrics()
            .handler_failures
            .get(&[("kind", "echo"), ("panicked", "true")]),
        1
    );
    assert!(!peer.is_closed());
}

#[tokio::test]
async fn unrouted_and_malformed_frames_degrade_gracefully() {
    let reg = registry(RegistryOptions::default());
    let seen: Arc<Mutex<Vec<Envelope>>> = Arc::default();
    for kind in ["unhandled", "raw"] {
        let s = Arc::clone(&seen);
        reg.router().on_fn(kind, move |_: PeerCtx, env: Envelope| {
            s.lock().unwrap().push(env);
            async { Ok(()) }
        });
    }
    let (peer, _rx) = reg.attach(None, "/ws");

    feed(&reg, &peer, r#"{"type":"mystery","data":[1,2]}"#).await;
    feed(&reg, &peer, "not json at all").await;
    reg.handle_frame(&peer, Frame::Binary(bytes::Bytes::from_static(&[0xff, 0xfe])))
        .await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].kind, EventKind::Unhandled);
    assert_eq!(seen[0].data, Some(json!({"type": "mystery", "data": [1, 2]})));
    assert_eq!(seen[1].kind, EventKind::Raw);
    assert_eq!(seen[1].data, Some(json!("not json at all")));
    assert_eq!(seen[2].kind, EventKind::Raw);
    assert!(!peer.is_closed());
}
