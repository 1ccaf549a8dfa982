//! Gateway metrics in Prometheus text format.
//!
//! Counters and gauges carry dynamic labels backed by `DashMap`; label sets
//! are sorted so each series has one deterministic key.

use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;

type LabelKey = Vec<(String, String)>;

fn label_key(labels: &[(&str, &str)]) -> LabelKey {
    let mut key: LabelKey = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    key.sort();
    key
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn series(name: &str, key: &LabelKey) -> String {
    if key.is_empty() {
        return name.to_string();
    }
    let labels = key
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label(v)))
        .collect::<Vec<_>>()
        .join(",");
    format!("{name}{{{labels}}}")
}

#[derive(Default)]
pub struct CounterVec {
    map: DashMap<LabelKey, AtomicU64>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: u64) {
        self.map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(v, Ordering::Relaxed);
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {name} counter");
        for r in self.map.iter() {
            let _ = writeln!(out, "{} {}", series(name, r.key()), r.value().load(Ordering::Relaxed));
        }
    }
}

#[derive(Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }
    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }
    pub fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {name} gauge\n{name} {}", self.get());
    }
}

#[derive(Default)]
pub struct GatewayMetrics {
    pub peers_accepted: CounterVec,
    pub peers_active: Gauge,
    pub frames_in: CounterVec,
    /// Error envelopes sent to peers, by client code.
    pub error_replies: CounterVec,
    pub handler_failures: CounterVec,
    pub publish_delivered: CounterVec,
    /// Sends dropped on a full or closed peer queue.
    pub publish_dropped: CounterVec,
    pub upstream_live: Gauge,
    draining: AtomicBool,
}

impl GatewayMetrics {
    pub fn set_draining(&self) {
        self.draining.store(true, Ordering::Relaxed);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Relaxed)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.peers_accepted.render("tether_peers_accepted_total", &mut out);
        self.peers_active.render("tether_peers_active", &mut out);
        self.frames_in.render("tether_frames_in_total", &mut out);
        self.error_replies.render("tether_error_replies_total", &mut out);
        self.handler_failures.render("tether_handler_failures_total", &mut out);
        self.publish_delivered.render("tether_publish_delivered_total", &mut out);
        self.publish_dropped.render("tether_publish_dropped_total", &mut out);
        self.upstream_live.render("tether_upstream_live", &mut out);
        let _ = writeln!(
            out,
            "# TYPE tether_draining gauge\ntether_draining {}",
            u8::from(self.is_draining())
        );
        out
    }
}
