//! Observability (metrics).

pub mod metrics;
