//! Reconnect delay arithmetic.
//!
//! After `n` consecutive failed reconnect attempts the delay is
//! `min(max, base * factor^n)`; a successful open resets it to `base`.
//! Delays are computed in whole milliseconds from the closed form so repeated
//! growth never accumulates floating point drift.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    factor: f64,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, factor: f64) -> Self {
        let base_ms = base.as_millis() as u64;
        Self {
            base_ms,
            max_ms: (max.as_millis() as u64).max(base_ms),
            factor: if factor.is_finite() { factor.max(1.0) } else { 1.0 },
            failures: 0,
        }
    }

    /// Delay the next scheduled attempt waits for.
    pub fn current(&self) -> Duration {
        self.delay_for(self.failures)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record one failed attempt; returns the new delay.
    pub fn grow(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.current()
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn delay_for(&self, failures: u32) -> Duration {
        let exp = i32::try_from(failures).unwrap_or(i32::MAX);
        let ms = self.base_ms as f64 * self.factor.powi(exp);
        if !ms.is_finite() || ms >= self.max_ms as f64 {
            return Duration::from_millis(self.max_ms);
        }
        Duration::from_millis(ms.round() as u64)
    }
}
