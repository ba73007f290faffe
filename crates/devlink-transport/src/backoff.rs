//! Exponential backoff shared by the MQTT session reconnect loop
//! (spec.md §4.2) and the device reconnect loop (spec.md §4.6).
//!
//! Base 10s, multiplier 1.5, cap 30 min, per spec.md §5.

use std::time::Duration;

pub const DEFAULT_BASE: Duration = Duration::from_secs(10);
pub const DEFAULT_MULTIPLIER: f64 = 1.5;
pub const DEFAULT_CAP: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    multiplier: f64,
    cap: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE, DEFAULT_MULTIPLIER, DEFAULT_CAP)
    }
}

impl Backoff {
    pub fn new(base: Duration, multiplier: f64, cap: Duration) -> Self {
        Self {
            base,
            multiplier,
            cap,
            current: base,
        }
    }

    /// Returns the delay to sleep before the next retry, then advances the
    /// internal state for the one after that.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let scaled = self.current.mul_f64(self.multiplier);
        self.current = scaled.min(self.cap);
        delay
    }

    /// Reset to the base delay after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic_and_capped() {
        let mut backoff = Backoff::default();
        let mut prev = Duration::ZERO;
        for _ in 0..40 {
            let d = backoff.next_delay();
            assert!(d >= prev);
            assert!(d <= DEFAULT_CAP);
            prev = d;
        }
        assert_eq!(prev, DEFAULT_CAP);
    }

    #[test]
    fn starts_at_base() {
        let mut backoff = Backoff::default();
        assert_eq!(backoff.next_delay(), DEFAULT_BASE);
    }

    #[test]
    fn reset_returns_to_base() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), DEFAULT_BASE);
    }
}
