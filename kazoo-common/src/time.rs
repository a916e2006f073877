//! Monotonic clock used for capture timestamps and latency measurement
//!
//! Capture backends stamp frames with the same clock the orchestrator reads
//! on receipt, so `receive - capture` is a meaningful end-to-end delay.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of monotonic time in milliseconds
pub trait Clock: Send + Sync {
    /// Milliseconds elapsed since the clock's origin
    fn now_ms(&self) -> f64;
}

/// Clock backed by `Instant`, origin at construction
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Shared handle suitable for injection into backends and the orchestrator
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self::new())
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Manually advanced clock for deterministic tests and offline replay
///
/// Stores microseconds so fractional milliseconds survive.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        Self {
            now_us: AtomicU64::new(ms_to_us(start_ms)),
        }
    }

    /// Jump to an absolute time
    pub fn set_ms(&self, ms: f64) {
        self.now_us.store(ms_to_us(ms), Ordering::SeqCst);
    }

    /// Move forward by `ms`
    pub fn advance_ms(&self, ms: f64) {
        self.now_us.fetch_add(ms_to_us(ms), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now_us.load(Ordering::SeqCst) as f64 / 1000.0
    }
}

fn ms_to_us(ms: f64) -> u64 {
    (ms.max(0.0) * 1000.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let t1 = clock.now_ms();
        std::thread::sleep(Duration::from_millis(5));
        let t2 = clock.now_ms();
        assert!(t2 > t1);
    }

    #[test]
    fn test_manual_clock_set_and_advance() {
        let clock = ManualClock::new(1000.0);
        assert_eq!(clock.now_ms(), 1000.0);

        clock.advance_ms(12.0);
        assert_eq!(clock.now_ms(), 1012.0);

        clock.set_ms(5.5);
        assert_eq!(clock.now_ms(), 5.5);
    }

    #[test]
    fn test_manual_clock_clamps_negative() {
        let clock = ManualClock::new(-3.0);
        assert_eq!(clock.now_ms(), 0.0);
    }
}
