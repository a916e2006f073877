//! Rolling end-to-end latency samples
//!
//! Each sample is `receive_time - capture_timestamp` for one frame, in
//! milliseconds. The orchestrator is the only writer; monitoring readers go
//! through [`SharedLatency`] and summarize from a snapshot.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Number of samples retained
pub const LATENCY_CAPACITY: usize = 100;

/// Summary statistics over the retained samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub count: usize,
}

/// Fixed-capacity FIFO of latency samples
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::with_capacity(LATENCY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest once over capacity
    pub fn record(&mut self, value: f64) {
        self.samples.push_back(value);
        if self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Retained samples, oldest first
    pub fn samples(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Statistics over a sorted snapshot; all zero when empty
    pub fn summarize(&self) -> LatencySummary {
        summarize_samples(self.samples())
    }
}

/// Statistics over an unordered batch of samples
///
/// Quantile `q` is the sorted element at index `floor(n * q)`.
pub fn summarize_samples(mut samples: Vec<f64>) -> LatencySummary {
    let count = samples.len();
    if count == 0 {
        return LatencySummary::default();
    }

    samples.sort_by(|a, b| a.total_cmp(b));
    let quantile = |q: f64| samples[((count as f64 * q).floor() as usize).min(count - 1)];

    LatencySummary {
        min: samples[0],
        max: samples[count - 1],
        avg: samples.iter().sum::<f64>() / count as f64,
        p50: quantile(0.5),
        p95: quantile(0.95),
        count,
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency tracker shared with monitoring readers
///
/// Writers and readers hold the lock only for a single append or a snapshot.
pub type SharedLatency = Arc<Mutex<LatencyTracker>>;

/// Summarize a shared tracker; a poisoned lock still yields its data
///
/// Only the copy happens under the lock; sorting runs after it is released.
pub fn summarize_shared(tracker: &SharedLatency) -> LatencySummary {
    let snapshot = match tracker.lock() {
        Ok(guard) => guard.samples(),
        Err(poisoned) => poisoned.into_inner().samples(),
    };
    summarize_samples(snapshot)
}
