//! Processing throughput telemetry and consumer-facing display fields

use kazoo_common::time::Clock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

/// Processing durations kept for the rolling average
const PROCESSING_WINDOW: usize = 60;

/// Window for the frames-per-second count
const FPS_WINDOW_MS: f64 = 1000.0;

/// Snapshot of processing telemetry
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProcessingStats {
    pub avg_processing_ms: f64,
    pub fps: usize,
    pub buffer_duration_ms: f64,
    /// Buffer duration plus average processing time
    pub total_latency_ms: f64,
    pub frames_processed: u64,
}

/// Brackets per-frame processing to measure cost and throughput
pub struct ProcessingMonitor {
    clock: Arc<dyn Clock>,
    started_at: Option<f64>,
    durations: VecDeque<f64>,
    completions: VecDeque<f64>,
    buffer_duration_ms: f64,
    frames_processed: u64,
}

impl ProcessingMonitor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            started_at: None,
            durations: VecDeque::with_capacity(PROCESSING_WINDOW + 1),
            completions: VecDeque::new(),
            buffer_duration_ms: 0.0,
            frames_processed: 0,
        }
    }

    /// Set the negotiated buffer and clear previous session data
    pub fn configure(&mut self, buffer_size: u32, sample_rate: u32) {
        self.buffer_duration_ms = if sample_rate > 0 {
            buffer_size as f64 / sample_rate as f64 * 1000.0
        } else {
            0.0
        };
        self.started_at = None;
        self.durations.clear();
        self.completions.clear();
        self.frames_processed = 0;
    }

    pub fn start_processing(&mut self) {
        self.started_at = Some(self.clock.now_ms());
    }

    pub fn end_processing(&mut self) {
        let now = self.clock.now_ms();
        let Some(started) = self.started_at.take() else {
            return;
        };

        self.durations.push_back((now - started).max(0.0));
        if self.durations.len() > PROCESSING_WINDOW {
            self.durations.pop_front();
        }

        self.completions.push_back(now);
        while let Some(oldest) = self.completions.front() {
            if now - oldest > FPS_WINDOW_MS {
                self.completions.pop_front();
            } else {
                break;
            }
        }
        self.frames_processed += 1;
    }

    pub fn stats(&self) -> ProcessingStats {
        let avg_processing_ms = if self.durations.is_empty() {
            0.0
        } else {
            self.durations.iter().sum::<f64>() / self.durations.len() as f64
        };
        ProcessingStats {
            avg_processing_ms,
            fps: self.completions.len(),
            buffer_duration_ms: self.buffer_duration_ms,
            total_latency_ms: self.buffer_duration_ms + avg_processing_ms,
            frames_processed: self.frames_processed,
        }
    }
}

/// Per-frame fields shown to the user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayFields {
    /// Note and octave, e.g. "A3", or "--"
    pub note_label: String,
    /// e.g. "220.0 Hz", or "-- Hz"
    pub frequency_text: String,
    pub confidence_percent: u8,
    /// Most recent end-to-end latency, if measured
    pub latency_ms: Option<f64>,
    /// e.g. "Running (Continuous)" or "Stopped"
    pub status_text: String,
}

impl DisplayFields {
    pub fn stopped() -> Self {
        Self::with_status("Stopped".to_string())
    }

    pub fn with_status(status_text: String) -> Self {
        Self {
            note_label: "--".to_string(),
            frequency_text: "-- Hz".to_string(),
            confidence_percent: 0,
            latency_ms: None,
            status_text,
        }
    }
}

impl Default for DisplayFields {
    fn default() -> Self {
        Self::stopped()
    }
}
