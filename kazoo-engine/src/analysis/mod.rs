//! Pitch estimation and expressive feature extraction
//!
//! The orchestrator drives these on the buffered path; the cpal capture
//! backend drives them on its audio thread in real-time mode.

pub mod features;
pub mod yin;

pub use features::ExpressionExtractor;
pub use yin::YinEstimator;

use crate::error::ExtractionError;
use kazoo_common::{PitchEstimate, PitchFrame};

/// Floor used for the level of digital silence
pub const SILENCE_DB: f32 = -100.0;

/// Root-mean-square level of a block of samples
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Linear RMS level in dBFS, floored at `SILENCE_DB`
pub fn volume_db(rms: f32) -> f32 {
    if rms <= 0.0 || !rms.is_finite() {
        return SILENCE_DB;
    }
    (20.0 * rms.log10()).max(SILENCE_DB)
}

/// Frequency/confidence estimation over a raw sample window
pub trait PitchEstimator: Send {
    /// Prepare for a stream at `sample_rate`
    fn initialize(&mut self, sample_rate: u32);

    /// Estimate pitch for one block
    ///
    /// `volume` is the block's RMS level. `None` means the block could not be
    /// analyzed at all (too short, not initialized); quiet or unpitched input
    /// yields an unvoiced estimate instead.
    fn detect(&mut self, samples: &[f32], volume: f32) -> Option<PitchEstimate>;

    /// Number of samples the estimator wants per analysis window
    fn window_size(&self) -> usize {
        2048
    }
}

/// Input to one feature extraction step
#[derive(Debug, Clone, Copy)]
pub struct ExtractionInput<'a> {
    pub estimate: &'a PitchEstimate,
    pub samples: &'a [f32],
    /// Capture timestamp in milliseconds
    pub timestamp: f64,
}

/// Augments a bare estimate with expressive descriptors
pub trait FeatureExtractor: Send {
    fn process(&mut self, input: ExtractionInput<'_>) -> Result<PitchFrame, ExtractionError>;

    /// Forget smoothing and articulation state before a session at `sample_rate`
    fn prepare(&mut self, _sample_rate: u32) {}
}
