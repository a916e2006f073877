//! Expressive feature extraction
//!
//! Turns a bare pitch estimate plus its sample block into a canonical frame
//! with smoothed level, brightness, breathiness and articulation phase.

use super::{ExtractionInput, FeatureExtractor, SILENCE_DB};
use crate::error::ExtractionError;
use kazoo_common::config::{OnsetConfig, SmoothingConfig};
use kazoo_common::{Articulation, Expression, PitchFrame};

/// Zero-crossing frequency treated as fully bright for unpitched input
const UNVOICED_BRIGHT_HZ: f32 = 4000.0;

/// Built-in feature extractor
pub struct ExpressionExtractor {
    smoothing: SmoothingConfig,
    onset: OnsetConfig,
    sample_rate: u32,
    smoothed_db: Option<f32>,
    brightness: Option<f32>,
    previous_db: f32,
    articulation: Articulation,
    /// Timestamp the current phase began (attack start or release start)
    phase_started: f64,
}

impl ExpressionExtractor {
    pub fn new(smoothing: SmoothingConfig, onset: OnsetConfig) -> Self {
        Self {
            smoothing,
            onset,
            sample_rate: 44100,
            smoothed_db: None,
            brightness: None,
            previous_db: SILENCE_DB,
            articulation: Articulation::Silence,
            phase_started: 0.0,
        }
    }

    pub fn articulation(&self) -> Articulation {
        self.articulation
    }

    fn smooth(previous: Option<f32>, value: f32, alpha: f32) -> f32 {
        match previous {
            Some(prev) => prev + alpha * (value - prev),
            None => value,
        }
    }

    /// Brightness from the zero-crossing rate relative to the fundamental
    fn raw_brightness(&self, samples: &[f32], frequency: f32) -> f32 {
        let crossings = samples
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count();
        let crossing_hz = crossings as f32 * self.sample_rate as f32 / (2.0 * samples.len() as f32);

        if frequency > 0.0 {
            // A pure tone crosses twice per period; overtones add crossings
            ((crossing_hz / frequency - 1.0) / 3.0).clamp(0.0, 1.0)
        } else {
            (crossing_hz / UNVOICED_BRIGHT_HZ).clamp(0.0, 1.0)
        }
    }

    fn advance_articulation(&mut self, level_db: f32, timestamp: f64) {
        let silence = self.onset.silence_threshold_db;
        let rise = level_db - self.previous_db;
        let audible = level_db >= silence;
        let onset = audible
            && (rise >= self.onset.energy_threshold_db
                || level_db >= silence + self.onset.energy_threshold_db);

        let next = match self.articulation {
            Articulation::Silence if onset => Some(Articulation::Attack),
            Articulation::Attack if !audible => Some(Articulation::Release),
            Articulation::Attack
                if timestamp - self.phase_started >= self.onset.attack_duration_ms =>
            {
                Some(Articulation::Sustain)
            }
            Articulation::Sustain if !audible => Some(Articulation::Release),
            Articulation::Sustain if rise >= self.onset.energy_threshold_db => {
                Some(Articulation::Attack)
            }
            Articulation::Release if onset => Some(Articulation::Attack),
            Articulation::Release
                if !audible
                    && timestamp - self.phase_started >= self.onset.min_silence_duration_ms =>
            {
                Some(Articulation::Silence)
            }
            _ => None,
        };

        if let Some(phase) = next {
            self.articulation = phase;
            self.phase_started = timestamp;
        }
        self.previous_db = level_db;
    }
}

impl FeatureExtractor for ExpressionExtractor {
    fn process(&mut self, input: ExtractionInput<'_>) -> Result<PitchFrame, ExtractionError> {
        if input.samples.is_empty() {
            return Err(ExtractionError("empty sample block".to_string()));
        }
        if input.samples.iter().any(|s| !s.is_finite()) {
            return Err(ExtractionError("non-finite sample in block".to_string()));
        }

        let estimate = input.estimate;
        self.advance_articulation(estimate.volume_db, input.timestamp);

        let level = Self::smooth(self.smoothed_db, estimate.volume_db, self.smoothing.volume_alpha);
        self.smoothed_db = Some(level);

        let raw_brightness = self.raw_brightness(input.samples, estimate.frequency);
        let brightness =
            Self::smooth(self.brightness, raw_brightness, self.smoothing.brightness_alpha);
        self.brightness = Some(brightness);

        let expression = Expression {
            brightness,
            breathiness: (1.0 - estimate.confidence).clamp(0.0, 1.0),
            articulation: self.articulation,
        };

        let mut frame = PitchFrame::from_estimate(estimate, input.timestamp).with_expression(expression);
        frame.volume_db = level;
        Ok(frame)
    }

    fn prepare(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
        self.smoothed_db = None;
        self.brightness = None;
        self.previous_db = SILENCE_DB;
        self.articulation = Articulation::Silence;
        self.phase_started = 0.0;
    }
}
