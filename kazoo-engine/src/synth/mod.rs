//! Synthesis engines
//!
//! Two variants exist and exactly one receives frames at a time:
//! - **Continuous** ([`ContinuousSynth`]): follows pitch and expression
//!   continuously, with auto-tune, scale, retune speed and reverb controls
//! - **Legacy** ([`SynthesisEngine`]): discrete note on/off
//!
//! Engines are constructed by the caller and handed to the orchestrator,
//! which owns them for the session's duration.

pub mod continuous;
pub mod note;
pub mod output;
pub mod scale;

pub use continuous::ContinuousToneEngine;
pub use kazoo_common::events::EngineMode;
pub use note::NoteToneEngine;
pub use scale::{Scale, ScaleKind};

use crate::error::SynthError;
use async_trait::async_trait;
use kazoo_common::events::CaptureMode;
use kazoo_common::{PitchEstimate, PitchFrame};
use serde::{Deserialize, Serialize};

/// Negotiated session parameters an engine initializes against
#[derive(Debug, Clone, PartialEq)]
pub struct EngineContext {
    pub capture_mode: CaptureMode,
    pub sample_rate: u32,
    pub buffer_size: u32,
    pub instrument: String,
    pub output_device: Option<String>,
    pub volume: f32,
}

/// Auto-tune parameter set of the continuous engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoTuneSettings {
    pub enabled: bool,
    pub scale: Scale,
    /// Correction strength, 0.0-1.0
    pub strength: f32,
    /// Retune speed, 0.0 (instant) to 1.0 (slow)
    pub speed: f32,
}

impl AutoTuneSettings {
    /// Strength actually applied: `strength` when enabled, else 0
    pub fn effective_strength(&self) -> f32 {
        if self.enabled {
            self.strength.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

impl Default for AutoTuneSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            scale: Scale::default(),
            strength: 0.5,
            speed: 0.1,
        }
    }
}

/// A synthesis engine variant
#[async_trait]
pub trait SynthesisEngine: Send {
    /// Acquire output resources for a session
    async fn initialize(&mut self, context: &EngineContext) -> Result<(), SynthError>;

    fn is_initialized(&self) -> bool;

    /// Whether `process_frame` is supported; otherwise frames arrive as estimates
    fn supports_frames(&self) -> bool {
        true
    }

    fn process_frame(&mut self, frame: &PitchFrame);

    /// Bare-estimate entry point for engines without frame support
    fn process_estimate(&mut self, estimate: &PitchEstimate);

    /// Stop sounding (voice release or note off, depending on the variant)
    fn stop(&mut self);

    fn change_instrument(&mut self, instrument: &str);

    /// Move the sound to another output device (None = system default)
    ///
    /// An open output is reopened on the new device at once; otherwise the
    /// device is used by the next `initialize`.
    async fn set_output_device(&mut self, device: Option<&str>) -> Result<(), SynthError>;

    /// Release output resources
    fn shutdown(&mut self) {}
}

/// The continuous engine variant and its real-time parameters
pub trait ContinuousSynth: SynthesisEngine {
    fn set_auto_tune(&mut self, settings: &AutoTuneSettings);

    fn set_scale(&mut self, scale: Scale);

    fn set_retune_speed(&mut self, speed: f32);

    fn set_reverb_wet(&mut self, wet: f32);
}

/// Both engine variants, selected by [`EngineMode`]
pub struct SynthEngines {
    pub continuous: Box<dyn ContinuousSynth>,
    pub legacy: Box<dyn SynthesisEngine>,
}

impl SynthEngines {
    pub fn new(continuous: Box<dyn ContinuousSynth>, legacy: Box<dyn SynthesisEngine>) -> Self {
        Self { continuous, legacy }
    }
}
