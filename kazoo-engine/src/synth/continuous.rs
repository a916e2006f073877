//! Continuous tone engine
//!
//! Follows the input pitch continuously with optional auto-tune correction
//! toward the selected scale.

use super::output::{ToneControl, ToneOutput, Waveform};
use super::{AutoTuneSettings, ContinuousSynth, EngineContext, Scale, SynthesisEngine};
use crate::error::SynthError;
use async_trait::async_trait;
use kazoo_common::frame::{midi_to_frequency, semitone};
use kazoo_common::{Articulation, PitchEstimate, PitchFrame};
use std::sync::Arc;
use tracing::{debug, info};

/// Frames below this confidence silence the voice
const MIN_CONFIDENCE: f32 = 0.5;

/// Level in dBFS mapped to zero amplitude
const AMPLITUDE_FLOOR_DB: f32 = -60.0;

/// Map an input level to voice amplitude
pub fn level_to_amplitude(volume_db: f32) -> f32 {
    ((volume_db - AMPLITUDE_FLOOR_DB) / -AMPLITUDE_FLOOR_DB).clamp(0.0, 1.0)
}

/// Pitch after auto-tune correction
///
/// Pulls `midi` toward the nearest in-scale pitch by the effective strength.
pub fn corrected_pitch(midi: f32, settings: &AutoTuneSettings) -> f32 {
    let strength = settings.effective_strength();
    if strength <= 0.0 {
        return midi;
    }
    let target = settings.scale.snap(midi);
    midi + (target - midi) * strength
}

pub struct ContinuousToneEngine {
    control: Arc<ToneControl>,
    output: Option<ToneOutput>,
    output_device: Option<String>,
    output_buffer: Option<u32>,
    open_output: bool,
    initialized: bool,
    auto_tune: AutoTuneSettings,
    instrument: String,
    current_midi: Option<f32>,
}

impl ContinuousToneEngine {
    pub fn new(volume: f32) -> Self {
        Self {
            control: Arc::new(ToneControl::new(volume)),
            output: None,
            output_device: None,
            output_buffer: None,
            open_output: true,
            initialized: false,
            auto_tune: AutoTuneSettings::default(),
            instrument: "flute".to_string(),
            current_midi: None,
        }
    }

    /// Drive the shared control block without opening an audio device
    pub fn headless(mut self) -> Self {
        self.open_output = false;
        self
    }

    pub fn control(&self) -> Arc<ToneControl> {
        Arc::clone(&self.control)
    }

    /// Output device the engine plays on (None = system default)
    pub fn output_device(&self) -> Option<&str> {
        self.output_device.as_deref()
    }

    /// Current (glided, corrected) pitch as fractional MIDI
    pub fn current_pitch(&self) -> Option<f32> {
        self.current_midi
    }

    pub fn auto_tune(&self) -> &AutoTuneSettings {
        &self.auto_tune
    }

    fn glide_to(&mut self, target: f32) -> f32 {
        // speed 0 jumps straight to the target, speed 1 moves 10% per frame
        let step = 1.0 - 0.9 * self.auto_tune.speed.clamp(0.0, 1.0);
        let next = match self.current_midi {
            Some(current) => current + (target - current) * step,
            None => target,
        };
        self.current_midi = Some(next);
        next
    }
}

#[async_trait]
impl SynthesisEngine for ContinuousToneEngine {
    async fn initialize(&mut self, context: &EngineContext) -> Result<(), SynthError> {
        self.control.set_volume(context.volume);
        self.change_instrument(&context.instrument);
        self.output_device = context.output_device.clone();
        self.output_buffer = Some(context.buffer_size);

        if self.open_output && self.output.is_none() {
            let output = ToneOutput::open(
                self.output_device.clone(),
                self.output_buffer,
                Arc::clone(&self.control),
            )
            .await?;
            self.output = Some(output);
        }

        self.initialized = true;
        info!("Continuous engine initialized ({})", self.instrument);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn process_frame(&mut self, frame: &PitchFrame) {
        let silent = !frame.is_voiced()
            || frame.confidence < MIN_CONFIDENCE
            || frame.articulation() == Some(Articulation::Silence);
        if silent {
            self.control.silence();
            self.current_midi = None;
            return;
        }

        let target = corrected_pitch(semitone(frame.frequency), &self.auto_tune);
        let midi = self.glide_to(target);
        self.control
            .set_voice(midi_to_frequency(midi), level_to_amplitude(frame.volume_db));
    }

    fn process_estimate(&mut self, estimate: &PitchEstimate) {
        self.process_frame(&PitchFrame::from_estimate(estimate, 0.0));
    }

    fn stop(&mut self) {
        self.control.silence();
        self.current_midi = None;
    }

    fn change_instrument(&mut self, instrument: &str) {
        self.instrument = instrument.to_string();
        self.control.set_waveform(Waveform::for_instrument(instrument));
        debug!("Continuous engine instrument: {}", instrument);
    }

    async fn set_output_device(&mut self, device: Option<&str>) -> Result<(), SynthError> {
        let device = device.map(str::to_string);
        if device == self.output_device {
            return Ok(());
        }
        self.output_device = device;

        if let Some(mut output) = self.output.take() {
            output.close();
            match ToneOutput::open(
                self.output_device.clone(),
                self.output_buffer,
                Arc::clone(&self.control),
            )
            .await
            {
                Ok(output) => self.output = Some(output),
                Err(err) => {
                    // Reopen on the next start
                    self.initialized = false;
                    return Err(err);
                }
            }
        }
        info!(
            "Continuous engine output: {}",
            self.output_device.as_deref().unwrap_or("default")
        );
        Ok(())
    }

    fn shutdown(&mut self) {
        self.stop();
        if let Some(mut output) = self.output.take() {
            output.close();
        }
        self.initialized = false;
    }
}

impl ContinuousSynth for ContinuousToneEngine {
    fn set_auto_tune(&mut self, settings: &AutoTuneSettings) {
        self.auto_tune = *settings;
    }

    fn set_scale(&mut self, scale: Scale) {
        self.auto_tune.scale = scale;
    }

    fn set_retune_speed(&mut self, speed: f32) {
        self.auto_tune.speed = speed.clamp(0.0, 1.0);
    }

    fn set_reverb_wet(&mut self, wet: f32) {
        self.control.set_reverb_wet(wet);
    }
}
