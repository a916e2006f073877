//! Note tone engine
//!
//! Quantizes the input pitch to the nearest semitone and plays discrete
//! notes: a new note starts when the quantized pitch changes, and the note
//! is released when the input becomes unvoiced.

use super::continuous::level_to_amplitude;
use super::output::{ToneControl, ToneOutput, Waveform};
use super::{EngineContext, SynthesisEngine};
use crate::error::SynthError;
use async_trait::async_trait;
use kazoo_common::frame::{midi_to_frequency, semitone};
use kazoo_common::{PitchEstimate, PitchFrame};
use std::sync::Arc;
use tracing::{debug, info};

const MIN_CONFIDENCE: f32 = 0.5;

pub struct NoteToneEngine {
    control: Arc<ToneControl>,
    output: Option<ToneOutput>,
    output_device: Option<String>,
    output_buffer: Option<u32>,
    open_output: bool,
    initialized: bool,
    active_note: Option<i32>,
    notes_started: u64,
}

impl NoteToneEngine {
    pub fn new(volume: f32) -> Self {
        Self {
            control: Arc::new(ToneControl::new(volume)),
            output: None,
            output_device: None,
            output_buffer: None,
            open_output: true,
            initialized: false,
            active_note: None,
            notes_started: 0,
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

    /// MIDI note currently held, if any
    pub fn active_note(&self) -> Option<i32> {
        self.active_note
    }

    pub fn notes_started(&self) -> u64 {
        self.notes_started
    }

    fn note_on(&mut self, note: i32, amplitude: f32) {
        self.control.set_voice(midi_to_frequency(note as f32), amplitude);
        self.active_note = Some(note);
        self.notes_started += 1;
    }

    fn note_off(&mut self) {
        if self.active_note.take().is_some() {
            self.control.silence();
        }
    }
}

#[async_trait]
impl SynthesisEngine for NoteToneEngine {
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
        info!("Note engine initialized");
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn supports_frames(&self) -> bool {
        false
    }

    fn process_frame(&mut self, frame: &PitchFrame) {
        self.process_estimate(&frame.to_estimate());
    }

    fn process_estimate(&mut self, estimate: &PitchEstimate) {
        if !estimate.is_voiced() || estimate.confidence < MIN_CONFIDENCE {
            self.note_off();
            return;
        }

        let note = semitone(estimate.frequency).round() as i32;
        let amplitude = level_to_amplitude(estimate.volume_db);
        if self.active_note == Some(note) {
            // Held note: follow the level only
            self.control.set_voice(midi_to_frequency(note as f32), amplitude);
        } else {
            self.note_on(note, amplitude);
        }
    }

    fn stop(&mut self) {
        self.note_off();
        self.control.silence();
    }

    fn change_instrument(&mut self, instrument: &str) {
        self.control.set_waveform(Waveform::for_instrument(instrument));
        debug!("Note engine instrument: {}", instrument);
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
            "Note engine output: {}",
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
