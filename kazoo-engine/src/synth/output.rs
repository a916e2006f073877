//! Tone output using cpal
//!
//! Engines write targets (frequency, amplitude, timbre) into a shared
//! `ToneControl` of atomics; the audio callback reads them once per buffer
//! and glides toward them sample by sample.

use crate::device::{find_device, DeviceDirection, StreamThread};
use crate::error::SynthError;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Oscillator shape selected by the instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Waveform {
    Sine = 0,
    Triangle = 1,
    Saw = 2,
    Square = 3,
}

impl Waveform {
    /// Waveform for an instrument id; unknown instruments play a sine
    pub fn for_instrument(instrument: &str) -> Self {
        match instrument.trim().to_ascii_lowercase().as_str() {
            "flute" | "whistle" | "sine" => Waveform::Sine,
            "clarinet" | "ocarina" | "triangle" => Waveform::Triangle,
            "violin" | "cello" | "brass" | "saw" => Waveform::Saw,
            "square" | "chiptune" | "synth" => Waveform::Square,
            _ => Waveform::Sine,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Waveform::Triangle,
            2 => Waveform::Saw,
            3 => Waveform::Square,
            _ => Waveform::Sine,
        }
    }

    fn sample(&self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (phase * TAU).sin(),
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
            Waveform::Saw => 2.0 * phase - 1.0,
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
        }
    }
}

/// Lock-free parameter block shared with the audio callback
#[derive(Debug)]
pub struct ToneControl {
    frequency: AtomicU32,
    amplitude: AtomicU32,
    volume: AtomicU32,
    reverb_wet: AtomicU32,
    waveform: AtomicU8,
    gate: AtomicBool,
}

impl ToneControl {
    pub fn new(volume: f32) -> Self {
        Self {
            frequency: AtomicU32::new(0f32.to_bits()),
            amplitude: AtomicU32::new(0f32.to_bits()),
            volume: AtomicU32::new(volume.clamp(0.0, 1.0).to_bits()),
            reverb_wet: AtomicU32::new(0f32.to_bits()),
            waveform: AtomicU8::new(Waveform::Sine as u8),
            gate: AtomicBool::new(false),
        }
    }

    /// Sound `frequency` at `amplitude` (0.0-1.0)
    pub fn set_voice(&self, frequency: f32, amplitude: f32) {
        self.frequency.store(frequency.max(0.0).to_bits(), Ordering::Relaxed);
        self.amplitude.store(amplitude.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        self.gate.store(amplitude > 0.0 && frequency > 0.0, Ordering::Release);
    }

    /// Fade the voice out
    pub fn silence(&self) {
        self.amplitude.store(0f32.to_bits(), Ordering::Relaxed);
        self.gate.store(false, Ordering::Release);
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn set_reverb_wet(&self, wet: f32) {
        self.reverb_wet.store(wet.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn set_waveform(&self, waveform: Waveform) {
        self.waveform.store(waveform as u8, Ordering::Relaxed);
    }

    pub fn frequency(&self) -> f32 {
        f32::from_bits(self.frequency.load(Ordering::Relaxed))
    }

    pub fn amplitude(&self) -> f32 {
        f32::from_bits(self.amplitude.load(Ordering::Relaxed))
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn reverb_wet(&self) -> f32 {
        f32::from_bits(self.reverb_wet.load(Ordering::Relaxed))
    }

    pub fn waveform(&self) -> Waveform {
        Waveform::from_u8(self.waveform.load(Ordering::Relaxed))
    }

    pub fn is_sounding(&self) -> bool {
        self.gate.load(Ordering::Acquire)
    }
}

/// Per-sample oscillator state owned by the audio callback
pub struct ToneRenderer {
    sample_rate: f32,
    phase: f32,
    frequency: f32,
    amplitude: f32,
    delay: Vec<f32>,
    delay_pos: usize,
}

impl ToneRenderer {
    /// Glide time constant in seconds
    const GLIDE_SECONDS: f32 = 0.01;
    /// Reverb comb delay in seconds
    const REVERB_SECONDS: f32 = 0.047;
    const REVERB_FEEDBACK: f32 = 0.55;

    pub fn new(sample_rate: u32) -> Self {
        let sample_rate = sample_rate.max(1) as f32;
        let delay_len = ((sample_rate * Self::REVERB_SECONDS) as usize).max(1);
        Self {
            sample_rate,
            phase: 0.0,
            frequency: 0.0,
            amplitude: 0.0,
            delay: vec![0.0; delay_len],
            delay_pos: 0,
        }
    }

    /// Render one buffer's worth of mono samples
    pub fn render(&mut self, control: &ToneControl, out: &mut [f32]) {
        let target_frequency = control.frequency();
        let target_amplitude = control.amplitude();
        let volume = control.volume();
        let wet = control.reverb_wet();
        let waveform = control.waveform();
        let glide = 1.0 - (-1.0 / (Self::GLIDE_SECONDS * self.sample_rate)).exp();

        for sample in out.iter_mut() {
            if self.frequency <= 0.0 {
                self.frequency = target_frequency;
            } else if target_frequency > 0.0 {
                self.frequency += (target_frequency - self.frequency) * glide;
            }
            self.amplitude += (target_amplitude - self.amplitude) * glide;

            let dry = if self.frequency > 0.0 {
                self.phase = (self.phase + self.frequency / self.sample_rate).fract();
                waveform.sample(self.phase) * self.amplitude
            } else {
                0.0
            };

            let echo = self.delay[self.delay_pos];
            self.delay[self.delay_pos] = dry + echo * Self::REVERB_FEEDBACK;
            self.delay_pos = (self.delay_pos + 1) % self.delay.len();

            *sample = ((dry * (1.0 - wet) + echo * wet) * volume).clamp(-1.0, 1.0);
        }
    }
}

/// Running cpal output stream driven by a `ToneControl`
pub struct ToneOutput {
    thread: StreamThread,
    device_name: String,
    sample_rate: u32,
}

impl ToneOutput {
    /// Open an output device and start rendering
    ///
    /// Falls back to the default device when `device_name` is not found.
    pub async fn open(
        device_name: Option<String>,
        buffer_size: Option<u32>,
        control: Arc<ToneControl>,
    ) -> Result<Self, SynthError> {
        let (thread, (device_name, sample_rate)) = StreamThread::spawn(
            "kazoo-tone-output",
            move || build_output(device_name.as_deref(), buffer_size, control),
            SynthError::Device,
        )
        .await?;

        info!("Tone output started on {} at {} Hz", device_name, sample_rate);
        Ok(Self {
            thread,
            device_name,
            sample_rate,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn close(&mut self) {
        if self.thread.is_running() {
            debug!("Closing tone output on {}", self.device_name);
            self.thread.stop();
        }
    }
}

impl Drop for ToneOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_output(
    device_name: Option<&str>,
    buffer_size: Option<u32>,
    control: Arc<ToneControl>,
) -> Result<(cpal::Stream, (String, u32)), SynthError> {
    let (device, name) = find_device(DeviceDirection::Output, device_name)
        .ok_or_else(|| SynthError::Device("No output device available".to_string()))?;

    let supported = device
        .default_output_config()
        .map_err(|e| SynthError::Device(format!("Failed to get default config: {}", e)))?;
    let sample_format = supported.sample_format();
    let mut config: StreamConfig = supported.config();
    if let Some(size) = buffer_size {
        config.buffer_size = cpal::BufferSize::Fixed(size);
    }

    debug!(
        "Output config: sample_rate={}, channels={}, format={:?}, buffer_size={:?}",
        config.sample_rate.0, config.channels, sample_format, config.buffer_size
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, control)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, control)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, control)?,
        other => {
            return Err(SynthError::Device(format!("Unsupported sample format: {:?}", other)));
        }
    };

    stream
        .play()
        .map_err(|e| SynthError::Device(format!("Failed to start stream: {}", e)))?;

    Ok((stream, (name, config.sample_rate.0)))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    control: Arc<ToneControl>,
) -> Result<cpal::Stream, SynthError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let mut renderer = ToneRenderer::new(config.sample_rate.0);
    let mut mono: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                if mono.len() < frames {
                    mono.resize(frames, 0.0);
                }
                renderer.render(&control, &mut mono[..frames]);
                for (frame, value) in data.chunks_mut(channels).zip(mono.iter()) {
                    let sample: T = value.to_sample();
                    for slot in frame.iter_mut() {
                        *slot = sample;
                    }
                }
            },
            move |err| {
                error!("Tone output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| SynthError::Device(format!("Failed to build stream: {}", e)))
}
