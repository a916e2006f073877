//! Capture backend contract
//!
//! A capture backend acquires microphone audio and delivers it to the
//! orchestrator as session-tagged messages over a tokio channel. The backend
//! reports which mode it actually runs in when started:
//!
//! - **Realtime**: pitch frames computed on the audio thread, delivered ready-made
//! - **Buffered**: raw mono sample blocks, analyzed by the orchestrator
//!
//! Messages carry the session token handed out by the orchestrator. Anything
//! tagged with an older session is discarded on arrival, which is what makes
//! `stop()` effective for messages already queued.

pub mod cpal_input;

pub use cpal_input::CpalCapture;
pub use kazoo_common::events::CaptureMode;

use crate::error::CaptureError;
use async_trait::async_trait;
use kazoo_common::PitchFrame;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Latency preference passed through to the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyHint {
    #[default]
    Interactive,
    Balanced,
    Playback,
}

impl LatencyHint {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "interactive" => Some(LatencyHint::Interactive),
            "balanced" => Some(LatencyHint::Balanced),
            "playback" => Some(LatencyHint::Playback),
            _ => None,
        }
    }
}

/// Options applied by `CaptureBackend::configure` before each start
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOptions {
    /// Input device name (None = system default)
    pub input_device: Option<String>,
    pub sample_rate: u32,
    /// Requested block size for buffered capture
    pub buffer_size: u32,
    /// Requested block size for real-time capture
    pub realtime_buffer_size: u32,
    pub prefer_realtime: bool,
    /// Report Buffered mode instead of failing when real-time is unavailable
    pub allow_fallback: bool,
    pub latency_hint: LatencyHint,
}

impl CaptureOptions {
    /// Buffer size to request given the preferred mode
    pub fn requested_buffer_size(&self) -> u32 {
        if self.prefer_realtime {
            self.realtime_buffer_size
        } else {
            self.buffer_size
        }
    }

    /// Configured buffer size for a given mode
    pub fn buffer_size_for(&self, mode: CaptureMode) -> u32 {
        match mode {
            CaptureMode::Realtime => self.realtime_buffer_size,
            CaptureMode::Buffered => self.buffer_size,
        }
    }
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            input_device: None,
            sample_rate: 44100,
            buffer_size: 2048,
            realtime_buffer_size: 128,
            prefer_realtime: true,
            allow_fallback: true,
            latency_hint: LatencyHint::Interactive,
        }
    }
}

/// What the backend actually started with
///
/// A `buffer_size` of 0 means the backend could not tell; the orchestrator
/// then falls back to the configured size for the reported mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStarted {
    pub mode: CaptureMode,
    pub buffer_size: u32,
    pub sample_rate: u32,
}

/// Payload delivered from a capture backend
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureMessage {
    /// Raw mono samples with the capture timestamp of the first sample
    RawBuffer { samples: Vec<f32>, captured_at: f64 },
    /// Pre-computed pitch frame
    Frame(PitchFrame),
    /// Backend fault while running
    Error(CaptureError),
}

/// A capture message tagged with the session that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMessage {
    pub session: u64,
    pub message: CaptureMessage,
}

/// Sending half handed to a backend on start
///
/// Cloneable so the stream data callback and the error callback can each own one.
#[derive(Debug, Clone)]
pub struct CaptureSink {
    session: u64,
    tx: mpsc::UnboundedSender<SessionMessage>,
}

impl CaptureSink {
    pub fn new(session: u64, tx: mpsc::UnboundedSender<SessionMessage>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Deliver a message; returns false once the orchestrator is gone
    pub fn send(&self, message: CaptureMessage) -> bool {
        self.tx
            .send(SessionMessage {
                session: self.session,
                message,
            })
            .is_ok()
    }

    pub fn raw_buffer(&self, samples: Vec<f32>, captured_at: f64) -> bool {
        self.send(CaptureMessage::RawBuffer {
            samples,
            captured_at,
        })
    }

    pub fn frame(&self, frame: PitchFrame) -> bool {
        self.send(CaptureMessage::Frame(frame))
    }

    pub fn error(&self, error: CaptureError) -> bool {
        self.send(CaptureMessage::Error(error))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One enumerated audio device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
}

/// Input and output devices known to a backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceList {
    pub inputs: Vec<DeviceInfo>,
    pub outputs: Vec<DeviceInfo>,
}

impl DeviceList {
    /// Give unlabeled devices a numbered placeholder ("Microphone 2", "Speaker 1")
    pub fn with_placeholder_labels(mut self) -> Self {
        for (i, device) in self.inputs.iter_mut().enumerate() {
            if device.label.trim().is_empty() {
                device.label = format!("Microphone {}", i + 1);
            }
        }
        for (i, device) in self.outputs.iter_mut().enumerate() {
            if device.label.trim().is_empty() {
                device.label = format!("Speaker {}", i + 1);
            }
        }
        self
    }
}

/// Microphone capture backend
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Apply options for the next `start()`
    fn configure(&mut self, options: &CaptureOptions);

    /// Begin capture, delivering messages through `sink`
    async fn start(&mut self, sink: CaptureSink) -> Result<CaptureStarted, CaptureError>;

    /// Stop capture (idempotent)
    fn stop(&mut self);

    async fn enumerate_devices(&self) -> Result<DeviceList, CaptureError>;

    /// Route monitoring output to a device (backends without output ignore it)
    fn set_output_device(&mut self, id: &str) -> Result<(), CaptureError>;

    fn is_capturing(&self) -> bool;
}

/// Builds capture backends on demand
///
/// The orchestrator calls this once, on the first `start()`, and again only
/// for temporary backends used to enumerate devices before any session.
pub trait CaptureBackendFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn CaptureBackend>, CaptureError>;
}

impl<F> CaptureBackendFactory for F
where
    F: Fn() -> Result<Box<dyn CaptureBackend>, CaptureError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn CaptureBackend>, CaptureError> {
        self()
    }
}
