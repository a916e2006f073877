//! Canonical pitch frame contract
//!
//! Every capture path (pre-computed frames from the real-time thread, or raw
//! buffers analyzed on the control context) ends up producing a `PitchFrame`.
//! Synthesis engines, the latency tracker and the visualizer only ever see
//! this one shape.

use serde::{Deserialize, Serialize};

/// Reference pitch (A4)
pub const A4_FREQUENCY: f32 = 440.0;

/// MIDI note number of A4
pub const A4_MIDI: f32 = 69.0;

/// Pitch class names, sharp spelling
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Note name used when there is no pitch
pub const UNVOICED_NOTE: &str = "-";

/// Fractional MIDI semitone position of a frequency.
///
/// `semitone(f) = 69 + 12 * log2(f / 440)` for `f > 0`. Zero, negative and
/// non-finite inputs map to the sentinel `0.0`.
pub fn semitone(frequency: f32) -> f32 {
    if !frequency.is_finite() || frequency <= 0.0 {
        return 0.0;
    }
    A4_MIDI + 12.0 * (frequency / A4_FREQUENCY).log2()
}

/// Frequency of a (possibly fractional) MIDI pitch
pub fn midi_to_frequency(midi: f32) -> f32 {
    A4_FREQUENCY * 2f32.powf((midi - A4_MIDI) / 12.0)
}

/// Nearest note name and octave for a frequency, `None` when unvoiced
pub fn note_for_frequency(frequency: f32) -> Option<(&'static str, i32)> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return None;
    }
    let midi = semitone(frequency).round() as i32;
    let name = NOTE_NAMES[midi.rem_euclid(12) as usize];
    let octave = midi.div_euclid(12) - 1;
    Some((name, octave))
}

/// Articulation phase reported by feature extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Articulation {
    Silence,
    Attack,
    Sustain,
    Release,
}

impl std::fmt::Display for Articulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Articulation::Silence => write!(f, "silence"),
            Articulation::Attack => write!(f, "attack"),
            Articulation::Sustain => write!(f, "sustain"),
            Articulation::Release => write!(f, "release"),
        }
    }
}

/// Expressive descriptors, present only when feature extraction ran
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    /// Spectral brightness, 0.0 (dark) to 1.0 (bright)
    pub brightness: f32,
    /// Noisiness of the voice, 0.0 to 1.0
    pub breathiness: f32,
    /// Note articulation phase
    pub articulation: Articulation,
}

impl Expression {
    /// True on the frame that starts a new note
    pub fn is_onset(&self) -> bool {
        self.articulation == Articulation::Attack
    }
}

/// Bare pitch estimate produced by a pitch estimator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitchEstimate {
    /// Frequency in Hz (0.0 = no pitch)
    pub frequency: f32,
    /// Detection confidence, 0.0 to 1.0
    pub confidence: f32,
    /// Nearest note name ("-" when unvoiced)
    pub note: String,
    /// Octave of the nearest note
    pub octave: i32,
    /// Input level in dBFS
    pub volume_db: f32,
}

impl PitchEstimate {
    /// Build an estimate, deriving note/octave from `frequency`
    pub fn new(frequency: f32, confidence: f32, volume_db: f32) -> Self {
        let (note, octave) = note_for_frequency(frequency).unwrap_or((UNVOICED_NOTE, 0));
        Self {
            frequency: if frequency.is_finite() { frequency.max(0.0) } else { 0.0 },
            confidence: clamp_unit(confidence),
            note: note.to_string(),
            octave,
            volume_db,
        }
    }

    /// Estimate describing silence at the given level
    pub fn silence(volume_db: f32) -> Self {
        Self::new(0.0, 0.0, volume_db)
    }

    pub fn is_voiced(&self) -> bool {
        self.frequency > 0.0 && self.confidence > 0.0
    }
}

/// The single cross-backend frame contract consumed by synthesis engines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitchFrame {
    /// Frequency in Hz (0.0 = silence/no pitch)
    pub frequency: f32,
    /// Detection confidence, 0.0 to 1.0
    pub confidence: f32,
    /// Nearest note name, consistent with `frequency`
    pub note: String,
    /// Octave of the nearest note, consistent with `frequency`
    pub octave: i32,
    /// Input level in dBFS
    pub volume_db: f32,
    /// Monotonic capture time in milliseconds, assigned by the capture backend
    pub capture_timestamp: f64,
    /// Expressive descriptors, `None` when no feature extraction ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<Expression>,
}

impl PitchFrame {
    /// Build a frame without expressive descriptors
    pub fn new(frequency: f32, confidence: f32, volume_db: f32, capture_timestamp: f64) -> Self {
        Self::from_estimate(&PitchEstimate::new(frequency, confidence, volume_db), capture_timestamp)
    }

    /// Degrade a bare estimate into a frame (no expressive fields)
    pub fn from_estimate(estimate: &PitchEstimate, capture_timestamp: f64) -> Self {
        Self {
            frequency: estimate.frequency,
            confidence: estimate.confidence,
            note: estimate.note.clone(),
            octave: estimate.octave,
            volume_db: estimate.volume_db,
            capture_timestamp,
            expression: None,
        }
    }

    pub fn with_expression(mut self, expression: Expression) -> Self {
        self.expression = Some(expression);
        self
    }

    /// Bare estimate view, for engines that only understand estimates
    pub fn to_estimate(&self) -> PitchEstimate {
        PitchEstimate {
            frequency: self.frequency,
            confidence: self.confidence,
            note: self.note.clone(),
            octave: self.octave,
            volume_db: self.volume_db,
        }
    }

    /// Display label such as "A4", or "--" when unvoiced
    pub fn label(&self) -> String {
        if self.frequency > 0.0 && self.note != UNVOICED_NOTE {
            format!("{}{}", self.note, self.octave)
        } else {
            "--".to_string()
        }
    }

    pub fn semitone(&self) -> f32 {
        semitone(self.frequency)
    }

    pub fn is_voiced(&self) -> bool {
        self.frequency > 0.0 && self.confidence > 0.0
    }

    /// Brightness if extraction ran; absence is "unavailable", never zero
    pub fn brightness(&self) -> Option<f32> {
        self.expression.map(|e| e.brightness)
    }

    pub fn articulation(&self) -> Option<Articulation> {
        self.expression.map(|e| e.articulation)
    }

    /// Whether the backend stamped this frame with a usable capture time
    pub fn has_capture_timestamp(&self) -> bool {
        self.capture_timestamp.is_finite() && self.capture_timestamp > 0.0
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
