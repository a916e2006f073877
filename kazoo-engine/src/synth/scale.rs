//! Musical scales for auto-tune snapping

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scale kind (interval set relative to the key)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleKind {
    #[default]
    Chromatic,
    Major,
    Minor,
    Pentatonic,
    Blues,
}

impl ScaleKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "chromatic" => Some(ScaleKind::Chromatic),
            "major" => Some(ScaleKind::Major),
            "minor" => Some(ScaleKind::Minor),
            "pentatonic" => Some(ScaleKind::Pentatonic),
            "blues" => Some(ScaleKind::Blues),
            _ => None,
        }
    }

    /// Semitone offsets from the key
    pub fn intervals(&self) -> &'static [i32] {
        match self {
            ScaleKind::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
            ScaleKind::Major => &[0, 2, 4, 5, 7, 9, 11],
            ScaleKind::Minor => &[0, 2, 3, 5, 7, 8, 10],
            ScaleKind::Pentatonic => &[0, 2, 4, 7, 9],
            ScaleKind::Blues => &[0, 3, 5, 6, 7, 10],
        }
    }
}

impl fmt::Display for ScaleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScaleKind::Chromatic => "chromatic",
            ScaleKind::Major => "major",
            ScaleKind::Minor => "minor",
            ScaleKind::Pentatonic => "pentatonic",
            ScaleKind::Blues => "blues",
        };
        f.write_str(s)
    }
}

/// Key (pitch class 0 = C) plus scale kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scale {
    pub key: u8,
    pub kind: ScaleKind,
}

impl Scale {
    pub fn new(key: u8, kind: ScaleKind) -> Self {
        Self { key: key % 12, kind }
    }

    /// Parse a key name and scale name, e.g. ("F#", "minor") or ("Bb", "blues")
    pub fn parse(key: &str, kind: &str) -> Option<Self> {
        Some(Self::new(parse_key(key)?, ScaleKind::parse(kind)?))
    }

    pub fn contains(&self, midi: i32) -> bool {
        let degree = (midi - self.key as i32).rem_euclid(12);
        self.kind.intervals().contains(&degree)
    }

    /// Nearest in-scale MIDI pitch to a fractional MIDI value
    ///
    /// Ties resolve downward.
    pub fn snap(&self, midi: f32) -> f32 {
        if !midi.is_finite() {
            return midi;
        }
        let base = midi.round() as i32;
        let mut best = base;
        let mut best_distance = f32::MAX;
        for offset in -6..=6 {
            let candidate = base + offset;
            if !self.contains(candidate) {
                continue;
            }
            let distance = (candidate as f32 - midi).abs();
            if distance < best_distance || (distance == best_distance && candidate < best) {
                best = candidate;
                best_distance = distance;
            }
        }
        best as f32
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", kazoo_common::frame::NOTE_NAMES[self.key as usize], self.kind)
    }
}

/// Pitch class of a key name; accepts sharps and flats
pub fn parse_key(name: &str) -> Option<u8> {
    let name = name.trim();
    let mut chars = name.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let natural: i32 = match letter {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let accidental = match chars.as_str() {
        "" => 0,
        "#" | "♯" => 1,
        "b" | "♭" => -1,
        _ => return None,
    };
    Some((natural + accidental).rem_euclid(12) as u8)
}
