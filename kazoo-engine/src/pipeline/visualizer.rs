//! Rolling pitch history and piano-roll render model
//!
//! The visualizer does not draw. It keeps a bounded history of observed
//! samples and turns it into a [`VisualizerScene`]: grid rows, the plotted
//! pitch path split into connected segments, and the current-pitch marker.
//! Any drawing surface can render a scene.

use kazoo_common::frame::semitone;
use kazoo_common::PitchFrame;
use serde::Serialize;
use std::collections::VecDeque;

/// History entries retained (about 5 seconds at 60 frames per second)
pub const HISTORY_CAPACITY: usize = 300;

/// Lowest MIDI pitch on the vertical axis (E2)
pub const MIN_MIDI: f32 = 40.0;

/// Highest MIDI pitch on the vertical axis (C6)
pub const MAX_MIDI: f32 = 84.0;

/// Samples below this confidence are gaps
pub const MIN_PLOT_CONFIDENCE: f32 = 0.1;

/// Samples below this frequency are gaps
pub const MIN_PLOT_FREQUENCY: f32 = 50.0;

/// Inset of the current-pitch marker from the right edge
const INDICATOR_INSET: f32 = 5.0;

/// One observed sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub frequency: f32,
    pub confidence: f32,
    /// Fractional MIDI position (0 for silence)
    pub semitone: f32,
    /// Observation time in milliseconds
    pub observed_at: f64,
}

impl HistoryEntry {
    /// Whether this sample is drawn; anything else breaks the path
    pub fn is_plottable(&self) -> bool {
        self.confidence >= MIN_PLOT_CONFIDENCE && self.frequency >= MIN_PLOT_FREQUENCY
    }
}

/// Horizontal semitone row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridLine {
    pub midi: i32,
    pub y: f32,
    /// C rows are drawn stronger and carry a label such as "C4"
    pub label: Option<String>,
}

/// Plotted history point
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlotPoint {
    /// Index into the history
    pub index: usize,
    pub x: f32,
    pub y: f32,
}

/// Marker for the most recent sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentMarker {
    pub x: f32,
    pub y: f32,
    pub label: String,
}

/// Highlighted row of the currently sung note
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RowHighlight {
    pub midi: i32,
    pub y: f32,
    pub height: f32,
}

/// Everything needed to draw one visualizer frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualizerScene {
    pub width: f32,
    pub height: f32,
    pub grid: Vec<GridLine>,
    pub highlight: Option<RowHighlight>,
    /// Connected runs of plottable points; never joined across gaps
    pub segments: Vec<Vec<PlotPoint>>,
    /// History index where each gap between two segments begins
    pub discontinuities: Vec<usize>,
    pub current: Option<CurrentMarker>,
}

/// Bounded pitch history with a fixed semitone axis
#[derive(Debug, Clone)]
pub struct PitchVisualizer {
    history: VecDeque<HistoryEntry>,
    width: f32,
    height: f32,
    last_label: String,
}

impl PitchVisualizer {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_CAPACITY + 1),
            width: width.max(0.0),
            height: height.max(0.0),
            last_label: String::from("--"),
        }
    }

    /// Record a frame observed at `observed_at` (ms)
    pub fn push(&mut self, frame: &PitchFrame, observed_at: f64) {
        self.push_sample(frame.frequency, frame.confidence, observed_at);
        self.last_label = frame.label();
    }

    /// Record a bare (frequency, confidence) observation
    pub fn push_sample(&mut self, frequency: f32, confidence: f32, observed_at: f64) {
        self.history.push_back(HistoryEntry {
            frequency,
            confidence,
            semitone: semitone(frequency),
            observed_at,
        });
        if self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
    }

    /// Change the surface size, keeping history, and redraw
    pub fn resize(&mut self, width: f32, height: f32) -> VisualizerScene {
        self.width = width.max(0.0);
        self.height = height.max(0.0);
        self.scene()
    }

    pub fn size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Snapshot of the history, oldest first
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.last_label = String::from("--");
    }

    /// Vertical pixel position of a MIDI pitch (top = MAX_MIDI)
    pub fn midi_to_y(&self, midi: f32) -> f32 {
        (1.0 - (midi - MIN_MIDI) / (MAX_MIDI - MIN_MIDI)) * self.height
    }

    /// Horizontal pixel position of a history index
    pub fn index_to_x(&self, index: usize) -> f32 {
        index as f32 * self.width / (HISTORY_CAPACITY - 1) as f32
    }

    /// Build the render model for the current history and size
    pub fn scene(&self) -> VisualizerScene {
        let last = self.history.back();
        let (segments, discontinuities) = self.segments();

        let highlight = last
            .filter(|entry| entry.confidence > MIN_PLOT_CONFIDENCE)
            .map(|entry| {
                let midi = entry.semitone.round() as i32;
                RowHighlight {
                    midi,
                    y: self.midi_to_y(midi as f32),
                    height: self.height / (MAX_MIDI - MIN_MIDI),
                }
            });

        let current = last
            .filter(|entry| {
                entry.confidence > MIN_PLOT_CONFIDENCE && entry.frequency > MIN_PLOT_FREQUENCY
            })
            .map(|entry| CurrentMarker {
                x: self.width - INDICATOR_INSET,
                y: self.midi_to_y(entry.semitone),
                label: self.last_label.clone(),
            });

        VisualizerScene {
            width: self.width,
            height: self.height,
            grid: self.grid(),
            highlight,
            segments,
            discontinuities,
            current,
        }
    }

    fn grid(&self) -> Vec<GridLine> {
        (MIN_MIDI.ceil() as i32..=MAX_MIDI.floor() as i32)
            .map(|midi| GridLine {
                midi,
                y: self.midi_to_y(midi as f32),
                label: (midi.rem_euclid(12) == 0).then(|| format!("C{}", midi / 12 - 1)),
            })
            .collect()
    }

    fn segments(&self) -> (Vec<Vec<PlotPoint>>, Vec<usize>) {
        let mut segments: Vec<Vec<PlotPoint>> = Vec::new();
        let mut discontinuities = Vec::new();
        let mut current: Vec<PlotPoint> = Vec::new();
        let mut gap_start: Option<usize> = None;

        for (index, entry) in self.history.iter().enumerate() {
            if !entry.is_plottable() {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                    gap_start = Some(index);
                }
                continue;
            }
            if current.is_empty() {
                if let Some(start) = gap_start.take() {
                    discontinuities.push(start);
                }
            }
            current.push(PlotPoint {
                index,
                x: self.index_to_x(index),
                y: self.midi_to_y(entry.semitone),
            });
        }
        if !current.is_empty() {
            segments.push(current);
        }
        (segments, discontinuities)
    }
}

impl Default for PitchVisualizer {
    fn default() -> Self {
        Self::new(800.0, 300.0)
    }
}
