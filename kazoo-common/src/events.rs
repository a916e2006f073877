//! Engine lifecycle types and the event bus
//!
//! Events describe control-plane changes (lifecycle, mode, faults). Per-frame
//! data never travels over the bus; it goes through the display channel.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Orchestrator lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Stopping,
    Error,
}

impl LifecycleState {
    /// True when `start()` may begin a new session
    ///
    /// Error is treated as Idle for retry purposes.
    pub fn can_start(&self) -> bool {
        matches!(self, LifecycleState::Idle | LifecycleState::Error)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Idle => "Idle",
            LifecycleState::Starting => "Starting",
            LifecycleState::Running => "Running",
            LifecycleState::Stopping => "Stopping",
            LifecycleState::Error => "Error",
        };
        f.write_str(s)
    }
}

/// How a capture backend delivers audio to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Pitch frames computed on the audio thread
    Realtime,
    /// Raw sample blocks, analyzed by the orchestrator
    Buffered,
}

impl CaptureMode {
    /// True when the backend already delivers pitch frames
    pub fn delivers_frames(&self) -> bool {
        matches!(self, CaptureMode::Realtime)
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::Realtime => f.write_str("realtime"),
            CaptureMode::Buffered => f.write_str("buffered"),
        }
    }
}

/// Which synthesis engine variant receives frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    /// Continuous pitch and expression, with auto-tune
    #[default]
    Continuous,
    /// Discrete note on/off
    Legacy,
}

impl EngineMode {
    /// Parse a mode name as used in config files and on the command line
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "continuous" => Some(EngineMode::Continuous),
            "legacy" | "note" => Some(EngineMode::Legacy),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EngineMode::Continuous => "Continuous",
            EngineMode::Legacy => "Legacy",
        }
    }
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Engine events broadcast to observers (UI, logging, tests)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// Lifecycle transition
    StateChanged {
        from: LifecycleState,
        to: LifecycleState,
    },

    /// Capture is running with the negotiated parameters
    CaptureStarted {
        mode: CaptureMode,
        buffer_size: u32,
        sample_rate: u32,
    },

    /// `start()` failed; carries the single user-facing message
    StartFailed { message: String },

    /// Active synthesis engine variant changed
    ModeChanged { mode: EngineMode },

    /// Capture backend reported an error while running
    CaptureFault { message: String },

    /// Feature extraction failed and frames fell back to the bare estimate
    ///
    /// Emitted on the first failure of a session and carries the running count.
    ExtractionDegraded { count: u64 },

    /// Auto-tune strength toggled on the continuous engine
    AutoTuneToggled { strength: f32 },
}

/// Central event distribution using tokio broadcast
///
/// Slow receivers lag and lose the oldest events rather than blocking the
/// emitter.
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per receiver
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EngineEvent,
    ) -> Result<usize, broadcast::error::SendError<EngineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
