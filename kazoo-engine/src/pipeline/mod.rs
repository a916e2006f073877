//! Frame pipeline: orchestration, latency, visualization and telemetry

pub mod latency;
pub mod orchestrator;
pub mod telemetry;
pub mod visualizer;

pub use latency::{LatencySummary, LatencyTracker, SharedLatency};
pub use orchestrator::{Collaborators, EngineOrchestrator};
pub use telemetry::{DisplayFields, ProcessingMonitor, ProcessingStats};
pub use visualizer::{PitchVisualizer, VisualizerScene};
