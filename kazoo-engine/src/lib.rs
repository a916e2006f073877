//! # Kazoo Engine Library (kazoo-engine)
//!
//! Real-time voice-to-instrument orchestration core.
//!
//! **Purpose:** Own the capture backend and synthesis engine lifecycle, route
//! every captured frame through pitch estimation and feature extraction into
//! the active synthesis engine, and measure capture-to-render latency.
//!
//! **Architecture:** cpal capture (real-time or buffered) → EngineOrchestrator →
//! continuous or note synthesis engine, with LatencyTracker and PitchVisualizer
//! fed from the same per-frame step.

pub mod analysis;
pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod synth;

pub use error::{CaptureError, Error, ExtractionError, Result, SynthError};
pub use pipeline::{EngineOrchestrator, LatencyTracker, PitchVisualizer};
