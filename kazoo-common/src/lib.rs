//! # Kazoo Common Library
//!
//! Shared code for the Kazoo voice-to-instrument engine:
//! - Canonical pitch frame contract (PitchEstimate, PitchFrame)
//! - Event types (EngineEvent enum) and EventBus
//! - TOML configuration loading
//! - Monotonic clock used for capture timestamps

pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod time;

pub use error::{Error, Result};
pub use frame::{Articulation, Expression, PitchEstimate, PitchFrame};
pub use events::{CaptureMode, EngineEvent, EngineMode, EventBus, LifecycleState};
