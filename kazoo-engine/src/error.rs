//! Error types for kazoo-engine
//!
//! Capture and engine-initialization failures are fatal to a session and are
//! surfaced once per failed `start()`. Extraction failures never leave the
//! frame path; the orchestrator degrades the frame instead.

use thiserror::Error;

/// Capture backend failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// Microphone access was refused
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Requested device does not exist
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Device exists but cannot be opened or configured
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Stream could not be built, started, or failed while running
    #[error("Audio stream failed: {0}")]
    StreamFailed(String),

    /// Requested capture mode is not supported by this backend
    #[error("Unsupported capture mode: {0}")]
    Unsupported(String),
}

/// Feature extraction failure (recovered locally by the orchestrator)
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Feature extraction failed: {0}")]
pub struct ExtractionError(pub String);

/// Synthesis engine failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynthError {
    #[error("Synth initialization failed: {0}")]
    Init(String),

    #[error("Synth output device error: {0}")]
    Device(String),
}

/// Main error type for kazoo-engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Synthesis engine failed to initialize
    #[error("Engine initialization failed: {0}")]
    EngineInit(String),

    /// Operation not permitted in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] kazoo_common::Error),
}

impl From<SynthError> for Error {
    fn from(err: SynthError) -> Self {
        Error::EngineInit(err.to_string())
    }
}

impl Error {
    /// Single user-facing message for a failed operation
    pub fn user_message(&self) -> String {
        match self {
            Error::Capture(CaptureError::PermissionDenied(_)) => {
                "Microphone access was denied. Allow microphone access and try again.".to_string()
            }
            Error::Capture(CaptureError::DeviceNotFound(name)) => {
                format!("Audio input device '{}' was not found.", name)
            }
            Error::Capture(CaptureError::DeviceUnavailable(_)) => {
                "The audio input device is busy or unavailable.".to_string()
            }
            Error::Capture(CaptureError::StreamFailed(_)) => {
                "Audio capture could not be started.".to_string()
            }
            Error::Capture(CaptureError::Unsupported(msg)) => {
                format!("Audio capture mode not supported: {}", msg)
            }
            Error::EngineInit(_) => "The synthesizer could not be started.".to_string(),
            Error::InvalidState(msg) => msg.clone(),
            Error::Config(msg) => format!("Configuration problem: {}", msg),
            Error::Common(err) => err.to_string(),
        }
    }
}

/// Convenience Result type using kazoo-engine Error
pub type Result<T> = std::result::Result<T, Error>;
