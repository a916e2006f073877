//! Configuration loading and config file resolution
//!
//! Configuration is a single TOML file. Every field has a built-in default,
//! so a missing file (or a missing section) never prevents startup.
//!
//! # Config File Priority
//!
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`KAZOO_CONFIG`)
//! 3. Platform config directory (`<config_dir>/kazoo/config.toml`)
//! 4. Built-in defaults (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "KAZOO_CONFIG";

/// Complete TOML configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub audio: AudioConfig,
    pub pitch_detector: PitchDetectorConfig,
    pub smoothing: SmoothingConfig,
    pub onset: OnsetConfig,
    pub synth: SynthConfig,
    pub auto_tune: AutoTuneConfig,
    pub performance: PerformanceConfig,
    pub logging: LoggingConfig,
}

/// Capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Requested sample rate in Hz
    pub sample_rate: u32,
    /// Buffer size for the buffered (raw sample) capture path
    pub buffer_size: u32,
    /// Buffer size for the real-time (pre-computed frame) capture path
    pub realtime_buffer_size: u32,
    /// Try the real-time capture path first
    pub prefer_realtime: bool,
    /// Fall back to buffered capture when real-time capture is unavailable
    pub allow_fallback: bool,
    /// Latency hint passed to the backend ("interactive", "balanced", "playback")
    pub latency_hint: String,
    /// Input device name (None = system default)
    pub input_device: Option<String>,
    /// Output device name (None = system default)
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            buffer_size: 2048,
            realtime_buffer_size: 128,
            prefer_realtime: true,
            allow_fallback: true,
            latency_hint: "interactive".to_string(),
            input_device: None,
            output_device: None,
        }
    }
}

/// Pitch estimator tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchDetectorConfig {
    /// Minimum clarity (1 - normalized difference) to accept a pitch
    pub clarity_threshold: f32,
    pub min_frequency: f32,
    pub max_frequency: f32,
    /// RMS below which a buffer is treated as silence
    pub min_volume: f32,
}

impl Default for PitchDetectorConfig {
    fn default() -> Self {
        Self {
            clarity_threshold: 0.9,
            min_frequency: 80.0,
            max_frequency: 800.0,
            min_volume: 0.01,
        }
    }
}

/// Exponential smoothing factors for expressive features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub volume_alpha: f32,
    pub brightness_alpha: f32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            volume_alpha: 0.3,
            brightness_alpha: 0.2,
        }
    }
}

/// Onset (attack) detection thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnsetConfig {
    /// Level rise in dB that counts as an attack
    pub energy_threshold_db: f32,
    /// Level in dBFS below which input is silence
    pub silence_threshold_db: f32,
    pub attack_duration_ms: f64,
    pub min_silence_duration_ms: f64,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        Self {
            energy_threshold_db: 6.0,
            silence_threshold_db: -40.0,
            attack_duration_ms: 50.0,
            min_silence_duration_ms: 100.0,
        }
    }
}

/// Synthesis engine selection and defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    /// "continuous" or "legacy"
    pub mode: String,
    pub instrument: String,
    /// Output volume, 0.0-1.0
    pub volume: f32,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            mode: "continuous".to_string(),
            instrument: "flute".to_string(),
            volume: 0.5,
        }
    }
}

/// Auto-tune defaults for the continuous engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoTuneConfig {
    pub enabled: bool,
    pub key: String,
    pub scale: String,
    /// Correction strength, 0.0-1.0
    pub strength: f32,
    /// Retune speed, 0.0 (instant) to 1.0 (slow)
    pub speed: f32,
}

impl Default for AutoTuneConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key: "C".to_string(),
            scale: "chromatic".to_string(),
            strength: 0.5,
            speed: 0.1,
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub enable_stats: bool,
    /// Interval between latency summaries in the log
    pub stats_interval_ms: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            enable_stats: true,
            stats_interval_ms: 1000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(text)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file that must exist
    pub fn load_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(Error::Config("audio.sample_rate must be positive".to_string()));
        }
        if self.audio.buffer_size == 0 || self.audio.realtime_buffer_size == 0 {
            return Err(Error::Config("audio buffer sizes must be positive".to_string()));
        }
        let pd = &self.pitch_detector;
        if pd.min_frequency <= 0.0 || pd.min_frequency >= pd.max_frequency {
            return Err(Error::Config(format!(
                "pitch_detector frequency range is invalid: {} - {} Hz",
                pd.min_frequency, pd.max_frequency
            )));
        }
        if !(0.0..=1.0).contains(&pd.clarity_threshold) {
            return Err(Error::Config(
                "pitch_detector.clarity_threshold must be within 0.0-1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Config file resolution following the priority order in the module docs
pub struct ConfigResolver {
    env_var_name: String,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self {
            env_var_name: CONFIG_ENV_VAR.to_string(),
        }
    }

    /// Use a different environment variable (tests)
    pub fn with_env_var(env_var_name: &str) -> Self {
        Self {
            env_var_name: env_var_name.to_string(),
        }
    }

    /// Resolve which config file to read, if any
    ///
    /// Returns the path plus whether it was requested explicitly (CLI or env).
    /// Explicit files must exist; the platform default is optional.
    pub fn resolve(&self, cli_arg: Option<&Path>) -> Option<(PathBuf, bool)> {
        // Priority 1: Command-line argument
        if let Some(path) = cli_arg {
            return Some((path.to_path_buf(), true));
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(&self.env_var_name) {
            if !path.trim().is_empty() {
                return Some((PathBuf::from(path), true));
            }
        }

        // Priority 3: Platform config directory
        default_config_path().map(|p| (p, false))
    }

    /// Resolve and load configuration, falling back to defaults
    ///
    /// # Errors
    ///
    /// Returns error if an explicitly requested file cannot be read, or if
    /// any file that is found fails to parse or validate.
    pub fn load(&self, cli_arg: Option<&Path>) -> Result<TomlConfig> {
        match self.resolve(cli_arg) {
            Some((path, true)) => TomlConfig::load_file(&path),
            Some((path, false)) if path.exists() => TomlConfig::load_file(&path),
            Some((path, false)) => {
                warn!("No config file at {:?}, using built-in defaults", path);
                Ok(TomlConfig::default())
            }
            None => {
                warn!("Could not determine config directory, using built-in defaults");
                Ok(TomlConfig::default())
            }
        }
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// `<config_dir>/kazoo/config.toml` for the current platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("kazoo").join("config.toml"))
}
