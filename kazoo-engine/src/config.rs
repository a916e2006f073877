//! Engine configuration
//!
//! Assembles typed engine settings from the TOML file (see
//! [`kazoo_common::config`]) with command-line overrides applied on top.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (--input-device, --mode, ...)
//! 2. TOML configuration file (resolved via CLI, KAZOO_CONFIG, or config dir)
//! 3. Built-in defaults

use crate::capture::{CaptureOptions, LatencyHint};
use crate::error::{Error, Result};
use crate::synth::{AutoTuneSettings, EngineMode, Scale};
use kazoo_common::config::{
    ConfigResolver, LoggingConfig, OnsetConfig, PerformanceConfig, PitchDetectorConfig,
    SmoothingConfig, TomlConfig,
};
use std::path::Path;
use tracing::info;

/// Command-line configuration overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub mode: Option<EngineMode>,
    pub instrument: Option<String>,
    /// Force buffered capture
    pub buffered: bool,
}

impl ConfigOverrides {
    fn apply(&self, toml: &mut TomlConfig) {
        if let Some(device) = &self.input_device {
            toml.audio.input_device = Some(device.clone());
        }
        if let Some(device) = &self.output_device {
            toml.audio.output_device = Some(device.clone());
        }
        if let Some(mode) = self.mode {
            toml.synth.mode = mode.label().to_ascii_lowercase();
        }
        if let Some(instrument) = &self.instrument {
            toml.synth.instrument = instrument.clone();
        }
        if self.buffered {
            toml.audio.prefer_realtime = false;
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub capture: CaptureOptions,
    pub engine_mode: EngineMode,
    pub instrument: String,
    /// Synth output volume, 0.0-1.0
    pub volume: f32,
    pub output_device: Option<String>,
    pub auto_tune: AutoTuneSettings,
    pub pitch_detector: PitchDetectorConfig,
    pub smoothing: SmoothingConfig,
    pub onset: OnsetConfig,
    pub performance: PerformanceConfig,
    pub logging: LoggingConfig,
    source: TomlConfig,
}

impl EngineConfig {
    /// Resolve, load and override configuration
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file is missing or malformed, or if
    /// any value (mode, key, scale, latency hint) is not recognized.
    pub fn load(config_path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let mut toml = ConfigResolver::new().load(config_path)?;
        overrides.apply(&mut toml);
        toml.validate()?;
        let config = Self::from_toml(toml)?;
        info!(
            "Engine configuration: mode={}, instrument={}, capture={} Hz, buffer={}/{} (realtime/buffered)",
            config.engine_mode,
            config.instrument,
            config.capture.sample_rate,
            config.capture.realtime_buffer_size,
            config.capture.buffer_size
        );
        Ok(config)
    }

    /// Convert a parsed TOML configuration into typed settings
    pub fn from_toml(toml: TomlConfig) -> Result<Self> {
        let engine_mode = EngineMode::parse(&toml.synth.mode).ok_or_else(|| {
            Error::Config(format!("unknown synth.mode '{}'", toml.synth.mode))
        })?;
        let latency_hint = LatencyHint::parse(&toml.audio.latency_hint).ok_or_else(|| {
            Error::Config(format!("unknown audio.latency_hint '{}'", toml.audio.latency_hint))
        })?;
        let scale = Scale::parse(&toml.auto_tune.key, &toml.auto_tune.scale).ok_or_else(|| {
            Error::Config(format!(
                "unknown auto_tune key/scale '{} {}'",
                toml.auto_tune.key, toml.auto_tune.scale
            ))
        })?;

        let capture = CaptureOptions {
            input_device: toml.audio.input_device.clone(),
            sample_rate: toml.audio.sample_rate,
            buffer_size: toml.audio.buffer_size,
            realtime_buffer_size: toml.audio.realtime_buffer_size,
            prefer_realtime: toml.audio.prefer_realtime,
            allow_fallback: toml.audio.allow_fallback,
            latency_hint,
        };

        let auto_tune = AutoTuneSettings {
            enabled: toml.auto_tune.enabled,
            scale,
            strength: toml.auto_tune.strength.clamp(0.0, 1.0),
            speed: toml.auto_tune.speed.clamp(0.0, 1.0),
        };

        Ok(Self {
            capture,
            engine_mode,
            instrument: toml.synth.instrument.clone(),
            volume: toml.synth.volume.clamp(0.0, 1.0),
            output_device: toml.audio.output_device.clone(),
            auto_tune,
            pitch_detector: toml.pitch_detector.clone(),
            smoothing: toml.smoothing.clone(),
            onset: toml.onset.clone(),
            performance: toml.performance.clone(),
            logging: toml.logging.clone(),
            source: toml,
        })
    }

    /// Effective configuration (file plus overrides) as TOML text
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(&self.source)
            .map_err(|e| Error::Config(format!("Failed to serialize configuration: {}", e)))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let toml = TomlConfig::default();
        Self {
            capture: CaptureOptions::default(),
            engine_mode: EngineMode::default(),
            instrument: toml.synth.instrument.clone(),
            volume: toml.synth.volume,
            output_device: None,
            auto_tune: AutoTuneSettings {
                enabled: toml.auto_tune.enabled,
                scale: Scale::default(),
                strength: toml.auto_tune.strength,
                speed: toml.auto_tune.speed,
            },
            pitch_detector: toml.pitch_detector.clone(),
            smoothing: toml.smoothing.clone(),
            onset: toml.onset.clone(),
            performance: toml.performance.clone(),
            logging: toml.logging.clone(),
            source: toml,
        }
    }
}
