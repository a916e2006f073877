//! Test fakes for orchestrator integration tests
//!
//! Every fake records what the orchestrator asked of it in a shared log so
//! tests can assert on it after the fake has been moved into the orchestrator.

#![allow(dead_code)]

use async_trait::async_trait;
use kazoo_common::time::{Clock, ManualClock};
use kazoo_common::{PitchEstimate, PitchFrame};
use kazoo_engine::analysis::{ExtractionInput, FeatureExtractor, PitchEstimator};
use kazoo_engine::capture::{
    CaptureBackend, CaptureBackendFactory, CaptureMode, CaptureOptions, CaptureSink,
    CaptureStarted, DeviceInfo, DeviceList,
};
use kazoo_engine::config::EngineConfig;
use kazoo_engine::pipeline::Collaborators;
use kazoo_engine::synth::{
    AutoTuneSettings, ContinuousSynth, EngineContext, Scale, SynthEngines, SynthesisEngine,
};
use kazoo_engine::{CaptureError, EngineOrchestrator, ExtractionError, SynthError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ----------------------------------------------------------------------
// Capture backend
// ----------------------------------------------------------------------

/// What the fake backend reports from `start()`
#[derive(Debug, Clone)]
pub struct BackendScript {
    pub mode: CaptureMode,
    pub buffer_size: u32,
    pub sample_rate: u32,
    pub fail_start: Option<CaptureError>,
    pub devices: DeviceList,
}

impl Default for BackendScript {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Realtime,
            buffer_size: 128,
            sample_rate: 48000,
            fail_start: None,
            devices: DeviceList {
                inputs: vec![
                    DeviceInfo {
                        id: "mic-0".to_string(),
                        label: "USB Microphone".to_string(),
                    },
                    DeviceInfo {
                        id: "mic-1".to_string(),
                        label: String::new(),
                    },
                ],
                outputs: vec![DeviceInfo {
                    id: "out-0".to_string(),
                    label: String::new(),
                }],
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct BackendLog {
    pub configured: Vec<CaptureOptions>,
    pub starts: usize,
    pub stops: usize,
    pub enumerations: usize,
    pub output_devices: Vec<String>,
    pub sinks: Vec<CaptureSink>,
}

pub struct FakeBackend {
    log: Arc<Mutex<BackendLog>>,
    script: Arc<Mutex<BackendScript>>,
    capturing: bool,
}

#[async_trait]
impl CaptureBackend for FakeBackend {
    fn configure(&mut self, options: &CaptureOptions) {
        self.log.lock().unwrap().configured.push(options.clone());
    }

    async fn start(&mut self, sink: CaptureSink) -> Result<CaptureStarted, CaptureError> {
        let script = self.script.lock().unwrap().clone();
        let mut log = self.log.lock().unwrap();
        log.starts += 1;
        log.sinks.push(sink);
        if let Some(err) = script.fail_start {
            return Err(err);
        }
        self.capturing = true;
        Ok(CaptureStarted {
            mode: script.mode,
            buffer_size: script.buffer_size,
            sample_rate: script.sample_rate,
        })
    }

    fn stop(&mut self) {
        self.capturing = false;
        self.log.lock().unwrap().stops += 1;
    }

    async fn enumerate_devices(&self) -> Result<DeviceList, CaptureError> {
        self.log.lock().unwrap().enumerations += 1;
        Ok(self.script.lock().unwrap().devices.clone())
    }

    fn set_output_device(&mut self, id: &str) -> Result<(), CaptureError> {
        self.log.lock().unwrap().output_devices.push(id.to_string());
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }
}

/// Handle on the fake backend shared with its factory
#[derive(Clone, Default)]
pub struct FakeCapture {
    pub log: Arc<Mutex<BackendLog>>,
    pub script: Arc<Mutex<BackendScript>>,
    pub created: Arc<AtomicUsize>,
}

impl FakeCapture {
    pub fn new(script: BackendScript) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            ..Default::default()
        }
    }

    pub fn factory(&self) -> Box<dyn CaptureBackendFactory> {
        let handle = self.clone();
        Box::new(move || -> Result<Box<dyn CaptureBackend>, CaptureError> {
            handle.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeBackend {
                log: Arc::clone(&handle.log),
                script: Arc::clone(&handle.script),
                capturing: false,
            }))
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.log.lock().unwrap().starts
    }

    pub fn stops(&self) -> usize {
        self.log.lock().unwrap().stops
    }

    /// Sink handed to the most recent `start()`
    pub fn last_sink(&self) -> CaptureSink {
        self.log
            .lock()
            .unwrap()
            .sinks
            .last()
            .cloned()
            .expect("backend was never started")
    }

    pub fn set_failure(&self, failure: Option<CaptureError>) {
        self.script.lock().unwrap().fail_start = failure;
    }
}

// ----------------------------------------------------------------------
// Synthesis engines
// ----------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct EngineLog {
    pub inits: Vec<EngineContext>,
    pub frames: Vec<PitchFrame>,
    pub estimates: Vec<PitchEstimate>,
    pub stops: usize,
    pub shutdowns: usize,
    pub instruments: Vec<String>,
    /// Output device changes after initialization
    pub output_devices: Vec<Option<String>>,
    pub auto_tune: Vec<AutoTuneSettings>,
    pub scales: Vec<Scale>,
    pub retune_speeds: Vec<f32>,
    pub reverb: Vec<f32>,
}

impl EngineLog {
    /// Frames plus estimates: everything routed to this engine
    pub fn received(&self) -> usize {
        self.frames.len() + self.estimates.len()
    }
}

pub struct RecordingEngine {
    log: Arc<Mutex<EngineLog>>,
    fail_init: Arc<AtomicBool>,
    frames_supported: bool,
    initialized: bool,
}

#[async_trait]
impl SynthesisEngine for RecordingEngine {
    async fn initialize(&mut self, context: &EngineContext) -> Result<(), SynthError> {
        self.log.lock().unwrap().inits.push(context.clone());
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(SynthError::Init("scripted failure".to_string()));
        }
        self.initialized = true;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn supports_frames(&self) -> bool {
        self.frames_supported
    }

    fn process_frame(&mut self, frame: &PitchFrame) {
        self.log.lock().unwrap().frames.push(frame.clone());
    }

    fn process_estimate(&mut self, estimate: &PitchEstimate) {
        self.log.lock().unwrap().estimates.push(estimate.clone());
    }

    fn stop(&mut self) {
        self.log.lock().unwrap().stops += 1;
    }

    fn change_instrument(&mut self, instrument: &str) {
        self.log.lock().unwrap().instruments.push(instrument.to_string());
    }

    async fn set_output_device(&mut self, device: Option<&str>) -> Result<(), SynthError> {
        self.log
            .lock()
            .unwrap()
            .output_devices
            .push(device.map(str::to_string));
        Ok(())
    }

    fn shutdown(&mut self) {
        self.initialized = false;
        self.log.lock().unwrap().shutdowns += 1;
    }
}

impl ContinuousSynth for RecordingEngine {
    fn set_auto_tune(&mut self, settings: &AutoTuneSettings) {
        self.log.lock().unwrap().auto_tune.push(*settings);
    }

    fn set_scale(&mut self, scale: Scale) {
        self.log.lock().unwrap().scales.push(scale);
    }

    fn set_retune_speed(&mut self, speed: f32) {
        self.log.lock().unwrap().retune_speeds.push(speed);
    }

    fn set_reverb_wet(&mut self, wet: f32) {
        self.log.lock().unwrap().reverb.push(wet);
    }
}

/// Test-side view of a recording engine
#[derive(Clone, Default)]
pub struct EngineHandle {
    pub log: Arc<Mutex<EngineLog>>,
    pub fail_init: Arc<AtomicBool>,
}

impl EngineHandle {
    pub fn engine(&self, frames_supported: bool) -> RecordingEngine {
        RecordingEngine {
            log: Arc::clone(&self.log),
            fail_init: Arc::clone(&self.fail_init),
            frames_supported,
            initialized: false,
        }
    }

    pub fn set_fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    pub fn received(&self) -> usize {
        self.log.lock().unwrap().received()
    }

    pub fn inits(&self) -> usize {
        self.log.lock().unwrap().inits.len()
    }

    pub fn stops(&self) -> usize {
        self.log.lock().unwrap().stops
    }
}

// ----------------------------------------------------------------------
// Analysis
// ----------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct EstimatorLog {
    pub initialized_at: Vec<u32>,
    pub detect_lengths: Vec<usize>,
}

/// Returns the same estimate for every buffer
pub struct ScriptedEstimator {
    log: Arc<Mutex<EstimatorLog>>,
    estimate: Option<PitchEstimate>,
    window: usize,
}

impl ScriptedEstimator {
    pub fn new(log: Arc<Mutex<EstimatorLog>>, estimate: Option<PitchEstimate>) -> Self {
        Self {
            log,
            estimate,
            window: 2048,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }
}

impl PitchEstimator for ScriptedEstimator {
    fn initialize(&mut self, sample_rate: u32) {
        self.log.lock().unwrap().initialized_at.push(sample_rate);
    }

    fn detect(&mut self, samples: &[f32], _volume: f32) -> Option<PitchEstimate> {
        self.log.lock().unwrap().detect_lengths.push(samples.len());
        self.estimate.clone()
    }

    fn window_size(&self) -> usize {
        self.window
    }
}

/// Fails every extraction
pub struct FailingExtractor {
    pub calls: Arc<AtomicUsize>,
}

impl FeatureExtractor for FailingExtractor {
    fn process(&mut self, _input: ExtractionInput<'_>) -> Result<PitchFrame, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ExtractionError("scripted extraction failure".to_string()))
    }
}

// ----------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------

pub const START_MS: f64 = 1000.0;

/// Orchestrator wired to fakes
pub struct Harness {
    pub orchestrator: EngineOrchestrator,
    pub capture: FakeCapture,
    pub continuous: EngineHandle,
    pub legacy: EngineHandle,
    pub estimator: Arc<Mutex<EstimatorLog>>,
    pub extractor_calls: Arc<AtomicUsize>,
    pub clock: Arc<ManualClock>,
}

pub struct HarnessBuilder {
    config: EngineConfig,
    script: BackendScript,
    estimate: Option<PitchEstimate>,
    estimator_window: usize,
    with_estimator: bool,
    failing_extractor: bool,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            script: BackendScript::default(),
            estimate: Some(PitchEstimate::new(220.0, 0.95, -12.0)),
            estimator_window: 2048,
            with_estimator: true,
            failing_extractor: false,
        }
    }

    pub fn config(mut self, f: impl FnOnce(&mut EngineConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn script(mut self, f: impl FnOnce(&mut BackendScript)) -> Self {
        f(&mut self.script);
        self
    }

    pub fn buffered(self) -> Self {
        self.script(|s| {
            s.mode = CaptureMode::Buffered;
            s.buffer_size = 2048;
            s.sample_rate = 44100;
        })
    }

    pub fn estimate(mut self, estimate: Option<PitchEstimate>) -> Self {
        self.estimate = estimate;
        self
    }

    /// Samples the scripted estimator asks for per block
    pub fn estimator_window(mut self, window: usize) -> Self {
        self.estimator_window = window;
        self
    }

    pub fn without_estimator(mut self) -> Self {
        self.with_estimator = false;
        self
    }

    pub fn failing_extractor(mut self) -> Self {
        self.failing_extractor = true;
        self
    }

    pub fn build(self) -> Harness {
        let capture = FakeCapture::new(self.script);
        let continuous = EngineHandle::default();
        let legacy = EngineHandle::default();
        let estimator_log = Arc::new(Mutex::new(EstimatorLog::default()));
        let extractor_calls = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(ManualClock::new(START_MS));

        let estimator: Option<Box<dyn PitchEstimator>> = if self.with_estimator {
            Some(Box::new(
                ScriptedEstimator::new(Arc::clone(&estimator_log), self.estimate)
                    .with_window(self.estimator_window),
            ))
        } else {
            None
        };
        let extractor: Option<Box<dyn FeatureExtractor>> = if self.failing_extractor {
            Some(Box::new(FailingExtractor {
                calls: Arc::clone(&extractor_calls),
            }))
        } else {
            None
        };

        let engines = SynthEngines::new(
            Box::new(continuous.engine(true)),
            Box::new(legacy.engine(false)),
        );
        let shared_clock: Arc<dyn Clock> = clock.clone();
        let orchestrator = EngineOrchestrator::new(
            &self.config,
            Collaborators {
                backend_factory: capture.factory(),
                engines,
                estimator,
                extractor,
                clock: shared_clock,
            },
        );

        Harness {
            orchestrator,
            capture,
            continuous,
            legacy,
            estimator: estimator_log,
            extractor_calls,
            clock,
        }
    }
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A voiced 220 Hz frame stamped at `timestamp`
pub fn frame_at(timestamp: f64) -> PitchFrame {
    PitchFrame::new(220.0, 0.95, -12.0, timestamp)
}

/// One block of a 220 Hz sine
pub fn sine_block(len: usize, sample_rate: u32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            (2.0 * std::f32::consts::PI * 220.0 * i as f32 / sample_rate as f32).sin() * 0.5
        })
        .collect()
}
