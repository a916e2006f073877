//! Engine orchestrator
//!
//! Owns the capture backend and both synthesis engines, runs the lifecycle
//! state machine, negotiates buffer sizes with the backend, and routes every
//! captured frame to the active engine, the visualizer and the latency
//! tracker.
//!
//! # Lifecycle
//!
//! ```text
//! Idle/Error --start()--> Starting --ok--> Running --stop()--> Stopping --> Idle
//!                            |
//!                            +--failure (backend stopped first)--> Error
//! ```
//!
//! # Cancellation
//!
//! Each `start()` hands the backend a sink tagged with a new session token.
//! `stop()` and failed starts advance the token, so every message already
//! queued by an earlier session is discarded by [`EngineOrchestrator::dispatch`].

use super::latency::{summarize_shared, LatencySummary, LatencyTracker, SharedLatency};
use super::telemetry::{DisplayFields, ProcessingMonitor, ProcessingStats};
use super::visualizer::PitchVisualizer;
use crate::analysis::{rms, ExtractionInput, FeatureExtractor, PitchEstimator};
use crate::capture::{
    CaptureBackend, CaptureBackendFactory, CaptureMessage, CaptureMode, CaptureOptions,
    CaptureSink, CaptureStarted, DeviceList, SessionMessage,
};
use crate::config::EngineConfig;
use crate::error::{CaptureError, Error, ExtractionError, Result, SynthError};
use crate::synth::{
    AutoTuneSettings, EngineContext, EngineMode, Scale, SynthEngines, SynthesisEngine,
};
use kazoo_common::events::{EngineEvent, EventBus, LifecycleState};
use kazoo_common::time::Clock;
use kazoo_common::PitchFrame;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, trace, warn};

/// Externally constructed collaborators handed to the orchestrator
pub struct Collaborators {
    pub backend_factory: Box<dyn CaptureBackendFactory>,
    pub engines: SynthEngines,
    /// Required for buffered capture
    pub estimator: Option<Box<dyn PitchEstimator>>,
    pub extractor: Option<Box<dyn FeatureExtractor>>,
    pub clock: Arc<dyn Clock>,
}

pub struct EngineOrchestrator {
    capture_options: CaptureOptions,
    factory: Box<dyn CaptureBackendFactory>,
    backend: Option<Box<dyn CaptureBackend>>,
    engines: SynthEngines,
    mode: EngineMode,
    estimator: Option<Box<dyn PitchEstimator>>,
    estimator_rate: Option<u32>,
    extractor: Option<Box<dyn FeatureExtractor>>,
    clock: Arc<dyn Clock>,

    state: LifecycleState,
    session: u64,
    negotiated: Option<CaptureStarted>,
    tx: mpsc::UnboundedSender<SessionMessage>,
    rx: mpsc::UnboundedReceiver<SessionMessage>,

    latency: SharedLatency,
    visualizer: PitchVisualizer,
    monitor: ProcessingMonitor,
    display_tx: watch::Sender<DisplayFields>,
    events: EventBus,
    extraction_failures: u64,

    output_device: Option<String>,
    instrument: String,
    volume: f32,
    auto_tune: AutoTuneSettings,
    reverb_wet: f32,
}

impl EngineOrchestrator {
    pub fn new(config: &EngineConfig, parts: Collaborators) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (display_tx, _) = watch::channel(DisplayFields::stopped());
        let mut engines = parts.engines;
        engines.continuous.set_auto_tune(&config.auto_tune);

        Self {
            capture_options: config.capture.clone(),
            factory: parts.backend_factory,
            backend: None,
            engines,
            mode: config.engine_mode,
            estimator: parts.estimator,
            estimator_rate: None,
            extractor: parts.extractor,
            clock: Arc::clone(&parts.clock),
            state: LifecycleState::Idle,
            session: 0,
            negotiated: None,
            tx,
            rx,
            latency: Arc::new(Mutex::new(LatencyTracker::new())),
            visualizer: PitchVisualizer::default(),
            monitor: ProcessingMonitor::new(parts.clock),
            display_tx,
            events: EventBus::new(64),
            extraction_failures: 0,
            output_device: config.output_device.clone(),
            instrument: config.instrument.clone(),
            volume: config.volume,
            auto_tune: config.auto_tune,
            reverb_wet: 0.0,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start capture and synthesis
    ///
    /// Reuses the capture backend across sessions; it is built by the factory
    /// only on the first call. Returns the negotiated capture parameters.
    ///
    /// # Errors
    ///
    /// Capture or engine initialization failures leave the orchestrator in
    /// `Error` with the backend stopped. `start()` may be retried from there.
    pub async fn start(&mut self) -> Result<CaptureStarted> {
        match self.state {
            LifecycleState::Running => {
                if let Some(started) = self.negotiated {
                    debug!("start() while running, keeping current session {}", self.session);
                    return Ok(started);
                }
            }
            LifecycleState::Starting | LifecycleState::Stopping => {
                return Err(Error::InvalidState(format!(
                    "Cannot start while {}",
                    self.state
                )));
            }
            LifecycleState::Idle | LifecycleState::Error => {}
        }

        self.transition(LifecycleState::Starting);
        self.session += 1;
        let session = self.session;

        match self.start_session(session).await {
            Ok(started) => {
                self.negotiated = Some(started);
                self.transition(LifecycleState::Running);
                self.events.emit_lossy(EngineEvent::CaptureStarted {
                    mode: started.mode,
                    buffer_size: started.buffer_size,
                    sample_rate: started.sample_rate,
                });
                info!(
                    "Engine running: session={}, capture={}, buffer={} frames @ {} Hz, synth={}",
                    self.session, started.mode, started.buffer_size, started.sample_rate, self.mode
                );
                Ok(started)
            }
            Err(err) => {
                self.teardown_capture();
                self.active_engine_stop();
                // Anything the failed session already queued is stale
                self.session += 1;
                self.negotiated = None;
                self.transition(LifecycleState::Error);

                let message = err.user_message();
                error!("Engine start failed: {}", err);
                self.events.emit_lossy(EngineEvent::StartFailed {
                    message: message.clone(),
                });
                self.publish_status(format!("Error: {}", message));
                Err(err)
            }
        }
    }

    async fn start_session(&mut self, session: u64) -> Result<CaptureStarted> {
        // (1) Construct once, configure every session
        if self.backend.is_none() {
            let backend = self.factory.create()?;
            info!("Capture backend created");
            self.backend = Some(backend);
        }
        let mut options = self.capture_options.clone();
        if let Some(device) = self.output_device.clone() {
            self.backend_mut()?.set_output_device(&device)?;
        }

        // (2) Start capture and negotiate from what the backend reports
        let mut negotiated = self.start_backend(session, &options).await?;

        // (3) Buffered blocks must cover the estimator's analysis window
        if !negotiated.mode.delivers_frames() {
            let mut required = self.prepare_estimator(negotiated.sample_rate)?;
            if (negotiated.buffer_size as usize) < required {
                warn!(
                    "Blocks of {} samples at {} Hz are shorter than the {}-sample pitch window, restarting capture",
                    negotiated.buffer_size, negotiated.sample_rate, required
                );
                self.teardown_capture();
                // Blocks already queued by the short-block stream are stale
                self.session += 1;
                options.buffer_size = u32::try_from(required).unwrap_or(u32::MAX);
                negotiated = self.start_backend(self.session, &options).await?;
                required = self.prepare_estimator(negotiated.sample_rate)?;
            }
            if !negotiated.mode.delivers_frames() && (negotiated.buffer_size as usize) < required {
                return Err(Error::EngineInit(format!(
                    "capture blocks of {} samples at {} Hz are too short for pitch detection (need {})",
                    negotiated.buffer_size, negotiated.sample_rate, required
                )));
            }
            if let Some(extractor) = self.extractor.as_mut() {
                extractor.prepare(negotiated.sample_rate);
            }
        }

        // (4) Active engine against the final parameters
        let context = EngineContext {
            capture_mode: negotiated.mode,
            sample_rate: negotiated.sample_rate,
            buffer_size: negotiated.buffer_size,
            instrument: self.instrument.clone(),
            output_device: self.output_device.clone(),
            volume: self.volume,
        };
        let initialized = match self.mode {
            EngineMode::Continuous => {
                initialize_engine(self.engines.continuous.as_mut(), &context).await
            }
            EngineMode::Legacy => initialize_engine(self.engines.legacy.as_mut(), &context).await,
        };
        initialized?;

        self.monitor.configure(negotiated.buffer_size, negotiated.sample_rate);
        self.extraction_failures = 0;
        Ok(negotiated)
    }

    fn backend_mut(&mut self) -> Result<&mut Box<dyn CaptureBackend>> {
        self.backend
            .as_mut()
            .ok_or_else(|| Error::InvalidState("capture backend missing".to_string()))
    }

    async fn start_backend(
        &mut self,
        session: u64,
        options: &CaptureOptions,
    ) -> Result<CaptureStarted> {
        let sink = CaptureSink::new(session, self.tx.clone());
        let backend = self.backend_mut()?;
        backend.configure(options);
        let reported = backend.start(sink).await?;

        let buffer_size = if reported.buffer_size > 0 {
            reported.buffer_size
        } else {
            options.buffer_size_for(reported.mode)
        };
        let sample_rate = if reported.sample_rate > 0 {
            reported.sample_rate
        } else {
            options.sample_rate
        };
        if reported.buffer_size != options.requested_buffer_size() {
            debug!(
                "Buffer negotiation: requested {}, backend reported {}, using {}",
                options.requested_buffer_size(),
                reported.buffer_size,
                buffer_size
            );
        }
        Ok(CaptureStarted {
            mode: reported.mode,
            buffer_size,
            sample_rate,
        })
    }

    /// Initialize the buffered-path estimator once per sample rate
    ///
    /// Returns the number of samples it needs per block.
    fn prepare_estimator(&mut self, sample_rate: u32) -> Result<usize> {
        let estimator = self.estimator.as_mut().ok_or_else(|| {
            Error::EngineInit("buffered capture requires a pitch estimator".to_string())
        })?;
        if self.estimator_rate != Some(sample_rate) {
            estimator.initialize(sample_rate);
            self.estimator_rate = Some(sample_rate);
            debug!("Pitch estimator initialized at {} Hz", sample_rate);
        }
        Ok(estimator.window_size())
    }

    /// Stop capture and synthesis
    ///
    /// Safe from any state. Once this returns, no frame from the stopped
    /// session reaches a synthesis engine.
    pub fn stop(&mut self) {
        match self.state {
            LifecycleState::Idle => return,
            LifecycleState::Error => {
                self.transition(LifecycleState::Idle);
                self.publish_stopped();
                return;
            }
            _ => {}
        }

        self.transition(LifecycleState::Stopping);
        self.session += 1;
        self.teardown_capture();
        self.active_engine_stop();
        self.negotiated = None;
        self.transition(LifecycleState::Idle);
        self.publish_stopped();
        info!("Engine stopped");
    }

    /// Stop and release every audio resource
    pub fn shutdown(&mut self) {
        self.stop();
        self.engines.continuous.shutdown();
        self.engines.legacy.shutdown();
        self.backend = None;
    }

    fn teardown_capture(&mut self) {
        if let Some(backend) = self.backend.as_mut() {
            backend.stop();
        }
    }

    fn active_engine_stop(&mut self) {
        match self.mode {
            EngineMode::Continuous => self.engines.continuous.stop(),
            EngineMode::Legacy => self.engines.legacy.stop(),
        }
    }

    fn transition(&mut self, to: LifecycleState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        debug!("Lifecycle: {} -> {}", from, to);
        self.events.emit_lossy(EngineEvent::StateChanged { from, to });
        if to == LifecycleState::Running {
            self.publish_status(format!("Running ({})", self.mode));
        }
    }

    fn publish_status(&self, status: String) {
        self.display_tx.send_modify(|fields| fields.status_text = status);
    }

    fn publish_stopped(&self) {
        self.display_tx.send_replace(DisplayFields::stopped());
    }

    // ------------------------------------------------------------------
    // Frame handling
    // ------------------------------------------------------------------

    /// Handle one message from the capture backend
    ///
    /// Returns false when the message was discarded (not running, stale
    /// session, or not valid for the negotiated capture mode).
    pub fn dispatch(&mut self, msg: SessionMessage) -> bool {
        if self.state != LifecycleState::Running || msg.session != self.session {
            trace!(
                "Discarding message from session {} (current {}, {})",
                msg.session,
                self.session,
                self.state
            );
            return false;
        }
        let Some(mode) = self.negotiated.map(|n| n.mode) else {
            return false;
        };

        match msg.message {
            CaptureMessage::RawBuffer {
                samples,
                captured_at,
            } => {
                if mode != CaptureMode::Buffered {
                    debug!("Ignoring raw buffer in {} session", mode);
                    return false;
                }
                self.handle_raw_buffer(&samples, captured_at);
            }
            CaptureMessage::Frame(frame) => {
                if mode != CaptureMode::Realtime {
                    debug!("Ignoring pre-computed frame in {} session", mode);
                    return false;
                }
                self.monitor.start_processing();
                self.process_frame(frame);
                self.monitor.end_processing();
            }
            CaptureMessage::Error(err) => self.handle_capture_fault(err),
        }
        true
    }

    /// Dispatch everything already queued; returns how many were handled
    pub fn drain_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(msg) = self.rx.try_recv() {
            if self.dispatch(msg) {
                handled += 1;
            }
        }
        handled
    }

    /// Wait for the next capture message
    pub async fn next_message(&mut self) -> Option<SessionMessage> {
        self.rx.recv().await
    }

    fn handle_raw_buffer(&mut self, samples: &[f32], captured_at: f64) {
        self.monitor.start_processing();

        let volume = rms(samples);
        let estimate = self
            .estimator
            .as_mut()
            .and_then(|estimator| estimator.detect(samples, volume));

        if let Some(estimate) = estimate {
            let extracted = self.extractor.as_mut().map(|extractor| {
                extractor.process(ExtractionInput {
                    estimate: &estimate,
                    samples,
                    timestamp: captured_at,
                })
            });
            let frame = match extracted {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => {
                    self.note_extraction_failure(&err);
                    PitchFrame::from_estimate(&estimate, captured_at)
                }
                None => PitchFrame::from_estimate(&estimate, captured_at),
            };
            self.process_frame(frame);
        }

        self.monitor.end_processing();
    }

    fn note_extraction_failure(&mut self, err: &ExtractionError) {
        self.extraction_failures += 1;
        if self.extraction_failures == 1 {
            warn!("{}; continuing with bare pitch estimates", err);
            self.events.emit_lossy(EngineEvent::ExtractionDegraded {
                count: self.extraction_failures,
            });
        } else {
            debug!("{} ({} this session)", err, self.extraction_failures);
        }
    }

    /// Per-frame steps shared by both capture paths
    fn process_frame(&mut self, frame: PitchFrame) {
        let received_at = self.clock.now_ms();
        let latency = frame
            .has_capture_timestamp()
            .then(|| received_at - frame.capture_timestamp);

        self.apply_frame(&frame, latency);

        match self.mode {
            EngineMode::Continuous => route_frame(self.engines.continuous.as_mut(), &frame),
            EngineMode::Legacy => route_frame(self.engines.legacy.as_mut(), &frame),
        }

        self.visualizer.push(&frame, received_at);

        if let Some(value) = latency {
            self.latency
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(value);
        }
    }

    /// The only per-frame writer of display fields
    fn apply_frame(&self, frame: &PitchFrame, latency: Option<f64>) {
        let frequency_text = if frame.frequency > 0.0 {
            format!("{:.1} Hz", frame.frequency)
        } else {
            "-- Hz".to_string()
        };
        let confidence_percent = (frame.confidence.clamp(0.0, 1.0) * 100.0).round() as u8;

        self.display_tx.send_modify(|fields| {
            fields.note_label = frame.label();
            fields.frequency_text = frequency_text;
            fields.confidence_percent = confidence_percent;
            if latency.is_some() {
                fields.latency_ms = latency;
            }
        });
    }

    fn handle_capture_fault(&mut self, err: CaptureError) {
        error!("Capture fault: {}", err);
        self.events.emit_lossy(EngineEvent::CaptureFault {
            message: err.to_string(),
        });

        self.session += 1;
        self.teardown_capture();
        self.active_engine_stop();
        self.negotiated = None;
        self.transition(LifecycleState::Error);
        self.publish_status(format!("Error: {}", Error::Capture(err).user_message()));
    }

    // ------------------------------------------------------------------
    // Mode, devices, instrument
    // ------------------------------------------------------------------

    /// Select the synthesis engine variant
    ///
    /// # Errors
    ///
    /// Rejected with `InvalidState` unless Idle or Error; the active engine
    /// is left unchanged.
    pub fn set_mode(&mut self, mode: EngineMode) -> Result<()> {
        if !self.state.can_start() {
            warn!("Mode switch to {} rejected while {}", mode, self.state);
            return Err(Error::InvalidState(
                "Stop the engine before switching synthesis mode".to_string(),
            ));
        }
        if mode == self.mode {
            return Ok(());
        }

        // Release the outgoing engine's output before the other one opens
        match self.mode {
            EngineMode::Continuous => self.engines.continuous.shutdown(),
            EngineMode::Legacy => self.engines.legacy.shutdown(),
        }
        self.mode = mode;
        info!("Synthesis mode: {}", mode);
        self.events.emit_lossy(EngineEvent::ModeChanged { mode });
        Ok(())
    }

    /// Enumerate devices via the existing backend, or a temporary one
    pub async fn refresh_devices(&mut self) -> Result<DeviceList> {
        let list = match self.backend.as_ref() {
            Some(backend) => backend.enumerate_devices().await?,
            None => {
                let temporary = self.factory.create()?;
                temporary.enumerate_devices().await?
            }
        };
        debug!(
            "Devices: {} inputs, {} outputs",
            list.inputs.len(),
            list.outputs.len()
        );
        Ok(list.with_placeholder_labels())
    }

    /// Choose the input device for the next `start()` (None = default)
    pub fn select_input_device(&mut self, id: Option<String>) {
        info!(
            "Input device selected: {} (applies on next start)",
            id.as_deref().unwrap_or("default")
        );
        self.capture_options.input_device = id;
    }

    /// Choose the output device
    ///
    /// An initialized engine moves its sound to the new device immediately,
    /// whether or not capture is running.
    pub async fn select_output_device(&mut self, id: Option<String>) -> Result<()> {
        if self.state == LifecycleState::Running {
            if let (Some(backend), Some(device)) = (self.backend.as_mut(), id.as_deref()) {
                backend.set_output_device(device)?;
            }
        }
        retarget_output(self.engines.continuous.as_mut(), id.as_deref()).await?;
        retarget_output(self.engines.legacy.as_mut(), id.as_deref()).await?;
        info!("Output device selected: {}", id.as_deref().unwrap_or("default"));
        self.output_device = id;
        Ok(())
    }

    /// Change the instrument; reaches the active engine once it is initialized
    pub fn change_instrument(&mut self, instrument: &str) {
        self.instrument = instrument.to_string();
        match self.mode {
            EngineMode::Continuous if self.engines.continuous.is_initialized() => {
                self.engines.continuous.change_instrument(instrument)
            }
            EngineMode::Legacy if self.engines.legacy.is_initialized() => {
                self.engines.legacy.change_instrument(instrument)
            }
            _ => debug!("Instrument {} applies at engine initialization", instrument),
        }
    }

    // ------------------------------------------------------------------
    // Continuous engine parameters
    // ------------------------------------------------------------------

    /// Set the auto-tune scale from a key and scale name
    pub fn set_scale(&mut self, key: &str, scale: &str) -> Result<()> {
        let parsed = Scale::parse(key, scale).ok_or_else(|| {
            Error::Common(kazoo_common::Error::InvalidInput(format!(
                "unknown key/scale '{} {}'",
                key, scale
            )))
        })?;
        self.auto_tune.scale = parsed;
        self.engines.continuous.set_scale(parsed);
        info!("Auto-tune scale: {}", parsed);
        Ok(())
    }

    pub fn set_retune_speed(&mut self, speed: f32) {
        self.auto_tune.speed = speed.clamp(0.0, 1.0);
        self.engines.continuous.set_retune_speed(self.auto_tune.speed);
    }

    pub fn set_reverb_wet(&mut self, wet: f32) {
        self.reverb_wet = wet.clamp(0.0, 1.0);
        self.engines.continuous.set_reverb_wet(self.reverb_wet);
    }

    pub fn set_auto_tune(&mut self, settings: AutoTuneSettings) {
        self.auto_tune = settings;
        self.engines.continuous.set_auto_tune(&settings);
    }

    /// Flip auto-tune strength between 0 and 1
    ///
    /// A strength above one half counts as on, so partial correction toggles
    /// to full. Only allowed while the continuous engine is the active
    /// engine. Returns the new strength.
    pub fn toggle_auto_tune(&mut self) -> Result<f32> {
        if self.mode != EngineMode::Continuous {
            return Err(Error::InvalidState(
                "Auto-tune is only available in continuous mode".to_string(),
            ));
        }
        let strength = if self.auto_tune.effective_strength() > 0.5 {
            0.0
        } else {
            1.0
        };
        self.auto_tune.strength = strength;
        self.auto_tune.enabled = strength > 0.0;
        self.engines.continuous.set_auto_tune(&self.auto_tune);
        info!("Auto-tune {}", if strength > 0.0 { "on" } else { "off" });
        self.events.emit_lossy(EngineEvent::AutoTuneToggled { strength });
        Ok(strength)
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// Current session token
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Negotiated capture parameters of the running session
    pub fn negotiated(&self) -> Option<CaptureStarted> {
        self.negotiated
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    pub fn latency_summary(&self) -> LatencySummary {
        summarize_shared(&self.latency)
    }

    /// Shared tracker for monitoring views on other tasks
    pub fn latency_handle(&self) -> SharedLatency {
        Arc::clone(&self.latency)
    }

    pub fn processing_stats(&self) -> ProcessingStats {
        self.monitor.stats()
    }

    pub fn visualizer(&self) -> &PitchVisualizer {
        &self.visualizer
    }

    /// Mutable access for resizing the drawing surface
    pub fn visualizer_mut(&mut self) -> &mut PitchVisualizer {
        &mut self.visualizer
    }

    pub fn display(&self) -> watch::Receiver<DisplayFields> {
        self.display_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn auto_tune(&self) -> AutoTuneSettings {
        self.auto_tune
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn input_device(&self) -> Option<&str> {
        self.capture_options.input_device.as_deref()
    }

    pub fn output_device(&self) -> Option<&str> {
        self.output_device.as_deref()
    }

    pub fn extraction_failures(&self) -> u64 {
        self.extraction_failures
    }
}

impl Drop for EngineOrchestrator {
    fn drop(&mut self) {
        self.teardown_capture();
    }
}

async fn initialize_engine<E>(
    engine: &mut E,
    context: &EngineContext,
) -> std::result::Result<(), SynthError>
where
    E: SynthesisEngine + ?Sized,
{
    if engine.is_initialized() {
        return Ok(());
    }
    engine.initialize(context).await
}

async fn retarget_output<E>(
    engine: &mut E,
    device: Option<&str>,
) -> std::result::Result<(), SynthError>
where
    E: SynthesisEngine + ?Sized,
{
    if !engine.is_initialized() {
        return Ok(());
    }
    engine.set_output_device(device).await
}

/// Canonical entry point when supported, bare estimate otherwise
fn route_frame<E>(engine: &mut E, frame: &PitchFrame)
where
    E: SynthesisEngine + ?Sized,
{
    if engine.supports_frames() {
        engine.process_frame(frame);
    } else {
        engine.process_estimate(&frame.to_estimate());
    }
}
