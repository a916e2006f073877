//! Microphone capture using cpal
//!
//! The input stream is owned by a dedicated thread (see [`crate::device`]).
//! The data callback downmixes to mono and either forwards fixed-size raw
//! blocks (Buffered) or runs an injected analyzer over a sliding window and
//! forwards finished pitch frames (Realtime). The callback never blocks,
//! never logs, and only talks to the orchestrator through the sink.

use super::{
    CaptureBackend, CaptureMode, CaptureOptions, CaptureSink, CaptureStarted, DeviceInfo,
    DeviceList,
};
use crate::analysis::{rms, ExtractionInput, FeatureExtractor, PitchEstimator};
use crate::device::{device_names, find_device, DeviceDirection, StreamThread};
use crate::error::CaptureError;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig, SupportedBufferSize};
use kazoo_common::time::Clock;
use kazoo_common::PitchFrame;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Analysis stages run on the audio thread in real-time mode
pub struct RealtimeAnalyzer {
    pub estimator: Box<dyn PitchEstimator>,
    pub extractor: Option<Box<dyn FeatureExtractor>>,
}

/// Builds a fresh analyzer for each capture session
pub type AnalyzerFactory = Arc<dyn Fn() -> RealtimeAnalyzer + Send + Sync>;

/// cpal-backed capture backend
pub struct CpalCapture {
    options: CaptureOptions,
    clock: Arc<dyn Clock>,
    analyzer: Option<AnalyzerFactory>,
    output_device: Option<String>,
    thread: Option<StreamThread>,
}

impl CpalCapture {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            options: CaptureOptions::default(),
            clock,
            analyzer: None,
            output_device: None,
            thread: None,
        }
    }

    /// Enable real-time mode by supplying the analysis to run on the audio thread
    pub fn with_realtime_analyzer(mut self, factory: AnalyzerFactory) -> Self {
        self.analyzer = Some(factory);
        self
    }

    pub fn output_device(&self) -> Option<&str> {
        self.output_device.as_deref()
    }

    /// Mode this backend will run in for the configured options
    fn resolve_mode(&self) -> Result<CaptureMode, CaptureError> {
        if !self.options.prefer_realtime {
            return Ok(CaptureMode::Buffered);
        }
        if self.analyzer.is_some() {
            return Ok(CaptureMode::Realtime);
        }
        if self.options.allow_fallback {
            debug!("No real-time analyzer available, falling back to buffered capture");
            Ok(CaptureMode::Buffered)
        } else {
            Err(CaptureError::Unsupported(
                "real-time capture requested but no analyzer is available".to_string(),
            ))
        }
    }
}

#[async_trait]
impl CaptureBackend for CpalCapture {
    fn configure(&mut self, options: &CaptureOptions) {
        self.options = options.clone();
    }

    async fn start(&mut self, sink: CaptureSink) -> Result<CaptureStarted, CaptureError> {
        self.stop();

        let mode = self.resolve_mode()?;
        let requested = self.options.buffer_size_for(mode);
        let processor = match (mode, self.analyzer.as_ref()) {
            (CaptureMode::Realtime, Some(factory)) => {
                InputProcessor::realtime(requested as usize, factory(), sink.clone(), self.clock.clone())
            }
            _ => InputProcessor::buffered(requested as usize, sink.clone(), self.clock.clone()),
        };

        let device_name = self.options.input_device.clone();
        let sample_rate = self.options.sample_rate;

        let (thread, started) = StreamThread::spawn(
            "kazoo-capture",
            move || {
                build_input(
                    device_name.as_deref(),
                    sample_rate,
                    requested,
                    mode,
                    processor,
                    sink,
                )
            },
            CaptureError::StreamFailed,
        )
        .await?;

        info!(
            "Capture started: mode={}, buffer_size={}, sample_rate={}",
            started.mode, started.buffer_size, started.sample_rate
        );
        self.thread = Some(thread);
        Ok(started)
    }

    fn stop(&mut self) {
        if let Some(mut thread) = self.thread.take() {
            thread.stop();
            info!("Capture stopped");
        }
    }

    async fn enumerate_devices(&self) -> Result<DeviceList, CaptureError> {
        let to_info = |name: String| DeviceInfo {
            id: name.clone(),
            label: name,
        };
        let inputs = device_names(DeviceDirection::Input).map_err(CaptureError::DeviceUnavailable)?;
        let outputs =
            device_names(DeviceDirection::Output).map_err(CaptureError::DeviceUnavailable)?;
        Ok(DeviceList {
            inputs: inputs.into_iter().map(to_info).collect(),
            outputs: outputs.into_iter().map(to_info).collect(),
        })
    }

    fn set_output_device(&mut self, id: &str) -> Result<(), CaptureError> {
        // Capture has no monitoring output; the id is kept for reporting only
        self.output_device = Some(id.to_string());
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn classify_build_error(message: String) -> CaptureError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("not permitted") || lower.contains("denied") {
        CaptureError::PermissionDenied(message)
    } else if lower.contains("not available") || lower.contains("busy") {
        CaptureError::DeviceUnavailable(message)
    } else {
        CaptureError::StreamFailed(message)
    }
}

/// Runs on the capture thread: open the device and start the stream
fn build_input(
    device_name: Option<&str>,
    sample_rate: u32,
    requested_buffer: u32,
    mode: CaptureMode,
    processor: InputProcessor,
    sink: CaptureSink,
) -> Result<(cpal::Stream, CaptureStarted), CaptureError> {
    let (device, _name) = find_device(DeviceDirection::Input, device_name).ok_or_else(|| {
        match device_name {
            Some(name) => CaptureError::DeviceNotFound(name.to_string()),
            None => CaptureError::DeviceNotFound("default input".to_string()),
        }
    })?;

    let default = device
        .default_input_config()
        .map_err(|e| classify_build_error(format!("Failed to get default input config: {}", e)))?;
    let sample_format = default.sample_format();

    // Prefer the requested rate when the device supports it in the default format
    let supported = device
        .supported_input_configs()
        .ok()
        .and_then(|mut configs| {
            configs.find(|c| {
                c.sample_format() == sample_format
                    && c.channels() == default.channels()
                    && c.min_sample_rate().0 <= sample_rate
                    && c.max_sample_rate().0 >= sample_rate
            })
        })
        .map(|c| c.with_sample_rate(cpal::SampleRate(sample_rate)))
        .unwrap_or(default);

    let mut config: StreamConfig = supported.config();
    let reported_buffer = match supported.buffer_size() {
        SupportedBufferSize::Range { min, max } if *min <= requested_buffer && requested_buffer <= *max => {
            config.buffer_size = cpal::BufferSize::Fixed(requested_buffer);
            requested_buffer
        }
        _ => {
            warn!(
                "Device does not accept a fixed buffer of {} frames, using its default",
                requested_buffer
            );
            0
        }
    };

    debug!(
        "Input config: sample_rate={}, channels={}, format={:?}, buffer_size={:?}",
        config.sample_rate.0, config.channels, sample_format, config.buffer_size
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, processor, sink)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, processor, sink)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, processor, sink)?,
        other => {
            return Err(CaptureError::Unsupported(format!(
                "input sample format {:?}",
                other
            )))
        }
    };

    stream
        .play()
        .map_err(|e| classify_build_error(format!("Failed to start input stream: {}", e)))?;

    Ok((
        stream,
        CaptureStarted {
            mode,
            buffer_size: reported_buffer,
            sample_rate: config.sample_rate.0,
        },
    ))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut processor: InputProcessor,
    sink: CaptureSink,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    processor.prepare(config.sample_rate.0);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                processor.push_interleaved(data, channels);
            },
            move |err| {
                sink.error(CaptureError::StreamFailed(err.to_string()));
            },
            None,
        )
        .map_err(|e| classify_build_error(format!("Failed to build input stream: {}", e)))
}

/// Per-callback work of the capture stream
enum ProcessorMode {
    Buffered {
        block: Vec<f32>,
        block_started: f64,
    },
    Realtime {
        analyzer: RealtimeAnalyzer,
        window: VecDeque<f32>,
        scratch: Vec<f32>,
        since_last: usize,
    },
}

pub(crate) struct InputProcessor {
    mode: ProcessorMode,
    block_size: usize,
    sink: CaptureSink,
    clock: Arc<dyn Clock>,
}

impl InputProcessor {
    pub(crate) fn buffered(block_size: usize, sink: CaptureSink, clock: Arc<dyn Clock>) -> Self {
        let block_size = block_size.max(1);
        Self {
            mode: ProcessorMode::Buffered {
                block: Vec::with_capacity(block_size),
                block_started: 0.0,
            },
            block_size,
            sink,
            clock,
        }
    }

    pub(crate) fn realtime(
        hop_size: usize,
        analyzer: RealtimeAnalyzer,
        sink: CaptureSink,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let window_size = analyzer.estimator.window_size().max(1);
        Self {
            mode: ProcessorMode::Realtime {
                analyzer,
                window: VecDeque::with_capacity(window_size),
                scratch: Vec::with_capacity(window_size),
                since_last: 0,
            },
            block_size: hop_size.max(1),
            sink,
            clock,
        }
    }

    pub(crate) fn prepare(&mut self, sample_rate: u32) {
        if let ProcessorMode::Realtime { analyzer, .. } = &mut self.mode {
            analyzer.estimator.initialize(sample_rate);
            if let Some(extractor) = analyzer.extractor.as_mut() {
                extractor.prepare(sample_rate);
            }
        }
    }

    pub(crate) fn push_interleaved<T>(&mut self, data: &[T], channels: usize)
    where
        T: Sample,
        f32: FromSample<T>,
    {
        let now = self.clock.now_ms();
        for frame in data.chunks(channels) {
            let sum: f32 = frame.iter().map(|s| s.to_sample::<f32>()).sum();
            self.push_sample(sum / frame.len() as f32, now);
        }
    }

    fn push_sample(&mut self, sample: f32, now: f64) {
        match &mut self.mode {
            ProcessorMode::Buffered {
                block,
                block_started,
            } => {
                if block.is_empty() {
                    *block_started = now;
                }
                block.push(sample);
                if block.len() >= self.block_size {
                    let full = std::mem::replace(block, Vec::with_capacity(self.block_size));
                    self.sink.raw_buffer(full, *block_started);
                }
            }
            ProcessorMode::Realtime {
                analyzer,
                window,
                scratch,
                since_last,
            } => {
                let window_size = analyzer.estimator.window_size().max(1);
                if window.len() >= window_size {
                    window.pop_front();
                }
                window.push_back(sample);
                *since_last += 1;

                if *since_last >= self.block_size && window.len() >= window_size {
                    *since_last = 0;
                    scratch.clear();
                    scratch.extend(window.iter().copied());
                    if let Some(frame) = analyze(analyzer, scratch, now) {
                        self.sink.frame(frame);
                    }
                }
            }
        }
    }
}

fn analyze(analyzer: &mut RealtimeAnalyzer, samples: &[f32], timestamp: f64) -> Option<PitchFrame> {
    let volume = rms(samples);
    let estimate = analyzer.estimator.detect(samples, volume)?;
    let frame = match analyzer.extractor.as_mut() {
        Some(extractor) => extractor
            .process(ExtractionInput {
                estimate: &estimate,
                samples,
                timestamp,
            })
            .unwrap_or_else(|_| PitchFrame::from_estimate(&estimate, timestamp)),
        None => PitchFrame::from_estimate(&estimate, timestamp),
    };
    Some(frame)
}
