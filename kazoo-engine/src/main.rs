//! Kazoo engine - Main entry point
//!
//! Captures the microphone, tracks pitch and expression, and drives a
//! synthesized instrument until interrupted.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kazoo_common::events::{EngineMode, LifecycleState};
use kazoo_common::time::MonotonicClock;
use kazoo_engine::analysis::features::ExpressionExtractor;
use kazoo_engine::analysis::yin::YinEstimator;
use kazoo_engine::capture::cpal_input::{AnalyzerFactory, RealtimeAnalyzer};
use kazoo_engine::capture::{CaptureBackend, CpalCapture};
use kazoo_engine::config::{ConfigOverrides, EngineConfig};
use kazoo_engine::pipeline::Collaborators;
use kazoo_engine::synth::{ContinuousToneEngine, NoteToneEngine, SynthEngines};
use kazoo_engine::{CaptureError, EngineOrchestrator};

/// Command-line arguments for kazoo-engine
#[derive(Parser, Debug)]
#[command(name = "kazoo-engine")]
#[command(about = "Turns your voice into a synthesized instrument")]
#[command(version)]
struct Args {
    /// Configuration file (overrides KAZOO_CONFIG and the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input device name
    #[arg(short, long)]
    input_device: Option<String>,

    /// Output device name
    #[arg(short, long)]
    output_device: Option<String>,

    /// Synthesis mode: continuous or legacy
    #[arg(short, long, value_parser = parse_mode)]
    mode: Option<EngineMode>,

    /// Instrument to play
    #[arg(long)]
    instrument: Option<String>,

    /// Force buffered capture (pitch estimation off the audio thread)
    #[arg(long)]
    buffered: bool,

    /// List audio devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Print device list as JSON (with --list-devices)
    #[arg(long, requires = "list_devices")]
    json: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn parse_mode(name: &str) -> std::result::Result<EngineMode, String> {
    EngineMode::parse(name).ok_or_else(|| format!("unknown mode '{}'", name))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let overrides = ConfigOverrides {
        input_device: args.input_device.clone(),
        output_device: args.output_device.clone(),
        mode: args.mode,
        instrument: args.instrument.clone(),
        buffered: args.buffered,
    };
    let config = EngineConfig::load(args.config.as_deref(), &overrides)
        .context("Failed to load configuration")?;

    init_tracing(&config)?;

    if args.print_config {
        print!("{}", config.to_toml_string().context("Failed to render configuration")?);
        return Ok(());
    }

    let mut orchestrator = build_orchestrator(&config);

    if args.list_devices {
        let devices = orchestrator
            .refresh_devices()
            .await
            .context("Failed to enumerate audio devices")?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&devices)?);
        } else {
            println!("Inputs:");
            for device in &devices.inputs {
                println!("  {}", device.label);
            }
            println!("Outputs:");
            for device in &devices.outputs {
                println!("  {}", device.label);
            }
        }
        return Ok(());
    }

    info!(
        "Starting kazoo engine: mode={}, instrument={}",
        config.engine_mode, config.instrument
    );

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => debug!("event: {}", json),
                Err(e) => warn!("Unserializable event {:?}: {}", event, e),
            }
        }
    });

    if let Err(e) = orchestrator.start().await {
        error!("{}", e.user_message());
        return Err(e).context("Failed to start engine");
    }

    run(&mut orchestrator, &config).await;

    orchestrator.shutdown();
    let summary = orchestrator.latency_summary();
    info!(
        "Final latency: avg={:.1}ms p50={:.1}ms p95={:.1}ms over {} frames",
        summary.avg, summary.p50, summary.p95, summary.count
    );
    info!("Shutdown complete");
    Ok(())
}

/// Pump capture messages until a shutdown signal or a capture fault
async fn run(orchestrator: &mut EngineOrchestrator, config: &EngineConfig) {
    let stats_period = Duration::from_millis(config.performance.stats_interval_ms.max(100));
    let mut stats = tokio::time::interval(stats_period);
    stats.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            message = orchestrator.next_message() => {
                let Some(message) = message else { break };
                orchestrator.dispatch(message);
                if orchestrator.state() != LifecycleState::Running {
                    warn!("Engine left the running state ({})", orchestrator.state());
                    break;
                }
            }
            _ = stats.tick(), if config.performance.enable_stats => {
                let latency = orchestrator.latency_summary();
                let processing = orchestrator.processing_stats();
                info!(
                    "latency avg={:.1}ms p95={:.1}ms | processing {:.2}ms @ {} fps | total {:.1}ms",
                    latency.avg,
                    latency.p95,
                    processing.avg_processing_ms,
                    processing.fps,
                    processing.total_latency_ms
                );
            }
            _ = &mut shutdown => break,
        }
    }
}

fn init_tracing(config: &EngineConfig) -> Result<()> {
    let level = config.logging.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("kazoo_engine={level},kazoo_common={level}").into()
    });

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

fn build_orchestrator(config: &EngineConfig) -> EngineOrchestrator {
    let clock = MonotonicClock::shared();

    let detector = config.pitch_detector.clone();
    let smoothing = config.smoothing.clone();
    let onset = config.onset.clone();
    let analyzer: AnalyzerFactory = Arc::new(move || RealtimeAnalyzer {
        estimator: Box::new(YinEstimator::new(detector.clone())),
        extractor: Some(Box::new(ExpressionExtractor::new(
            smoothing.clone(),
            onset.clone(),
        ))),
    });

    let capture_clock = Arc::clone(&clock);
    let backend_factory =
        move || -> std::result::Result<Box<dyn CaptureBackend>, CaptureError> {
            Ok(Box::new(
                CpalCapture::new(Arc::clone(&capture_clock))
                    .with_realtime_analyzer(Arc::clone(&analyzer)),
            ))
        };

    let engines = SynthEngines::new(
        Box::new(ContinuousToneEngine::new(config.volume)),
        Box::new(NoteToneEngine::new(config.volume)),
    );

    EngineOrchestrator::new(
        config,
        Collaborators {
            backend_factory: Box::new(backend_factory),
            engines,
            estimator: Some(Box::new(YinEstimator::new(config.pitch_detector.clone()))),
            extractor: Some(Box::new(ExpressionExtractor::new(
                config.smoothing.clone(),
                config.onset.clone(),
            ))),
            clock,
        },
    )
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
