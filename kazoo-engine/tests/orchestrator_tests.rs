//! Integration tests for EngineOrchestrator
//!
//! Drive the orchestrator through its lifecycle with recording fakes in place
//! of the capture backend, synthesis engines and analysis stages.

mod helpers;

use helpers::{frame_at, sine_block, HarnessBuilder, START_MS};
use kazoo_common::events::{CaptureMode, EngineEvent, EngineMode, LifecycleState};
use kazoo_common::PitchEstimate;
use kazoo_engine::pipeline::DisplayFields;
use kazoo_engine::synth::{AutoTuneSettings, Scale};
use kazoo_engine::{CaptureError, Error};
use tokio::sync::broadcast;

fn drain_events(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ----------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------

/// Given a fresh orchestrator
/// When it is started, stopped and started again
/// Then the backend is constructed once and configured and started per session
#[tokio::test]
async fn test_backend_constructed_once_across_sessions() {
    let mut h = HarnessBuilder::new().build();

    h.orchestrator.start().await.unwrap();
    h.orchestrator.stop();
    h.orchestrator.start().await.unwrap();

    assert_eq!(h.capture.created(), 1);
    assert_eq!(h.capture.starts(), 2);
    assert_eq!(h.capture.log.lock().unwrap().configured.len(), 2);
    assert_eq!(h.orchestrator.state(), LifecycleState::Running);
    // Engine initialized once and reused
    assert_eq!(h.continuous.inits(), 1);
}

#[tokio::test]
async fn test_start_while_running_keeps_current_session() {
    let mut h = HarnessBuilder::new().build();

    let first = h.orchestrator.start().await.unwrap();
    let session = h.orchestrator.session();
    let second = h.orchestrator.start().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.orchestrator.session(), session);
    assert_eq!(h.capture.starts(), 1);
}

#[tokio::test]
async fn test_stop_when_idle_is_noop() {
    let mut h = HarnessBuilder::new().build();
    let mut events = h.orchestrator.subscribe();

    h.orchestrator.stop();

    assert_eq!(h.orchestrator.state(), LifecycleState::Idle);
    assert_eq!(h.capture.created(), 0);
    assert_eq!(h.continuous.stops(), 0);
    assert!(drain_events(&mut events).is_empty());
}

#[tokio::test]
async fn test_lifecycle_events_in_order() {
    let mut h = HarnessBuilder::new().build();
    let mut events = h.orchestrator.subscribe();

    h.orchestrator.start().await.unwrap();
    h.orchestrator.stop();

    let events = drain_events(&mut events);
    assert_eq!(
        events,
        vec![
            EngineEvent::StateChanged {
                from: LifecycleState::Idle,
                to: LifecycleState::Starting
            },
            EngineEvent::StateChanged {
                from: LifecycleState::Starting,
                to: LifecycleState::Running
            },
            EngineEvent::CaptureStarted {
                mode: CaptureMode::Realtime,
                buffer_size: 128,
                sample_rate: 48000
            },
            EngineEvent::StateChanged {
                from: LifecycleState::Running,
                to: LifecycleState::Stopping
            },
            EngineEvent::StateChanged {
                from: LifecycleState::Stopping,
                to: LifecycleState::Idle
            },
        ]
    );
}

// ----------------------------------------------------------------------
// Cancellation
// ----------------------------------------------------------------------

/// Given a running session with a frame in flight
/// When stop() returns before the frame is dispatched
/// Then the frame never reaches a synthesis engine
#[tokio::test]
async fn test_frames_from_stopped_session_are_discarded() {
    let mut h = HarnessBuilder::new().build();
    h.orchestrator.start().await.unwrap();
    let stale = h.capture.last_sink();

    assert!(stale.frame(frame_at(START_MS)));
    h.orchestrator.stop();
    assert!(stale.frame(frame_at(START_MS)));

    assert_eq!(h.orchestrator.drain_pending(), 0);
    assert_eq!(h.continuous.received(), 0);
    assert_eq!(h.legacy.received(), 0);
    assert!(h.orchestrator.visualizer().is_empty());
}

#[tokio::test]
async fn test_stale_session_discarded_after_restart() {
    let mut h = HarnessBuilder::new().build();
    h.orchestrator.start().await.unwrap();
    let stale = h.capture.last_sink();
    h.orchestrator.stop();
    h.orchestrator.start().await.unwrap();
    let current = h.capture.last_sink();

    stale.frame(frame_at(START_MS));
    current.frame(frame_at(START_MS));

    assert_eq!(h.orchestrator.drain_pending(), 1);
    assert_eq!(h.continuous.received(), 1);
}

// ----------------------------------------------------------------------
// Mode selection and routing
// ----------------------------------------------------------------------

/// Given a running orchestrator in continuous mode
/// When a switch to legacy mode is requested
/// Then it is rejected and frames keep reaching the continuous engine only
#[tokio::test]
async fn test_mode_switch_rejected_while_running() {
    let mut h = HarnessBuilder::new().build();
    h.orchestrator.start().await.unwrap();

    let result = h.orchestrator.set_mode(EngineMode::Legacy);
    assert!(matches!(result, Err(Error::InvalidState(_))));
    assert_eq!(h.orchestrator.mode(), EngineMode::Continuous);

    h.capture.last_sink().frame(frame_at(START_MS));
    h.orchestrator.drain_pending();

    assert_eq!(h.continuous.received(), 1);
    assert_eq!(h.legacy.received(), 0);
    assert_eq!(h.legacy.inits(), 0);
}

#[tokio::test]
async fn test_legacy_engine_receives_bare_estimates() {
    let mut h = HarnessBuilder::new().build();
    let mut events = h.orchestrator.subscribe();

    h.orchestrator.set_mode(EngineMode::Legacy).unwrap();
    assert!(drain_events(&mut events).contains(&EngineEvent::ModeChanged {
        mode: EngineMode::Legacy
    }));

    h.orchestrator.start().await.unwrap();
    h.capture.last_sink().frame(frame_at(START_MS));
    h.orchestrator.drain_pending();

    let log = h.legacy.log.lock().unwrap();
    assert_eq!(log.inits.len(), 1);
    assert!(log.frames.is_empty());
    assert_eq!(log.estimates.len(), 1);
    assert_eq!(log.estimates[0].frequency, 220.0);
    assert_eq!(h.continuous.inits(), 0);
    assert_eq!(h.continuous.received(), 0);
}

#[tokio::test]
async fn test_mode_switch_allowed_from_error() {
    let mut h = HarnessBuilder::new().build();
    h.capture
        .set_failure(Some(CaptureError::DeviceUnavailable("busy".to_string())));
    assert!(h.orchestrator.start().await.is_err());
    assert_eq!(h.orchestrator.state(), LifecycleState::Error);

    h.orchestrator.set_mode(EngineMode::Legacy).unwrap();
    assert_eq!(h.orchestrator.mode(), EngineMode::Legacy);
}

#[tokio::test]
async fn test_frame_ignored_in_buffered_session() {
    let mut h = HarnessBuilder::new().buffered().build();
    h.orchestrator.start().await.unwrap();

    h.capture.last_sink().frame(frame_at(START_MS));

    assert_eq!(h.orchestrator.drain_pending(), 0);
    assert_eq!(h.continuous.received(), 0);
}

// ----------------------------------------------------------------------
// Buffered path
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_buffered_session_runs_estimator() {
    let mut h = HarnessBuilder::new().buffered().build();

    let started = h.orchestrator.start().await.unwrap();
    assert_eq!(started.mode, CaptureMode::Buffered);
    assert_eq!(h.estimator.lock().unwrap().initialized_at, vec![44100]);

    h.capture
        .last_sink()
        .raw_buffer(sine_block(2048, 44100), START_MS - 40.0);
    assert_eq!(h.orchestrator.drain_pending(), 1);

    assert_eq!(h.estimator.lock().unwrap().detect_lengths, vec![2048]);
    let log = h.continuous.log.lock().unwrap();
    assert_eq!(log.frames.len(), 1);
    assert_eq!(log.frames[0].capture_timestamp, START_MS - 40.0);
    assert_eq!(log.frames[0].expression, None);
}

#[tokio::test]
async fn test_estimator_initialized_once_per_sample_rate() {
    let mut h = HarnessBuilder::new().buffered().build();

    h.orchestrator.start().await.unwrap();
    h.orchestrator.stop();
    h.orchestrator.start().await.unwrap();

    assert_eq!(h.estimator.lock().unwrap().initialized_at, vec![44100]);
}

#[tokio::test]
async fn test_no_estimate_produces_no_frame() {
    let mut h = HarnessBuilder::new().buffered().estimate(None).build();
    h.orchestrator.start().await.unwrap();

    h.capture.last_sink().raw_buffer(vec![0.0; 2048], START_MS);
    h.orchestrator.drain_pending();

    assert_eq!(h.continuous.received(), 0);
    assert_eq!(h.orchestrator.processing_stats().frames_processed, 1);
}

/// Given a buffered session whose feature extractor always fails
/// When raw buffers arrive
/// Then each becomes a degraded frame built from the bare estimate
/// And the degradation is reported once with a running count
#[tokio::test]
async fn test_extraction_failure_degrades_frame() {
    let mut h = HarnessBuilder::new().buffered().failing_extractor().build();
    let mut events = h.orchestrator.subscribe();
    h.orchestrator.start().await.unwrap();

    let sink = h.capture.last_sink();
    sink.raw_buffer(sine_block(2048, 44100), START_MS);
    sink.raw_buffer(sine_block(2048, 44100), START_MS + 46.0);
    assert_eq!(h.orchestrator.drain_pending(), 2);

    assert_eq!(h.orchestrator.extraction_failures(), 2);
    assert_eq!(
        h.extractor_calls.load(std::sync::atomic::Ordering::SeqCst),
        2
    );
    {
        let log = h.continuous.log.lock().unwrap();
        assert_eq!(log.frames.len(), 2);
        for frame in &log.frames {
            assert_eq!(frame.frequency, 220.0);
            assert_eq!(frame.brightness(), None);
            assert_eq!(frame.articulation(), None);
        }
    }

    let degraded: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::ExtractionDegraded { .. }))
        .collect();
    assert_eq!(degraded, vec![EngineEvent::ExtractionDegraded { count: 1 }]);
    assert_eq!(h.orchestrator.state(), LifecycleState::Running);
}

// ----------------------------------------------------------------------
// Failure handling
// ----------------------------------------------------------------------

/// Given a backend that fails to start with a permission error
/// When start() is called
/// Then the backend is stopped, the state is Error, one StartFailed is emitted
/// And a later start() succeeds with the same backend
#[tokio::test]
async fn test_start_failure_tears_down_and_allows_retry() {
    let mut h = HarnessBuilder::new().build();
    let mut events = h.orchestrator.subscribe();
    h.capture
        .set_failure(Some(CaptureError::PermissionDenied("denied".to_string())));

    let err = h.orchestrator.start().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Capture(CaptureError::PermissionDenied(_))
    ));
    assert_eq!(h.orchestrator.state(), LifecycleState::Error);
    assert_eq!(h.capture.stops(), 1);

    let failures: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::StartFailed { .. }))
        .collect();
    assert_eq!(
        failures,
        vec![EngineEvent::StartFailed {
            message: err.user_message()
        }]
    );
    assert_eq!(
        h.orchestrator.display().borrow().status_text,
        format!("Error: {}", err.user_message())
    );

    h.capture.set_failure(None);
    h.orchestrator.start().await.unwrap();
    assert_eq!(h.orchestrator.state(), LifecycleState::Running);
    assert_eq!(h.capture.created(), 1);
}

/// Given capture that starts but a synthesis engine that fails to initialize
/// When start() is called
/// Then the already-running capture is stopped before the error is returned
#[tokio::test]
async fn test_engine_init_failure_stops_capture() {
    let mut h = HarnessBuilder::new().build();
    h.continuous.set_fail_init(true);

    let err = h.orchestrator.start().await.unwrap_err();
    assert!(matches!(err, Error::EngineInit(_)));
    assert_eq!(err.user_message(), "The synthesizer could not be started.");
    assert_eq!(h.capture.starts(), 1);
    assert_eq!(h.capture.stops(), 1);
    assert_eq!(h.orchestrator.state(), LifecycleState::Error);

    // Anything the failed session queued stays discarded after a retry
    let failed_session = h.capture.last_sink();
    h.continuous.set_fail_init(false);
    h.orchestrator.start().await.unwrap();
    failed_session.frame(frame_at(START_MS));
    assert_eq!(h.orchestrator.drain_pending(), 0);
    assert_eq!(h.continuous.received(), 0);
}

#[tokio::test]
async fn test_buffered_start_without_estimator_fails() {
    let mut h = HarnessBuilder::new().buffered().without_estimator().build();

    let err = h.orchestrator.start().await.unwrap_err();

    assert!(matches!(err, Error::EngineInit(_)));
    assert_eq!(h.capture.stops(), 1);
    assert_eq!(h.orchestrator.state(), LifecycleState::Error);
}

#[tokio::test]
async fn test_stop_from_error_returns_to_idle() {
    let mut h = HarnessBuilder::new().build();
    h.capture
        .set_failure(Some(CaptureError::StreamFailed("xrun".to_string())));
    let _ = h.orchestrator.start().await;

    h.orchestrator.stop();

    assert_eq!(h.orchestrator.state(), LifecycleState::Idle);
    assert_eq!(*h.orchestrator.display().borrow(), DisplayFields::stopped());
}

#[tokio::test]
async fn test_capture_fault_ends_session() {
    let mut h = HarnessBuilder::new().build();
    let mut events = h.orchestrator.subscribe();
    h.orchestrator.start().await.unwrap();
    let sink = h.capture.last_sink();

    sink.error(CaptureError::StreamFailed("device unplugged".to_string()));
    sink.frame(frame_at(START_MS));
    assert_eq!(h.orchestrator.drain_pending(), 1);

    assert_eq!(h.orchestrator.state(), LifecycleState::Error);
    assert_eq!(h.capture.stops(), 1);
    assert_eq!(h.continuous.received(), 0);
    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, EngineEvent::CaptureFault { .. })));
}

// ----------------------------------------------------------------------
// Buffer negotiation
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_reported_buffer_size_wins() {
    let mut h = HarnessBuilder::new()
        .script(|s| s.buffer_size = 256)
        .build();

    let started = h.orchestrator.start().await.unwrap();

    assert_eq!(started.buffer_size, 256);
    assert_eq!(h.continuous.log.lock().unwrap().inits[0].buffer_size, 256);
}

#[tokio::test]
async fn test_buffer_size_falls_back_when_backend_reports_zero() {
    let mut realtime = HarnessBuilder::new()
        .script(|s| s.buffer_size = 0)
        .build();
    let started = realtime.orchestrator.start().await.unwrap();
    assert_eq!(started.buffer_size, 128);

    let mut buffered = HarnessBuilder::new()
        .buffered()
        .script(|s| s.buffer_size = 0)
        .build();
    let started = buffered.orchestrator.start().await.unwrap();
    assert_eq!(started.buffer_size, 2048);
    assert_eq!(buffered.orchestrator.negotiated(), Some(started));

    let stats = buffered.orchestrator.processing_stats();
    assert!((stats.buffer_duration_ms - 2048.0 / 44100.0 * 1000.0).abs() < 1e-6);
}

/// Given a buffered device at 96 kHz that reports no block size
/// When the configured 2048-sample block is shorter than the pitch window
/// Then capture restarts once with window-sized blocks under a new session
#[tokio::test]
async fn test_short_buffered_blocks_restart_with_window_size() {
    let mut h = HarnessBuilder::new()
        .buffered()
        .script(|s| {
            s.buffer_size = 0;
            s.sample_rate = 96000;
        })
        .estimator_window(4096)
        .build();

    let started = h.orchestrator.start().await.unwrap();

    assert_eq!(started.buffer_size, 4096);
    assert_eq!(started.sample_rate, 96000);
    assert_eq!(h.capture.starts(), 2);
    assert_eq!(h.capture.stops(), 1);
    let configured: Vec<u32> = h
        .capture
        .log
        .lock()
        .unwrap()
        .configured
        .iter()
        .map(|o| o.buffer_size)
        .collect();
    assert_eq!(configured, vec![2048, 4096]);
    assert_eq!(h.continuous.log.lock().unwrap().inits[0].buffer_size, 4096);
    assert_eq!(h.estimator.lock().unwrap().initialized_at, vec![96000]);

    let first_stream = h.capture.log.lock().unwrap().sinks[0].clone();
    first_stream.raw_buffer(sine_block(2048, 96000), START_MS);
    h.capture
        .last_sink()
        .raw_buffer(sine_block(4096, 96000), START_MS);
    assert_eq!(h.orchestrator.drain_pending(), 1);
    assert_eq!(h.estimator.lock().unwrap().detect_lengths, vec![4096]);

    // The configured block size is not changed for later sessions
    h.orchestrator.stop();
    assert_eq!(h.orchestrator.start().await.unwrap().buffer_size, 4096);
    assert_eq!(
        h.capture.log.lock().unwrap().configured[2].buffer_size,
        2048
    );
}

#[tokio::test]
async fn test_blocks_too_short_for_pitch_window_fail_start() {
    let mut h = HarnessBuilder::new()
        .buffered()
        .script(|s| s.sample_rate = 96000)
        .estimator_window(4096)
        .build();
    let mut events = h.orchestrator.subscribe();

    let err = h.orchestrator.start().await.unwrap_err();

    assert!(matches!(err, Error::EngineInit(_)), "got {:?}", err);
    assert_eq!(h.orchestrator.state(), LifecycleState::Error);
    assert_eq!(h.capture.starts(), 2);
    assert_eq!(h.capture.stops(), 2);
    assert_eq!(h.continuous.inits(), 0);
    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, EngineEvent::StartFailed { .. })));
}

// ----------------------------------------------------------------------
// Latency
// ----------------------------------------------------------------------

/// Given real-time capture negotiated at 128 frames / 48 kHz
/// When a frame captured at T is routed when the clock reads T + 12 ms
/// Then the tracker holds exactly that 12 ms sample
#[tokio::test]
async fn test_end_to_end_latency() {
    let mut h = HarnessBuilder::new().build();
    let started = h.orchestrator.start().await.unwrap();
    assert_eq!(started.mode, CaptureMode::Realtime);
    assert_eq!(started.buffer_size, 128);
    assert_eq!(started.sample_rate, 48000);

    h.capture.last_sink().frame(frame_at(START_MS));
    h.clock.set_ms(START_MS + 12.0);
    h.orchestrator.drain_pending();

    let summary = h.orchestrator.latency_summary();
    assert_eq!(summary.count, 1);
    assert_eq!(summary.avg, 12.0);
    assert_eq!(summary.p95, 12.0);
    assert_eq!(h.orchestrator.display().borrow().latency_ms, Some(12.0));
}

#[tokio::test]
async fn test_unstamped_frame_not_recorded() {
    let mut h = HarnessBuilder::new().build();
    h.orchestrator.start().await.unwrap();

    h.capture.last_sink().frame(frame_at(0.0));
    h.orchestrator.drain_pending();

    assert_eq!(h.continuous.received(), 1);
    assert_eq!(h.orchestrator.latency_summary().count, 0);
    assert_eq!(h.orchestrator.display().borrow().latency_ms, None);
}

#[tokio::test]
async fn test_latency_handle_shared_with_observers() {
    let mut h = HarnessBuilder::new().build();
    let handle = h.orchestrator.latency_handle();
    h.orchestrator.start().await.unwrap();

    let sink = h.capture.last_sink();
    for i in 0..150 {
        sink.frame(frame_at(START_MS + i as f64));
    }
    h.clock.set_ms(START_MS + 200.0);
    h.orchestrator.drain_pending();

    assert_eq!(handle.lock().unwrap().len(), 100);
}

// ----------------------------------------------------------------------
// Display and visualizer
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_display_fields_follow_frames() {
    let mut h = HarnessBuilder::new().build();
    let display = h.orchestrator.display();
    assert_eq!(*display.borrow(), DisplayFields::stopped());

    h.orchestrator.start().await.unwrap();
    assert_eq!(display.borrow().status_text, "Running (Continuous)");

    h.capture.last_sink().frame(frame_at(START_MS));
    h.orchestrator.drain_pending();
    {
        let fields = display.borrow();
        assert_eq!(fields.note_label, "A3");
        assert_eq!(fields.frequency_text, "220.0 Hz");
        assert_eq!(fields.confidence_percent, 95);
        assert_eq!(fields.status_text, "Running (Continuous)");
    }

    h.orchestrator.stop();
    assert_eq!(*display.borrow(), DisplayFields::stopped());
}

#[tokio::test]
async fn test_unvoiced_frame_display() {
    let mut h = HarnessBuilder::new()
        .buffered()
        .estimate(Some(PitchEstimate::silence(-70.0)))
        .build();
    h.orchestrator.start().await.unwrap();

    h.capture.last_sink().raw_buffer(vec![0.0; 2048], START_MS);
    h.orchestrator.drain_pending();

    let fields = h.orchestrator.display().borrow().clone();
    assert_eq!(fields.note_label, "--");
    assert_eq!(fields.frequency_text, "-- Hz");
    assert_eq!(fields.confidence_percent, 0);
}

#[tokio::test]
async fn test_visualizer_receives_routed_frames() {
    let mut h = HarnessBuilder::new().build();
    h.orchestrator.start().await.unwrap();

    let sink = h.capture.last_sink();
    sink.frame(frame_at(START_MS));
    sink.frame(frame_at(START_MS + 3.0));
    h.orchestrator.drain_pending();

    let history = h.orchestrator.visualizer().history();
    assert_eq!(history.len(), 2);
    assert!((history[0].semitone - 57.0).abs() < 1e-4);

    let scene = h.orchestrator.visualizer_mut().resize(400.0, 200.0);
    assert_eq!(scene.width, 400.0);
    assert_eq!(scene.segments.len(), 1);
}

// ----------------------------------------------------------------------
// Devices, instrument and continuous parameters
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_refresh_devices_uses_temporary_backend() {
    let mut h = HarnessBuilder::new().build();

    let devices = h.orchestrator.refresh_devices().await.unwrap();
    assert_eq!(h.capture.created(), 1);
    assert!(!h.orchestrator.has_backend());

    let inputs: Vec<_> = devices.inputs.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(inputs, vec!["USB Microphone", "Microphone 2"]);
    assert_eq!(devices.outputs[0].label, "Speaker 1");

    h.orchestrator.start().await.unwrap();
    h.orchestrator.refresh_devices().await.unwrap();
    assert_eq!(h.capture.created(), 2);
    assert_eq!(h.capture.log.lock().unwrap().enumerations, 2);
}

#[tokio::test]
async fn test_input_device_applies_on_next_start() {
    let mut h = HarnessBuilder::new().build();
    h.orchestrator.start().await.unwrap();

    h.orchestrator.select_input_device(Some("mic-1".to_string()));
    assert_eq!(
        h.capture.log.lock().unwrap().configured[0].input_device,
        None
    );

    h.orchestrator.stop();
    h.orchestrator.start().await.unwrap();
    assert_eq!(
        h.capture.log.lock().unwrap().configured[1].input_device,
        Some("mic-1".to_string())
    );
}

#[tokio::test]
async fn test_output_device_applied_when_running() {
    let mut h = HarnessBuilder::new().build();

    h.orchestrator
        .select_output_device(Some("out-0".to_string()))
        .await
        .unwrap();
    assert!(h.continuous.log.lock().unwrap().output_devices.is_empty());
    h.orchestrator.start().await.unwrap();
    assert_eq!(
        h.continuous.log.lock().unwrap().inits[0].output_device,
        Some("out-0".to_string())
    );

    h.orchestrator
        .select_output_device(Some("out-1".to_string()))
        .await
        .unwrap();
    assert_eq!(
        h.capture.log.lock().unwrap().output_devices,
        vec!["out-0".to_string(), "out-1".to_string()]
    );
    assert_eq!(
        h.continuous.log.lock().unwrap().output_devices,
        vec![Some("out-1".to_string())]
    );
    assert_eq!(h.orchestrator.output_device(), Some("out-1"));
}

/// Given an engine initialized on out-0
/// When out-1 is selected and the engine is restarted
/// Then the engine plays on out-1 without being initialized again
#[tokio::test]
async fn test_output_device_change_survives_restart() {
    let mut h = HarnessBuilder::new().build();
    h.orchestrator
        .select_output_device(Some("out-0".to_string()))
        .await
        .unwrap();
    h.orchestrator.start().await.unwrap();

    h.orchestrator
        .select_output_device(Some("out-1".to_string()))
        .await
        .unwrap();
    h.orchestrator.stop();
    h.orchestrator.start().await.unwrap();

    let log = h.continuous.log.lock().unwrap();
    assert_eq!(log.inits.len(), 1);
    assert_eq!(log.output_devices.last(), Some(&Some("out-1".to_string())));
    // The idle legacy engine opens on the selected device when it is first used
    assert!(h.legacy.log.lock().unwrap().output_devices.is_empty());
}

#[tokio::test]
async fn test_output_device_change_while_idle_reaches_initialized_engine() {
    let mut h = HarnessBuilder::new().build();
    h.orchestrator.start().await.unwrap();
    h.orchestrator.stop();

    h.orchestrator.select_output_device(None).await.unwrap();

    assert_eq!(h.continuous.log.lock().unwrap().output_devices, vec![None]);
    assert!(h.capture.log.lock().unwrap().output_devices.is_empty());
}

#[tokio::test]
async fn test_instrument_change_reaches_initialized_engine() {
    let mut h = HarnessBuilder::new().build();

    h.orchestrator.change_instrument("clarinet");
    assert!(h.continuous.log.lock().unwrap().instruments.is_empty());

    h.orchestrator.start().await.unwrap();
    assert_eq!(
        h.continuous.log.lock().unwrap().inits[0].instrument,
        "clarinet"
    );

    h.orchestrator.change_instrument("trumpet");
    assert_eq!(
        h.continuous.log.lock().unwrap().instruments,
        vec!["trumpet".to_string()]
    );
}

#[tokio::test]
async fn test_toggle_auto_tune() {
    let mut h = HarnessBuilder::new().build();
    let mut events = h.orchestrator.subscribe();

    assert_eq!(h.orchestrator.toggle_auto_tune().unwrap(), 1.0);
    assert!(h.orchestrator.auto_tune().enabled);
    assert_eq!(h.orchestrator.toggle_auto_tune().unwrap(), 0.0);
    assert_eq!(h.orchestrator.auto_tune().effective_strength(), 0.0);

    let last = *h.continuous.log.lock().unwrap().auto_tune.last().unwrap();
    assert_eq!(last.strength, 0.0);
    assert_eq!(
        drain_events(&mut events),
        vec![
            EngineEvent::AutoTuneToggled { strength: 1.0 },
            EngineEvent::AutoTuneToggled { strength: 0.0 },
        ]
    );

    h.orchestrator.set_mode(EngineMode::Legacy).unwrap();
    assert!(matches!(
        h.orchestrator.toggle_auto_tune(),
        Err(Error::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_toggle_treats_partial_strength_as_off() {
    let mut h = HarnessBuilder::new().build();
    h.orchestrator.set_auto_tune(AutoTuneSettings {
        enabled: true,
        strength: 0.3,
        ..AutoTuneSettings::default()
    });

    assert_eq!(h.orchestrator.toggle_auto_tune().unwrap(), 1.0);
    assert_eq!(h.orchestrator.toggle_auto_tune().unwrap(), 0.0);

    h.orchestrator.set_auto_tune(AutoTuneSettings {
        enabled: true,
        strength: 0.6,
        ..AutoTuneSettings::default()
    });
    assert_eq!(h.orchestrator.toggle_auto_tune().unwrap(), 0.0);
}

#[tokio::test]
async fn test_continuous_parameters_apply_in_any_state() {
    let mut h = HarnessBuilder::new().build();
    h.orchestrator.set_mode(EngineMode::Legacy).unwrap();

    h.orchestrator.set_scale("D", "major").unwrap();
    h.orchestrator.set_retune_speed(0.4);
    h.orchestrator.set_reverb_wet(1.5);
    assert!(h.orchestrator.set_scale("H", "major").is_err());

    let log = h.continuous.log.lock().unwrap();
    assert_eq!(log.scales, vec![Scale::parse("D", "major").unwrap()]);
    assert_eq!(log.retune_speeds, vec![0.4]);
    assert_eq!(log.reverb, vec![1.0]);
    assert_eq!(h.orchestrator.auto_tune().scale, log.scales[0]);
}

#[tokio::test]
async fn test_configured_auto_tune_reaches_continuous_engine() {
    let h = HarnessBuilder::new()
        .config(|c| {
            c.auto_tune.enabled = true;
            c.auto_tune.strength = 0.8;
        })
        .build();

    let log = h.continuous.log.lock().unwrap();
    assert_eq!(log.auto_tune.len(), 1);
    assert_eq!(log.auto_tune[0].effective_strength(), 0.8);
}

#[tokio::test]
async fn test_shutdown_releases_engines() {
    let mut h = HarnessBuilder::new().build();
    h.orchestrator.start().await.unwrap();

    h.orchestrator.shutdown();

    assert_eq!(h.orchestrator.state(), LifecycleState::Idle);
    assert!(!h.orchestrator.has_backend());
    assert_eq!(h.continuous.log.lock().unwrap().shutdowns, 1);
    assert_eq!(h.legacy.log.lock().unwrap().shutdowns, 1);
}
