//! cpal device lookup and stream-owning threads
//!
//! cpal streams are not `Send`, so every stream is built and owned by a
//! dedicated thread. The creating task awaits a ready report from that thread,
//! and dropping the handle stops the stream and joins the thread.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Direction of a device lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Names of all devices in one direction on the default host
pub fn device_names(direction: DeviceDirection) -> Result<Vec<String>, String> {
    let host = cpal::default_host();
    let names: Vec<String> = match direction {
        DeviceDirection::Input => host
            .input_devices()
            .map_err(|e| format!("Failed to enumerate input devices: {}", e))?
            .map(|d| d.name().unwrap_or_default())
            .collect(),
        DeviceDirection::Output => host
            .output_devices()
            .map_err(|e| format!("Failed to enumerate output devices: {}", e))?
            .map(|d| d.name().unwrap_or_default())
            .collect(),
    };
    debug!("Found {} {:?} devices", names.len(), direction);
    Ok(names)
}

/// Find a device by name, falling back to the host default
///
/// Returns the device plus the name actually opened. `None` means neither the
/// requested device nor a default device exists.
pub fn find_device(direction: DeviceDirection, name: Option<&str>) -> Option<(Device, String)> {
    let host = cpal::default_host();

    if let Some(name) = name {
        let found = match direction {
            DeviceDirection::Input => host
                .input_devices()
                .ok()
                .and_then(|mut devices| devices.find(|d| d.name().ok().as_deref() == Some(name))),
            DeviceDirection::Output => host
                .output_devices()
                .ok()
                .and_then(|mut devices| devices.find(|d| d.name().ok().as_deref() == Some(name))),
        };
        if let Some(device) = found {
            info!("Found requested {:?} device: {}", direction, name);
            return Some((device, name.to_string()));
        }
        warn!(
            "Requested {:?} device '{}' not found, falling back to default device",
            direction, name
        );
    }

    let device = match direction {
        DeviceDirection::Input => host.default_input_device(),
        DeviceDirection::Output => host.default_output_device(),
    }?;
    let default_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!("Using default {:?} device: {}", direction, default_name);
    Some((device, default_name))
}

/// Handle to a thread that owns a running cpal stream
pub struct StreamThread {
    stop_tx: Option<std_mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Spawn a thread that builds and plays a stream, then parks until stopped
    ///
    /// `build` runs on the new thread and returns the playing stream plus a
    /// report value handed back to the caller. `lost` produces the error used
    /// when the thread exits without reporting.
    pub async fn spawn<T, E, B, L>(name: &str, build: B, lost: L) -> Result<(Self, T), E>
    where
        T: Send + 'static,
        E: Send + 'static,
        B: FnOnce() -> Result<(cpal::Stream, T), E> + Send + 'static,
        L: Fn(String) -> E,
    {
        let (ready_tx, ready_rx) = oneshot::channel::<Result<T, E>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || match build() {
                Ok((stream, report)) => {
                    if ready_tx.send(Ok(report)).is_err() {
                        return;
                    }
                    // Park until stop() or the handle is dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .map_err(|e| lost(format!("Failed to spawn {} thread: {}", name, e)))?;

        let mut thread = StreamThread {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        };

        match ready_rx.await {
            Ok(Ok(report)) => Ok((thread, report)),
            Ok(Err(err)) => {
                thread.stop();
                Err(err)
            }
            Err(_) => {
                thread.stop();
                Err(lost(format!("{} thread exited before reporting", name)))
            }
        }
    }

    /// Stop the stream and join its thread (idempotent)
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}
