//! Input device tap via cpal
//!
//! Captures from an input device on a dedicated thread (cpal streams are not
//! `Send`) and forwards every callback to a [`FrameSink`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::tap::{AudioFrame, FrameSink};
use crate::error::AudioError;

/// Mix tap backed by an input device
pub struct DeviceTap {
    /// Device name, `None` for the host default
    device_name: Option<String>,
    running: Arc<AtomicBool>,
    blocks_delivered: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
}

impl DeviceTap {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            running: Arc::new(AtomicBool::new(false)),
            blocks_delivered: Arc::new(AtomicU64::new(0)),
            thread_handle: None,
        }
    }

    fn find_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
        let host = cpal::default_host();
        match name {
            None => host
                .default_input_device()
                .ok_or_else(|| AudioError::DeviceNotFound("default input".into())),
            Some(name) => host
                .input_devices()
                .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| AudioError::DeviceNotFound(name.to_string())),
        }
    }

    /// Open the device and start forwarding callbacks to `sink`
    pub fn start(&mut self, sink: Arc<dyn FrameSink>) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = Self::find_device(self.device_name.as_deref())?;
        let config = device
            .default_input_config()
            .map_err(|e| AudioError::StreamError(e.to_string()))?
            .config();
        let channels = config.channels;
        let sample_rate = config.sample_rate.0;

        tracing::info!(
            "Opening input device {}: {} Hz, {} channels",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            sample_rate,
            channels
        );

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let blocks_delivered = self.blocks_delivered.clone();
        self.blocks_delivered.store(0, Ordering::SeqCst);
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("device-tap".into())
            .spawn(move || {
                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        sink.on_frame_ready(AudioFrame::new(data, channels, sample_rate));
                        blocks_delivered.fetch_add(1, Ordering::Relaxed);
                    },
                    move |err| {
                        tracing::warn!("Input stream error: {}", err);
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!("Failed to start stream: {}", e);
                            return;
                        }

                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to build stream: {}", e);
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn blocks_delivered(&self) -> u64 {
        self.blocks_delivered.load(Ordering::Relaxed)
    }
}

impl Drop for DeviceTap {
    fn drop(&mut self) {
        self.stop();
    }
}
