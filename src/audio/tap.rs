//! Mix tap interface and a synthetic tap
//!
//! A tap delivers raw interleaved frames on its own schedule to a
//! [`FrameSink`]. [`SineTap`] stands in for an engine mix bus: it runs a
//! dedicated thread that emits a tone in irregularly sized blocks.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::TapConfig;
use crate::error::AudioError;

/// One mix callback worth of audio
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    /// Interleaved samples
    pub samples: &'a [f32],
    pub channels: u16,
    /// Native rate of `samples`
    pub sample_rate: u32,
}

impl<'a> AudioFrame<'a> {
    pub fn new(samples: &'a [f32], channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
        }
    }

    /// Frames (samples per channel) in this block
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Receiver of mix callbacks.
///
/// Called from the tap's real-time context; implementations must not block.
pub trait FrameSink: Send + Sync {
    fn on_frame_ready(&self, frame: AudioFrame<'_>);
}

impl<T: FrameSink + ?Sized> FrameSink for Arc<T> {
    fn on_frame_ready(&self, frame: AudioFrame<'_>) {
        (**self).on_frame_ready(frame)
    }
}

/// Deterministic tone source producing irregular block sizes
#[derive(Debug, Clone)]
pub struct SineGenerator {
    config: TapConfig,
    phase: f32,
    seed: u32,
    block: Vec<f32>,
}

impl SineGenerator {
    pub fn new(config: TapConfig) -> Self {
        let capacity = config.max_block * config.channels.max(1) as usize;
        Self {
            config,
            phase: 0.0,
            seed: 0x2545_f491,
            block: Vec::with_capacity(capacity),
        }
    }

    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    /// Render the next block; its length varies between the configured bounds
    pub fn next_block(&mut self) -> AudioFrame<'_> {
        let span = self.config.max_block - self.config.min_block + 1;
        self.seed = self.seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let frames = self.config.min_block + (self.seed >> 8) as usize % span;
        self.render(frames)
    }

    /// Render exactly `frames` frames
    pub fn render(&mut self, frames: usize) -> AudioFrame<'_> {
        let channels = self.config.channels.max(1) as usize;
        let increment = TAU * self.config.tone_hz / self.config.mix_rate as f32;

        self.block.clear();
        for _ in 0..frames {
            let value = 0.5 * self.phase.sin();
            self.block.extend(std::iter::repeat(value).take(channels));
            self.phase = (self.phase + increment) % TAU;
        }
        AudioFrame::new(&self.block, channels as u16, self.config.mix_rate)
    }
}

/// Synthetic mix tap driving a [`FrameSink`] from its own thread
pub struct SineTap {
    config: TapConfig,
    running: Arc<AtomicBool>,
    blocks_delivered: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
}

impl SineTap {
    pub fn new(config: TapConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            blocks_delivered: Arc::new(AtomicU64::new(0)),
            thread_handle: None,
        }
    }

    /// Start delivering blocks, paced to the mix rate
    pub fn start(&mut self, sink: Arc<dyn FrameSink>) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let running = self.running.clone();
        let blocks_delivered = self.blocks_delivered.clone();
        let mut generator = SineGenerator::new(self.config.clone());
        let mix_rate = self.config.mix_rate as f64;

        self.blocks_delivered.store(0, Ordering::SeqCst);
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("sine-tap".into())
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    let frame = generator.next_block();
                    let duration = Duration::from_secs_f64(frame.frame_count() as f64 / mix_rate);
                    sink.on_frame_ready(frame);
                    blocks_delivered.fetch_add(1, Ordering::Relaxed);
                    thread::sleep(duration);
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        tracing::info!(
            "Sine tap started: {} Hz tone, {} Hz mix, {} channels",
            self.config.tone_hz,
            self.config.mix_rate,
            self.config.channels
        );
        Ok(())
    }

    /// Stop the tap thread and wait for it
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

impl Drop for SineTap {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CountingSink {
        frames: Mutex<usize>,
    }

    impl FrameSink for CountingSink {
        fn on_frame_ready(&self, frame: AudioFrame<'_>) {
            *self.frames.lock() += frame.frame_count();
        }
    }

    #[test]
    fn test_block_sizes_within_bounds() {
        let config = TapConfig {
            min_block: 100,
            max_block: 200,
            ..Default::default()
        };
        let mut generator = SineGenerator::new(config);
        let mut sizes = Vec::new();
        for _ in 0..50 {
            let frame = generator.next_block();
            assert_eq!(frame.samples.len(), frame.frame_count() * 2);
            sizes.push(frame.frame_count());
        }
        assert!(sizes.iter().all(|s| (100..=200).contains(s)));
        // Irregular, not a constant block size
        assert!(sizes.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn test_channels_carry_same_value() {
        let mut generator = SineGenerator::new(TapConfig::default());
        let frame = generator.render(64);
        for pair in frame.samples.chunks(2) {
            assert_eq!(pair[0], pair[1]);
        }
    }

    #[test]
    fn test_tap_delivers_until_stopped() {
        let sink = Arc::new(CountingSink::default());
        let mut tap = SineTap::new(TapConfig::default());
        tap.start(sink.clone()).unwrap();
        assert!(tap.is_running());

        thread::sleep(Duration::from_millis(100));
        tap.stop();
        assert!(!tap.is_running());

        let delivered = tap.blocks_delivered();
        assert!(delivered > 0);
        assert!(*sink.frames.lock() > 0);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(tap.blocks_delivered(), delivered);
    }
}
