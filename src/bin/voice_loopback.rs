//! Voice Loopback
//!
//! Runs the capture path from a mix tap into the packet ring, drains it on a
//! timer and decodes every packet back to stereo as if it came from a peer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "device")]
use voice_pipe::audio::DeviceTap;
use voice_pipe::{
    audio::SineTap,
    codec::PeerId,
    config::{TapSource, VoiceConfig},
    RunMode, VoicePipeline,
};

/// How often the ring is drained
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How often statistics are logged
const REPORT_INTERVAL: Duration = Duration::from_secs(2);

enum Tap {
    Sine(SineTap),
    #[cfg(feature = "device")]
    Device(DeviceTap),
}

impl Tap {
    fn start(config: &VoiceConfig, pipeline: Arc<VoicePipeline>) -> Result<Self> {
        match config.tap.source {
            TapSource::Sine => {
                let mut tap = SineTap::new(config.tap.clone());
                tap.start(pipeline)?;
                Ok(Tap::Sine(tap))
            }
            #[cfg(feature = "device")]
            TapSource::Device => {
                let mut tap = DeviceTap::new(None);
                tap.start(pipeline)?;
                Ok(Tap::Device(tap))
            }
            #[cfg(not(feature = "device"))]
            TapSource::Device => bail!("device tap requires the `device` feature"),
        }
    }

    fn stop(&mut self) {
        match self {
            Tap::Sine(tap) => tap.stop(),
            #[cfg(feature = "device")]
            Tap::Device(tap) => tap.stop(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting voice loopback");

    let config = match std::env::args().nth(1) {
        Some(path) => VoiceConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => VoiceConfig::load_or_default()?,
    };

    let pipeline = Arc::new(VoicePipeline::new(config.clone(), RunMode::Runtime)?);
    let peers = pipeline
        .peer_decoders()
        .context("codec subsystem unavailable")?;
    let peer = PeerId(0);

    let mut tap = Tap::start(&config, pipeline.clone())?;
    if !pipeline.start() {
        bail!("pipeline refused to start");
    }

    let mut interval = tokio::time::interval(POLL_INTERVAL);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut played_frames: u64 = 0;
    let mut bytes_sent: u64 = 0;
    let mut last_report = Instant::now();

    tracing::info!("Running - press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                for packet in pipeline.drain_all() {
                    bytes_sent += packet.len() as u64;
                    match pipeline.decode_from(&peers, peer, &packet.data, packet.len()) {
                        Ok(stereo) => played_frames += stereo.len() as u64,
                        Err(e) => tracing::warn!("Decode failed: {}", e),
                    }
                }

                if last_report.elapsed() >= REPORT_INTERVAL {
                    let stats = pipeline.stats();
                    tracing::info!(
                        "Stats: {} callbacks ({} dropped), {} packets encoded, {} skipped, {} decoded, {:.1} KB sent, {:.2} s played",
                        stats.frames_received,
                        stats.frames_dropped,
                        stats.packets_encoded,
                        stats.packets_skipped,
                        stats.packets_decoded,
                        bytes_sent as f64 / 1024.0,
                        played_frames as f64 / config.sample_rate as f64
                    );
                    last_report = Instant::now();
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    pipeline.stop();
    tap.stop();
    peers.clear();
    Ok(())
}
