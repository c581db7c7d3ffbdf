//! Pipeline orchestrator
//!
//! Wires the mix tap to resampling, packetization, encoding and the packet
//! ring, and exposes the receive path (decode + upmix).
//!
//! Two contexts touch a [`VoicePipeline`]: the tap calls
//! [`FrameSink::on_frame_ready`] from its real-time thread, and the
//! application drains packets and decodes from wherever it polls. The capture
//! chain is only ever locked with `try_lock` from the tap, so a concurrent
//! `start`/`stop` costs one dropped frame instead of a stall. The packet ring
//! has its own lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::accumulator::FrameAccumulator;
use crate::audio::resampler::Resampler;
use crate::audio::ring::{EncodedPacket, PacketRing};
use crate::audio::tap::{AudioFrame, FrameSink};
use crate::audio::upmix::{upmix_into, StereoFrame};
use crate::codec::{PeerDecoders, PeerId, SpeechDecoder, VoiceCodec};
use crate::config::VoiceConfig;
use crate::error::{CodecError, Result};

/// Host context the pipeline runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Full pipeline with codec
    Runtime,
    /// Tooling context without audio; every operation is an inert no-op
    EditorOnly,
}

/// Notified when recording stops, e.g. to clear playback queues
pub trait StopListener: Send + Sync {
    fn recording_stopped(&self);
}

/// Snapshot of pipeline counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_received: u64,
    /// Mix callbacks discarded by a resample failure or lock contention
    pub frames_dropped: u64,
    pub packets_encoded: u64,
    pub encode_failures: u64,
    /// Staged packets evicted by ring overflow
    pub packets_skipped: u64,
    pub packets_decoded: u64,
    pub decode_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    packets_encoded: AtomicU64,
    encode_failures: AtomicU64,
    packets_decoded: AtomicU64,
    decode_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything the tap callback mutates
struct CaptureChain {
    resampler: Resampler,
    accumulator: FrameAccumulator,
    codec: VoiceCodec,
    /// Resampler output, reused across callbacks
    resampled: Vec<f32>,
    target_rate: u32,
}

impl CaptureChain {
    fn process(&mut self, frame: AudioFrame<'_>, ring: &PacketRing, counters: &Counters) {
        if frame.channels == 0 {
            Counters::bump(&counters.frames_dropped);
            return;
        }
        if frame.channels != self.resampler.channels() {
            tracing::debug!(
                "Mix channel count changed {} -> {}",
                self.resampler.channels(),
                frame.channels
            );
            self.resampler.reset(frame.channels);
        }

        self.resampled.clear();
        if let Err(e) = self.resampler.convert(
            frame.samples,
            frame.sample_rate,
            self.target_rate,
            &mut self.resampled,
        ) {
            tracing::debug!("Dropping mix frame: {}", e);
            Counters::bump(&counters.frames_dropped);
            return;
        }

        self.accumulator.extend(&self.resampled, frame.channels);
        while let Some(packet) = self.accumulator.next_packet() {
            let loudness = packet.peak();
            match self.codec.encode(packet) {
                Ok(encoded) => {
                    ring.push(encoded, loudness);
                    Counters::bump(&counters.packets_encoded);
                }
                Err(e) => {
                    tracing::debug!("Dropping packet: {}", e);
                    Counters::bump(&counters.encode_failures);
                }
            }
        }
    }

    fn reset(&mut self) {
        let channels = self.resampler.channels();
        self.resampler.reset(channels);
        self.accumulator.reset();
        if let Err(e) = self.codec.encoder_mut().reset() {
            tracing::warn!("Encoder reset failed: {}", e);
        }
    }
}

/// The voice pipeline
pub struct VoicePipeline {
    mode: RunMode,
    config: VoiceConfig,
    /// `None` when the codec subsystem is unavailable
    capture: Option<Mutex<CaptureChain>>,
    ring: PacketRing,
    recording: AtomicBool,
    counters: Counters,
    stop_listener: Option<Arc<dyn StopListener>>,
}

impl VoicePipeline {
    pub fn new(config: VoiceConfig, mode: RunMode) -> Result<Self> {
        config.validate()?;

        let (capture, ring) = match mode {
            RunMode::Runtime => {
                let codec = VoiceCodec::new(&config)?;
                let chain = CaptureChain {
                    resampler: Resampler::new(1),
                    accumulator: FrameAccumulator::new(config.frame_count()),
                    codec,
                    resampled: Vec::with_capacity(config.frame_count() * 2),
                    target_rate: config.sample_rate,
                };
                let ring = PacketRing::new(config.ring_capacity, config.bytes_per_packet());
                (Some(Mutex::new(chain)), ring)
            }
            RunMode::EditorOnly => (None, PacketRing::new(1, 0)),
        };

        tracing::info!(
            "Voice pipeline created ({:?}): {} Hz, {} ms packets, {} ring slots",
            mode,
            config.sample_rate,
            config.ms_per_packet,
            config.ring_capacity
        );

        Ok(Self {
            mode,
            config,
            capture,
            ring,
            recording: AtomicBool::new(false),
            counters: Counters::default(),
            stop_listener: None,
        })
    }

    /// Register the listener told about `stop()`
    pub fn with_stop_listener(mut self, listener: Arc<dyn StopListener>) -> Self {
        self.stop_listener = Some(listener);
        self
    }

    /// Begin accepting mix callbacks. Returns `false` if the codec is unavailable.
    pub fn start(&self) -> bool {
        let Some(capture) = &self.capture else {
            return false;
        };

        capture.lock().reset();
        self.ring.clear_skipped_packets();
        self.recording.store(true, Ordering::Release);
        tracing::info!("Recording started");
        true
    }

    /// Stop accepting mix callbacks. Staged packets remain drainable.
    pub fn stop(&self) {
        if let Some(capture) = &self.capture {
            self.recording.store(false, Ordering::Release);
            capture.lock().reset();
            tracing::info!("Recording stopped");
        }
        if let Some(listener) = &self.stop_listener {
            listener.recording_stopped();
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// Whether the codec subsystem is present
    pub fn is_available(&self) -> bool {
        self.capture.is_some()
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.config
    }

    /// Take every staged packet, oldest first
    pub fn drain_all(&self) -> Vec<EncodedPacket> {
        self.ring.drain_all()
    }

    pub fn skipped_packets(&self) -> u64 {
        self.ring.skipped_packets()
    }

    pub fn clear_skipped_packets(&self) {
        self.ring.clear_skipped_packets();
    }

    /// A decoder for a new remote peer, `None` if the codec is unavailable
    pub fn new_decoder(&self) -> Option<SpeechDecoder> {
        if !self.is_available() {
            return None;
        }
        match SpeechDecoder::new(self.config.sample_rate, self.config.frame_count()) {
            Ok(decoder) => Some(decoder),
            Err(e) => {
                tracing::warn!("Failed to create decoder: {}", e);
                None
            }
        }
    }

    /// A peer registry for this packet format, `None` if the codec is unavailable
    pub fn peer_decoders(&self) -> Option<PeerDecoders> {
        self.is_available()
            .then(|| PeerDecoders::new(self.config.sample_rate, self.config.frame_count()))
    }

    /// Decode the first `read_size` bytes of `compressed` to stereo float
    pub fn decode(
        &self,
        decoder: &mut SpeechDecoder,
        compressed: &[u8],
        read_size: usize,
    ) -> std::result::Result<Vec<StereoFrame>, CodecError> {
        let mut out = Vec::with_capacity(self.config.frame_count());
        self.decode_into(decoder, compressed, read_size, &mut out)?;
        Ok(out)
    }

    /// Like [`decode`](Self::decode), appending to `out`. Returns frames written.
    ///
    /// On error `out` is left untouched.
    pub fn decode_into(
        &self,
        decoder: &mut SpeechDecoder,
        compressed: &[u8],
        read_size: usize,
        out: &mut Vec<StereoFrame>,
    ) -> std::result::Result<usize, CodecError> {
        if !self.is_available() {
            return Err(CodecError::Unavailable);
        }

        let pcm = match VoiceCodec::decode(decoder, compressed, read_size) {
            Ok(pcm) => pcm,
            Err(e) => {
                if !matches!(e, CodecError::ReadSizeExceedsBuffer { .. }) {
                    Counters::bump(&self.counters.decode_failures);
                }
                return Err(e);
            }
        };

        self.upmix(pcm.samples(), out)
    }

    /// Decode a packet from `peer`, creating its decoder on first use
    pub fn decode_from(
        &self,
        peers: &PeerDecoders,
        peer: PeerId,
        compressed: &[u8],
        read_size: usize,
    ) -> std::result::Result<Vec<StereoFrame>, CodecError> {
        peers.with_decoder(peer, |decoder| self.decode(decoder, compressed, read_size))?
    }

    /// Stereo audio standing in for a lost packet
    pub fn conceal(
        &self,
        decoder: &mut SpeechDecoder,
    ) -> std::result::Result<Vec<StereoFrame>, CodecError> {
        if !self.is_available() {
            return Err(CodecError::Unavailable);
        }

        let pcm = decoder.conceal().inspect_err(|_| {
            Counters::bump(&self.counters.decode_failures);
        })?;
        let mut out = Vec::with_capacity(self.config.frame_count());
        self.upmix(pcm.samples(), &mut out)?;
        Ok(out)
    }

    fn upmix(
        &self,
        pcm: &[i16],
        out: &mut Vec<StereoFrame>,
    ) -> std::result::Result<usize, CodecError> {
        let expected = self.config.frame_count();
        if !upmix_into(pcm, expected, out) {
            Counters::bump(&self.counters.decode_failures);
            return Err(CodecError::ShortOutput {
                decoded: pcm.len(),
                expected,
            });
        }
        Counters::bump(&self.counters.packets_decoded);
        Ok(expected)
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            frames_received: c.frames_received.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
            packets_encoded: c.packets_encoded.load(Ordering::Relaxed),
            encode_failures: c.encode_failures.load(Ordering::Relaxed),
            packets_skipped: self.ring.skipped_packets(),
            packets_decoded: c.packets_decoded.load(Ordering::Relaxed),
            decode_failures: c.decode_failures.load(Ordering::Relaxed),
        }
    }
}

impl FrameSink for VoicePipeline {
    fn on_frame_ready(&self, frame: AudioFrame<'_>) {
        if !self.recording.load(Ordering::Acquire) {
            return;
        }
        let Some(capture) = &self.capture else {
            return;
        };

        Counters::bump(&self.counters.frames_received);
        match capture.try_lock() {
            Some(mut chain) => chain.process(frame, &self.ring, &self.counters),
            None => Counters::bump(&self.counters.frames_dropped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::tap::SineGenerator;
    use crate::config::TapConfig;
    use std::sync::atomic::AtomicUsize;

    fn runtime() -> VoicePipeline {
        VoicePipeline::new(VoiceConfig::default(), RunMode::Runtime).unwrap()
    }

    #[test]
    fn test_ignores_frames_until_started() {
        let pipeline = runtime();
        pipeline.on_frame_ready(AudioFrame::new(&[0.1; 9600], 2, 48000));
        assert!(pipeline.drain_all().is_empty());
        assert_eq!(pipeline.stats().frames_received, 0);
    }

    #[test]
    fn test_identity_rate_packet_count() {
        let pipeline = runtime();
        assert!(pipeline.start());

        // 100 ms at the codec rate is exactly ten packets
        pipeline.on_frame_ready(AudioFrame::new(&[0.25; 4800], 1, 48000));
        let packets = pipeline.drain_all();
        assert_eq!(packets.len(), 10);
        assert!(packets.iter().all(|p| !p.is_empty() && p.len() <= 960));
        assert!(packets[1].loudness > 0.24 && packets[1].loudness < 0.26);
        assert_eq!(pipeline.stats().packets_encoded, 10);
        assert_eq!(pipeline.skipped_packets(), 0);
    }

    #[test]
    fn test_resample_failure_drops_frame() {
        let pipeline = runtime();
        pipeline.start();

        pipeline.on_frame_ready(AudioFrame::new(&[0.0; 512], 2, 0));
        pipeline.on_frame_ready(AudioFrame::new(&[0.0; 511], 2, 44100));

        let stats = pipeline.stats();
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.frames_dropped, 2);
        assert_eq!(stats.packets_encoded, 0);
    }

    #[test]
    fn test_encode_failure_skips_ring() {
        let config = VoiceConfig::default();
        // Packets half the size the encoder was built for
        let mut chain = CaptureChain {
            resampler: Resampler::new(1),
            accumulator: FrameAccumulator::new(config.frame_count() / 2),
            codec: VoiceCodec::new(&config).unwrap(),
            resampled: Vec::new(),
            target_rate: config.sample_rate,
        };
        let ring = PacketRing::new(config.ring_capacity, config.bytes_per_packet());
        let counters = Counters::default();

        chain.process(AudioFrame::new(&[0.25; 960], 1, 48000), &ring, &counters);

        assert_eq!(counters.encode_failures.load(Ordering::Relaxed), 4);
        assert_eq!(counters.packets_encoded.load(Ordering::Relaxed), 0);
        assert!(ring.is_empty());
        assert_eq!(ring.skipped_packets(), 0);
    }

    #[test]
    fn test_stop_keeps_staged_packets() {
        let pipeline = runtime();
        pipeline.start();
        pipeline.on_frame_ready(AudioFrame::new(&[0.1; 2000], 1, 48000));
        pipeline.stop();
        assert!(!pipeline.is_recording());

        pipeline.on_frame_ready(AudioFrame::new(&[0.1; 2000], 1, 48000));
        assert_eq!(pipeline.drain_all().len(), 4);
    }

    #[test]
    fn test_overflow_counts_and_start_resets() {
        let pipeline = runtime();
        pipeline.start();

        let mut generator = SineGenerator::new(TapConfig::default());
        for _ in 0..200 {
            pipeline.on_frame_ready(generator.next_block());
        }
        let encoded = pipeline.stats().packets_encoded;
        assert!(encoded > 10);
        assert_eq!(pipeline.skipped_packets(), encoded - 10);
        assert_eq!(pipeline.drain_all().len(), 10);

        pipeline.stop();
        pipeline.start();
        assert_eq!(pipeline.skipped_packets(), 0);
    }

    #[test]
    fn test_editor_mode_is_inert() {
        let pipeline = VoicePipeline::new(VoiceConfig::default(), RunMode::EditorOnly).unwrap();
        assert!(!pipeline.is_available());
        assert!(!pipeline.start());
        pipeline.stop();

        pipeline.on_frame_ready(AudioFrame::new(&[0.5; 4800], 1, 48000));
        assert!(pipeline.drain_all().is_empty());
        assert!(pipeline.new_decoder().is_none());
        assert!(pipeline.peer_decoders().is_none());

        let mut decoder = SpeechDecoder::new(48000, 480).unwrap();
        assert_eq!(
            pipeline.decode(&mut decoder, &[1, 2, 3], 3),
            Err(CodecError::Unavailable)
        );
    }

    #[test]
    fn test_decode_precondition() {
        let pipeline = runtime();
        let mut decoder = pipeline.new_decoder().unwrap();
        assert!(matches!(
            pipeline.decode(&mut decoder, &[0u8; 10], 20),
            Err(CodecError::ReadSizeExceedsBuffer { .. })
        ));
        assert_eq!(pipeline.stats().decode_failures, 0);
    }

    #[test]
    fn test_upmix_size_mismatch_propagates() {
        let pipeline = runtime();
        // Decoder for a shorter packet than the pipeline expects
        let mut decoder = SpeechDecoder::new(48000, 240).unwrap();
        assert!(matches!(
            pipeline.conceal(&mut decoder),
            Err(CodecError::ShortOutput { decoded: 240, expected: 480 })
        ));
        assert_eq!(pipeline.stats().decode_failures, 1);
    }

    #[test]
    fn test_decode_from_peer() {
        let pipeline = runtime();
        let peers = pipeline.peer_decoders().unwrap();
        pipeline.start();
        pipeline.on_frame_ready(AudioFrame::new(&[0.0; 1000], 1, 48000));

        for packet in pipeline.drain_all() {
            let stereo = pipeline
                .decode_from(&peers, PeerId(1), &packet.data, packet.len())
                .unwrap();
            assert_eq!(stereo.len(), 480);
        }
        assert!(peers.contains(PeerId(1)));
        assert_eq!(pipeline.stats().packets_decoded, 2);
    }

    #[test]
    fn test_stop_listener_notified() {
        struct Flag(AtomicUsize);
        impl StopListener for Flag {
            fn recording_stopped(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let flag = Arc::new(Flag(AtomicUsize::new(0)));
        let pipeline = runtime().with_stop_listener(flag.clone());
        pipeline.start();
        pipeline.stop();
        assert_eq!(flag.0.load(Ordering::SeqCst), 1);
    }
}
