//! Opus encoder wrapper
//!
//! Encodes fixed-size mono PCM packets into a reusable output buffer.

use opus::{Application, Channels, Encoder};

use crate::audio::PcmPacket;
use crate::config::{OpusApplication, OpusConfig};
use crate::error::CodecError;

/// Mono Opus encoder for fixed-size packets
pub struct SpeechEncoder {
    encoder: Encoder,
    config: OpusConfig,
    sample_rate: u32,
    frame_count: usize,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    /// Frame counter for statistics
    frames_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
    /// Frames the codec rejected
    frames_failed: u64,
}

impl SpeechEncoder {
    /// Create an encoder for packets of `frame_count` samples.
    ///
    /// Output never exceeds `frame_count * 2` bytes, the size of the raw PCM.
    pub fn new(sample_rate: u32, frame_count: usize, config: OpusConfig) -> Result<Self, CodecError> {
        let application = match config.application {
            OpusApplication::Voice => Application::Voip,
            OpusApplication::Music => Application::Audio,
            OpusApplication::LowLatency => Application::LowDelay,
        };

        let mut encoder = Encoder::new(sample_rate, Channels::Mono, application)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        Self::configure_encoder(&mut encoder, &config)?;

        Ok(Self {
            encoder,
            config,
            sample_rate,
            frame_count,
            encode_buffer: vec![0u8; frame_count * 2],
            frames_encoded: 0,
            bytes_produced: 0,
            frames_failed: 0,
        })
    }

    fn configure_encoder(encoder: &mut Encoder, config: &OpusConfig) -> Result<(), CodecError> {
        encoder
            .set_bitrate(opus::Bitrate::Bits(config.bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        encoder
            .set_vbr(config.vbr)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set VBR: {}", e)))?;

        if config.vbr && config.cvbr {
            encoder
                .set_vbr_constraint(true)
                .map_err(|e| CodecError::EncoderInit(format!("Failed to set CVBR: {}", e)))?;
        }

        encoder
            .set_inband_fec(config.fec)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set FEC: {}", e)))?;

        if config.fec {
            encoder
                .set_packet_loss_perc(config.packet_loss_perc as i32)
                .map_err(|e| CodecError::EncoderInit(format!("Failed to set packet loss: {}", e)))?;
        }

        Ok(())
    }

    /// Encode one packet and borrow the compressed bytes.
    ///
    /// An `Err` means nothing usable was produced and the packet must be
    /// dropped.
    pub fn encode(&mut self, pcm: &PcmPacket) -> Result<&[u8], CodecError> {
        if pcm.frame_count() != self.frame_count {
            self.frames_failed += 1;
            return Err(CodecError::InvalidFrameSize(pcm.frame_count()));
        }

        let size = match self.encoder.encode(pcm.samples(), &mut self.encode_buffer) {
            Ok(size) => size,
            Err(e) => {
                self.frames_failed += 1;
                return Err(CodecError::EncodingFailed(e.to_string()));
            }
        };

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;

        Ok(&self.encode_buffer[..size])
    }

    /// Drop the codec's internal prediction state
    pub fn reset(&mut self) -> Result<(), CodecError> {
        self.encoder
            .reset_state()
            .map_err(|e| CodecError::EncoderInit(e.to_string()))
    }

    /// Update bitrate dynamically
    pub fn set_bitrate(&mut self, bitrate: u32) -> Result<(), CodecError> {
        self.encoder
            .set_bitrate(opus::Bitrate::Bits(bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;
        self.config.bitrate = bitrate;
        Ok(())
    }

    pub fn config(&self) -> &OpusConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples per packet
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Largest compressed packet, in bytes
    pub fn max_packet_size(&self) -> usize {
        self.encode_buffer.len()
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            frames_failed: self.frames_failed,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }

    pub fn reset_stats(&mut self) {
        self.frames_encoded = 0;
        self.frames_failed = 0;
        self.bytes_produced = 0;
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub frames_failed: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_creation() {
        let encoder = SpeechEncoder::new(48000, 480, OpusConfig::voice()).unwrap();
        assert_eq!(encoder.sample_rate(), 48000);
        assert_eq!(encoder.frame_count(), 480);
        assert_eq!(encoder.max_packet_size(), 960);
    }

    #[test]
    fn test_encode_silence() {
        let mut encoder = SpeechEncoder::new(48000, 480, OpusConfig::voice()).unwrap();
        let encoded = encoder.encode(&PcmPacket::new(480)).unwrap();
        assert!(!encoded.is_empty());
        assert!(encoded.len() < 960);

        let stats = encoder.stats();
        assert_eq!(stats.frames_encoded, 1);
        assert!(stats.average_frame_size > 0.0);
    }

    #[test]
    fn test_wrong_size_rejected() {
        let mut encoder = SpeechEncoder::new(48000, 480, OpusConfig::voice()).unwrap();
        assert_eq!(
            encoder.encode(&PcmPacket::new(100)),
            Err(CodecError::InvalidFrameSize(100))
        );
        assert_eq!(encoder.stats().frames_failed, 1);
    }

    #[test]
    fn test_invalid_rate() {
        assert!(matches!(
            SpeechEncoder::new(44100, 441, OpusConfig::voice()),
            Err(CodecError::EncoderInit(_))
        ));
    }
}
