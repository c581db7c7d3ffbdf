//! Opus codec adapter
//!
//! [`VoiceCodec`] owns the capture-side encoder and hands out per-peer
//! decoders configured for the same packet format.

pub mod decoder;
pub mod encoder;
pub mod peers;

pub use decoder::{DecoderStats, SpeechDecoder};
pub use encoder::{EncoderStats, SpeechEncoder};
pub use peers::{PeerDecoders, PeerId};

use crate::audio::PcmPacket;
use crate::config::VoiceConfig;
use crate::error::CodecError;

/// Encoder plus decoder factory for one packet format
pub struct VoiceCodec {
    encoder: SpeechEncoder,
    sample_rate: u32,
    frame_count: usize,
}

impl VoiceCodec {
    pub fn new(config: &VoiceConfig) -> Result<Self, CodecError> {
        let frame_count = config.frame_count();
        let encoder = SpeechEncoder::new(config.sample_rate, frame_count, config.opus.clone())?;

        tracing::debug!(
            "Opus codec ready: {} Hz mono, {} samples/packet ({} ms), {} bps",
            config.sample_rate,
            frame_count,
            config.ms_per_packet,
            config.opus.bitrate
        );

        Ok(Self {
            encoder,
            sample_rate: config.sample_rate,
            frame_count,
        })
    }

    /// Compress one full PCM packet
    pub fn encode(&mut self, pcm: &PcmPacket) -> Result<&[u8], CodecError> {
        self.encoder.encode(pcm)
    }

    /// Decode the first `read_size` bytes of `compressed` with a peer's decoder.
    ///
    /// Fails without touching the decoder if `read_size` exceeds the buffer.
    pub fn decode<'d>(
        decoder: &'d mut SpeechDecoder,
        compressed: &[u8],
        read_size: usize,
    ) -> Result<&'d PcmPacket, CodecError> {
        if read_size > compressed.len() {
            return Err(CodecError::ReadSizeExceedsBuffer {
                read_size,
                available: compressed.len(),
            });
        }
        decoder.decode(&compressed[..read_size])
    }

    /// A fresh decoder for a new remote peer
    pub fn new_decoder(&self) -> Result<SpeechDecoder, CodecError> {
        SpeechDecoder::new(self.sample_rate, self.frame_count)
    }

    /// An empty registry producing decoders for this format
    pub fn peer_decoders(&self) -> PeerDecoders {
        PeerDecoders::new(self.sample_rate, self.frame_count)
    }

    pub fn encoder(&self) -> &SpeechEncoder {
        &self.encoder
    }

    pub fn encoder_mut(&mut self) -> &mut SpeechEncoder {
        &mut self.encoder
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_size_precondition() {
        let codec = VoiceCodec::new(&VoiceConfig::default()).unwrap();
        let mut decoder = codec.new_decoder().unwrap();

        let result = VoiceCodec::decode(&mut decoder, &[0u8; 4], 8);
        assert_eq!(
            result.err(),
            Some(CodecError::ReadSizeExceedsBuffer {
                read_size: 8,
                available: 4
            })
        );
        assert_eq!(decoder.stats().frames_failed, 0);
    }

    #[test]
    fn test_decode_uses_read_size_prefix() {
        let mut codec = VoiceCodec::new(&VoiceConfig::default()).unwrap();
        let mut decoder = codec.new_decoder().unwrap();

        let encoded = codec.encode(&PcmPacket::new(480)).unwrap().to_vec();
        let mut padded = encoded.clone();
        padded.resize(960, 0xAA);

        let pcm = VoiceCodec::decode(&mut decoder, &padded, encoded.len()).unwrap();
        assert_eq!(pcm.frame_count(), codec.frame_count());
    }
}
