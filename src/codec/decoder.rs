//! Opus decoder wrapper
//!
//! One [`SpeechDecoder`] per remote speaker. The codec keeps predictive state
//! between packets, so a decoder must never be shared between speakers.

use opus::{Channels, Decoder};

use crate::audio::PcmPacket;
use crate::error::CodecError;

/// Per-peer mono Opus decoder
pub struct SpeechDecoder {
    decoder: Decoder,
    sample_rate: u32,
    /// Decoded output (reused to avoid allocations)
    output: PcmPacket,
    /// Frames decoded
    frames_decoded: u64,
    /// Frames concealed (PLC used)
    frames_lost: u64,
    /// Packets the codec rejected
    frames_failed: u64,
}

impl SpeechDecoder {
    /// Create a decoder producing packets of `frame_count` samples
    pub fn new(sample_rate: u32, frame_count: usize) -> Result<Self, CodecError> {
        let decoder = Decoder::new(sample_rate, Channels::Mono)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self {
            decoder,
            sample_rate,
            output: PcmPacket::new(frame_count),
            frames_decoded: 0,
            frames_lost: 0,
            frames_failed: 0,
        })
    }

    /// Decode one compressed packet into a full PCM packet.
    ///
    /// The result borrows the decoder's buffer until the next call. A packet
    /// that yields fewer samples than one packet is reported as
    /// [`CodecError::ShortOutput`].
    pub fn decode(&mut self, compressed: &[u8]) -> Result<&PcmPacket, CodecError> {
        if compressed.is_empty() {
            return self.conceal();
        }

        let decoded = match self.decoder.decode(compressed, self.output.samples_mut(), false) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.frames_failed += 1;
                return Err(CodecError::DecodingFailed(e.to_string()));
            }
        };
        self.check_length(decoded)?;

        self.frames_decoded += 1;
        Ok(&self.output)
    }

    /// Synthesize a packet for a lost one using the codec's concealment
    pub fn conceal(&mut self) -> Result<&PcmPacket, CodecError> {
        let decoded = match self.decoder.decode(&[], self.output.samples_mut(), false) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.frames_failed += 1;
                return Err(CodecError::DecodingFailed(e.to_string()));
            }
        };
        self.check_length(decoded)?;

        self.frames_lost += 1;
        Ok(&self.output)
    }

    fn check_length(&mut self, decoded: usize) -> Result<(), CodecError> {
        let expected = self.output.frame_count();
        if decoded < expected {
            self.frames_failed += 1;
            return Err(CodecError::ShortOutput { decoded, expected });
        }
        Ok(())
    }

    /// Reset decoder state
    pub fn reset(&mut self) -> Result<(), CodecError> {
        self.decoder
            .reset_state()
            .map_err(|e| CodecError::DecoderInit(e.to_string()))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples per decoded packet
    pub fn frame_count(&self) -> usize {
        self.output.frame_count()
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_lost: self.frames_lost,
            frames_failed: self.frames_failed,
            loss_rate: if self.frames_decoded + self.frames_lost > 0 {
                self.frames_lost as f32 / (self.frames_decoded + self.frames_lost) as f32
            } else {
                0.0
            },
        }
    }

    pub fn reset_stats(&mut self) {
        self.frames_decoded = 0;
        self.frames_lost = 0;
        self.frames_failed = 0;
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_lost: u64,
    pub frames_failed: u64,
    pub loss_rate: f32,
}
