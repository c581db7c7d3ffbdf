//! Fixed-size PCM packetization
//!
//! Collects resampled audio, folds it to mono, quantizes it to 16-bit and
//! hands out packets of exactly one time slice each.

/// Normalization divisor for 16-bit samples
pub const I16_SCALE: f32 = 32768.0;

/// One time slice of 16-bit mono PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmPacket {
    samples: Box<[i16]>,
}

impl PcmPacket {
    /// A silent packet of `frame_count` samples
    pub fn new(frame_count: usize) -> Self {
        Self {
            samples: vec![0; frame_count].into_boxed_slice(),
        }
    }

    pub fn from_samples(samples: &[i16]) -> Self {
        Self {
            samples: samples.into(),
        }
    }

    /// Parse little-endian bytes; `None` unless exactly `frame_count * 2` bytes
    pub fn from_le_bytes(bytes: &[u8], frame_count: usize) -> Option<Self> {
        if bytes.len() != frame_count * 2 {
            return None;
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        Some(Self { samples })
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len()
    }

    pub fn byte_len(&self) -> usize {
        self.samples.len() * std::mem::size_of::<i16>()
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    /// Peak absolute amplitude in `0.0..=1.0`, carried as packet loudness
    pub fn peak(&self) -> f32 {
        self.samples
            .iter()
            .map(|s| s.unsigned_abs())
            .max()
            .map_or(0.0, |p| p as f32 / I16_SCALE)
    }
}

/// Quantize one float sample to 16-bit PCM, clamping out-of-range input
#[inline]
pub fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Buffers audio until a full packet is available.
///
/// Multi-channel input is folded to mono by averaging all channels of a frame.
#[derive(Debug)]
pub struct FrameAccumulator {
    frame_count: usize,
    pending: Vec<i16>,
    packet: PcmPacket,
}

impl FrameAccumulator {
    pub fn new(frame_count: usize) -> Self {
        Self {
            frame_count,
            pending: Vec::with_capacity(frame_count * 2),
            packet: PcmPacket::new(frame_count),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Samples waiting for the next packet
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append interleaved samples and return a packet if one is complete.
    ///
    /// Further complete packets stay queued; collect them with
    /// [`next_packet`](Self::next_packet).
    pub fn feed(&mut self, samples: &[f32], channels: u16) -> Option<&PcmPacket> {
        self.extend(samples, channels);
        self.next_packet()
    }

    /// Append interleaved samples without emitting
    pub fn extend(&mut self, samples: &[f32], channels: u16) {
        let channels = channels.max(1) as usize;
        if channels == 1 {
            self.pending.extend(samples.iter().map(|&s| quantize(s)));
        } else {
            self.pending.extend(
                samples
                    .chunks_exact(channels)
                    .map(|frame| quantize(frame.iter().sum::<f32>() / channels as f32)),
            );
        }
    }

    /// Take the oldest complete packet, if any
    pub fn next_packet(&mut self) -> Option<&PcmPacket> {
        if self.pending.len() < self.frame_count {
            return None;
        }
        self.packet
            .samples_mut()
            .copy_from_slice(&self.pending[..self.frame_count]);
        self.pending.drain(..self.frame_count);
        Some(&self.packet)
    }

    /// Drop buffered samples
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
