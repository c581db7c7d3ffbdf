//! Streaming sample-rate converter
//!
//! Band-limited sinc interpolation via rubato. The filter consumes fixed
//! chunks, so interleaved input of any size is deinterleaved into a pending
//! buffer and processed whenever a full chunk is available. The filter and
//! its phase are rebuilt whenever the rate pair or channel count changes.
//! Equal rates bypass the filter entirely.

use std::fmt;

use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::error::AudioError;

/// Largest accepted up- or down-sampling ratio
pub const MAX_RATIO: f64 = 256.0;

/// Input frames handed to the sinc filter per pass
pub const CHUNK_FRAMES: usize = 256;

/// Filter state for one rate pair
struct SincStage {
    filter: SincFixedIn<f32>,
    /// Deinterleaved input waiting for a full chunk
    pending: Vec<Vec<f32>>,
    /// Filter output, sized for the largest pass
    scratch: Vec<Vec<f32>>,
}

impl SincStage {
    fn new(ratio: f64, channels: usize) -> Result<Self, AudioError> {
        let filter = SincFixedIn::<f32>::new(
            ratio,
            1.0,
            Self::parameters(ratio),
            CHUNK_FRAMES,
            channels,
        )
        .map_err(|e| AudioError::Resample(e.to_string()))?;
        let scratch = filter.output_buffer_allocate(true);

        Ok(Self {
            filter,
            pending: vec![Vec::with_capacity(CHUNK_FRAMES * 2); channels],
            scratch,
        })
    }

    /// Longer filters for the larger conversions
    fn parameters(ratio: f64) -> SincInterpolationParameters {
        let (sinc_len, interpolation) = if ratio <= 0.5 || ratio >= 2.0 {
            (256, SincInterpolationType::Cubic)
        } else {
            (128, SincInterpolationType::Linear)
        };

        SincInterpolationParameters {
            sinc_len,
            f_cutoff: 0.95,
            interpolation,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        }
    }

    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<usize, AudioError> {
        let channels = self.pending.len();
        for frame in input.chunks_exact(channels) {
            for (pending, &sample) in self.pending.iter_mut().zip(frame) {
                pending.push(sample);
            }
        }

        let mut written = 0;
        while self.pending[0].len() >= self.filter.input_frames_next() {
            let (consumed, produced) = self
                .filter
                .process_into_buffer(&self.pending, &mut self.scratch, None)
                .map_err(|e| AudioError::Resample(e.to_string()))?;

            for pending in &mut self.pending {
                pending.drain(..consumed);
            }

            output.reserve(produced * channels);
            for i in 0..produced {
                for channel in &self.scratch {
                    output.push(channel[i]);
                }
            }
            written += produced;
        }

        Ok(written)
    }

    fn reset(&mut self) {
        self.filter.reset();
        for pending in &mut self.pending {
            pending.clear();
        }
    }
}

/// Stateful resampler for interleaved `f32` audio
pub struct Resampler {
    channels: usize,
    /// Rate pair the current stage was built for
    rates: Option<(u32, u32)>,
    /// `None` when the rates are equal or before the first call
    stage: Option<SincStage>,
}

impl fmt::Debug for Resampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resampler")
            .field("channels", &self.channels)
            .field("rates", &self.rates)
            .field("pending_frames", &self.pending_frames())
            .finish()
    }
}

impl Resampler {
    pub fn new(channels: u16) -> Self {
        Self {
            channels: channels.max(1) as usize,
            rates: None,
            stage: None,
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels as u16
    }

    /// Input frames buffered until the next full filter chunk
    pub fn pending_frames(&self) -> usize {
        self.stage.as_ref().map_or(0, |stage| stage.pending[0].len())
    }

    /// Convert `input` from `input_rate` to `output_rate`, appending to `output`.
    ///
    /// Returns the number of output frames written, which may be zero while
    /// the filter waits for a full chunk. On error nothing is appended.
    /// Input still buffered at a previous rate pair is discarded.
    pub fn convert(
        &mut self,
        input: &[f32],
        input_rate: u32,
        output_rate: u32,
        output: &mut Vec<f32>,
    ) -> Result<usize, AudioError> {
        let ratio = Self::ratio(input_rate, output_rate)?;
        if input.len() % self.channels != 0 {
            return Err(AudioError::MisalignedFrame {
                samples: input.len(),
                channels: self.channels as u16,
            });
        }

        if self.rates != Some((input_rate, output_rate)) {
            let stage = if input_rate == output_rate {
                None
            } else {
                Some(SincStage::new(ratio, self.channels)?)
            };
            if self.rates.is_some() {
                tracing::debug!(
                    "Resampler rate change: {} Hz -> {} Hz",
                    input_rate,
                    output_rate
                );
            }
            self.stage = stage;
            self.rates = Some((input_rate, output_rate));
        }

        match &mut self.stage {
            None => {
                output.extend_from_slice(input);
                Ok(input.len() / self.channels)
            }
            Some(stage) => {
                let start = output.len();
                stage.process(input, output).inspect_err(|_| {
                    output.truncate(start);
                    stage.reset();
                })
            }
        }
    }

    /// Clear filter state and buffered input, optionally switching channel count
    pub fn reset(&mut self, channels: u16) {
        let channels = channels.max(1) as usize;
        if channels != self.channels {
            self.channels = channels;
            self.stage = None;
            self.rates = None;
        } else if let Some(stage) = &mut self.stage {
            stage.reset();
        }
    }

    /// Output frames per input frame
    fn ratio(input_rate: u32, output_rate: u32) -> Result<f64, AudioError> {
        let invalid = AudioError::InvalidSampleRate {
            from: input_rate,
            to: output_rate,
        };
        if input_rate == 0 || output_rate == 0 {
            return Err(invalid);
        }
        let ratio = output_rate as f64 / input_rate as f64;
        if !(1.0 / MAX_RATIO..=MAX_RATIO).contains(&ratio) {
            return Err(invalid);
        }
        Ok(ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(rate: u32, freq: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    /// Deterministic irregular chunk sizes
    fn chunk_sizes(total: usize) -> Vec<usize> {
        let mut sizes = Vec::new();
        let mut seed: u32 = 12345;
        let mut remaining = total;
        while remaining > 0 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let size = (1 + (seed >> 16) as usize % 700).min(remaining);
            sizes.push(size);
            remaining -= size;
        }
        sizes
    }

    fn convert_chunked(input: &[f32], in_rate: u32, out_rate: u32, sizes: &[usize]) -> Vec<f32> {
        let mut out = Vec::new();
        let mut resampler = Resampler::new(1);
        let mut offset = 0;
        for &size in sizes {
            resampler
                .convert(&input[offset..offset + size], in_rate, out_rate, &mut out)
                .unwrap();
            offset += size;
        }
        out
    }

    fn rising_crossings(samples: &[f32]) -> Vec<usize> {
        samples
            .windows(2)
            .enumerate()
            .filter(|(_, w)| w[0] < 0.0 && w[1] >= 0.0)
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn test_identity_pass() {
        let mut resampler = Resampler::new(1);
        let mut out = Vec::new();
        resampler.convert(&[0.1, 0.2, 0.3], 48000, 48000, &mut out).unwrap();
        resampler.convert(&[0.4, 0.5], 48000, 48000, &mut out).unwrap();

        assert_eq!(out, vec![0.1, 0.2, 0.3, 0.4, 0.5]);
        assert_eq!(resampler.pending_frames(), 0);
    }

    #[test]
    fn test_short_calls_are_buffered() {
        let mut resampler = Resampler::new(1);
        let mut out = Vec::new();

        let written = resampler.convert(&[0.0; 100], 44100, 48000, &mut out).unwrap();
        assert_eq!(written, 0);
        assert!(out.is_empty());
        assert_eq!(resampler.pending_frames(), 100);

        let written = resampler.convert(&[0.0; 200], 44100, 48000, &mut out).unwrap();
        assert!(written > 0);
        assert_eq!(out.len(), written);
        assert_eq!(resampler.pending_frames(), 300 - CHUNK_FRAMES);
    }

    #[test]
    fn test_chunked_matches_whole() {
        let input = sine(44100, 440.0, 4410);

        let whole = convert_chunked(&input, 44100, 48000, &[input.len()]);
        let chunked = convert_chunked(&input, 44100, 48000, &chunk_sizes(input.len()));

        assert!(!whole.is_empty());
        assert_eq!(whole, chunked);
    }

    #[test]
    fn test_tone_keeps_its_pitch() {
        let (in_rate, out_rate, freq) = (44100, 48000, 440.0);
        let input = sine(in_rate, freq, in_rate as usize);
        let out = convert_chunked(&input, in_rate, out_rate, &chunk_sizes(input.len()));

        // About one second, short of the final partial chunk
        assert!((out.len() as i64 - out_rate as i64).abs() < 300, "len {}", out.len());

        let settled = &out[1024..];
        let crossings = rising_crossings(settled);
        let first = crossings[0];
        let last = *crossings.last().unwrap();
        let period = (last - first) as f32 / (crossings.len() - 1) as f32;
        let measured = out_rate as f32 / period;
        assert!((measured - freq).abs() / freq < 0.01, "measured {measured} Hz");

        let level = rms(settled);
        assert!((level - 0.707).abs() < 0.05, "rms {level}");
    }

    #[test]
    fn test_out_of_band_tone_is_attenuated() {
        let input = sine(96000, 30000.0, 96000);
        let out = convert_chunked(&input, 96000, 48000, &vec![317; 96000 / 317]);

        // Above the 24 kHz output Nyquist: must not fold back as an alias
        let level = rms(&out[1024..]);
        assert!(level < 0.05, "rms {level}");

        let input = sine(96000, 1000.0, 96000);
        let out = convert_chunked(&input, 96000, 48000, &vec![317; 96000 / 317]);
        let level = rms(&out[1024..]);
        assert!((level - 0.707).abs() < 0.05, "rms {level}");
    }

    #[test]
    fn test_stereo_downsample() {
        let mut resampler = Resampler::new(2);
        let input: Vec<f32> = sine(48000, 300.0, 2048)
            .into_iter()
            .flat_map(|s| [s, -s])
            .collect();
        let mut out = Vec::new();
        let frames = resampler.convert(&input, 48000, 24000, &mut out).unwrap();

        assert!(frames > 0);
        assert_eq!(out.len(), frames * 2);
        for frame in out.chunks(2) {
            assert!((frame[0] + frame[1]).abs() < 1e-5);
        }
    }

    #[test]
    fn test_rejects_bad_input() {
        let mut resampler = Resampler::new(2);
        let mut out = Vec::new();

        assert!(matches!(
            resampler.convert(&[0.0; 4], 0, 48000, &mut out),
            Err(AudioError::InvalidSampleRate { .. })
        ));
        assert!(matches!(
            resampler.convert(&[0.0; 4], 1, 48000, &mut out),
            Err(AudioError::InvalidSampleRate { .. })
        ));
        assert!(matches!(
            resampler.convert(&[0.0; 3], 44100, 48000, &mut out),
            Err(AudioError::MisalignedFrame { .. })
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_rate_change_restarts_filter() {
        let mut resampler = Resampler::new(1);
        let mut out = Vec::new();
        resampler.convert(&[0.5; 100], 44100, 48000, &mut out).unwrap();
        assert_eq!(resampler.pending_frames(), 100);

        resampler.convert(&[0.5; 10], 32000, 48000, &mut out).unwrap();
        assert_eq!(resampler.pending_frames(), 10);

        // Equal rates drop the filter and its buffered input
        resampler.convert(&[0.5; 4], 48000, 48000, &mut out).unwrap();
        assert_eq!(resampler.pending_frames(), 0);
        assert_eq!(out, vec![0.5; 4]);
    }

    #[test]
    fn test_reset_clears_buffered_input() {
        let mut resampler = Resampler::new(1);
        let mut out = Vec::new();
        resampler.convert(&[1.0; 100], 44100, 48000, &mut out).unwrap();

        resampler.reset(1);
        assert_eq!(resampler.pending_frames(), 0);

        resampler.reset(2);
        assert_eq!(resampler.channels(), 2);
    }
}
