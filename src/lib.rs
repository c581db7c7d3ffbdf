//! # Voice Pipe
//!
//! Real-time voice pipeline: taps a live audio mix, packetizes it as Opus and
//! decodes received packets back to stereo float audio for playback.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── AUDIO CALLBACK ────────────────────────────┐
//! │                                                                         │
//! │  ┌───────────┐  interleaved f32, any rate / channel count               │
//! │  │  Mix Tap  │──────────────┐                                           │
//! │  └───────────┘              ▼                                           │
//! │                     ┌───────────────┐   ┌───────────────┐               │
//! │                     │   Resampler   │──▶│  Accumulator  │ mono i16      │
//! │                     │ (stateful)    │   │ (fixed frame) │───────┐       │
//! │                     └───────────────┘   └───────────────┘       ▼       │
//! │                                                         ┌─────────────┐ │
//! │                                                         │ Opus Encode │ │
//! │                                                         └──────┬──────┘ │
//! └────────────────────────────────────────────────────────────────┼────────┘
//!                                                                  ▼
//!                                               ┌──────────────────────────┐
//!                                               │  Packet Ring (N slots,   │
//!                                               │  drop-oldest, one mutex) │
//!                                               └────────────┬─────────────┘
//! ┌──────────────────────────── POLLING ───────────────────────┼────────────┐
//! │                                                            ▼            │
//! │   drain_all() ──▶ transport          received bytes ──▶ Opus Decode     │
//! │                                      (per-peer state)        │          │
//! │                                                              ▼          │
//! │                                                     Stereo Upmixer ──▶  │
//! │                                                     playback buffer     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod pipeline;

pub use error::{Error, Result};
pub use pipeline::{RunMode, VoicePipeline};

/// Application-wide constants
pub mod constants {
    /// Codec sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Packet duration in milliseconds
    pub const DEFAULT_MS_PER_PACKET: u32 = 10;

    /// Samples in one packet at the default rate and duration
    pub const FRAME_COUNT: usize =
        (DEFAULT_SAMPLE_RATE / (1000 / DEFAULT_MS_PER_PACKET)) as usize;

    /// Bytes in one 16-bit mono PCM packet
    pub const BYTES_PER_PACKET: usize = FRAME_COUNT * 2;

    /// Encoded packets staged between drains
    pub const MAX_AUDIO_BUFFER_ARRAY_SIZE: usize = 10;

    /// Default Opus bitrate for speech in bits per second
    pub const DEFAULT_BITRATE: u32 = 24_000;
}
