//! Error types for the voice pipeline

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Invalid sample rate conversion: {from} Hz -> {to} Hz")]
    InvalidSampleRate { from: u32, to: u32 },

    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(u16),

    #[error("Frame of {samples} samples is not a multiple of {channels} channels")]
    MisalignedFrame { samples: usize, channels: u16 },

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Resampler error: {0}")]
    Resample(String),
}

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),

    #[error("Read size {read_size} exceeds buffer of {available} bytes")]
    ReadSizeExceedsBuffer { read_size: usize, available: usize },

    #[error("Decoded {decoded} samples, expected {expected}")]
    ShortOutput { decoded: usize, expected: usize },

    #[error("Codec subsystem unavailable")]
    Unavailable,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
