//! Pipeline configuration
//!
//! Loaded from a TOML file; every field has a default so partial files work.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BITRATE, DEFAULT_MS_PER_PACKET, DEFAULT_SAMPLE_RATE, MAX_AUDIO_BUFFER_ARRAY_SIZE,
};
use crate::error::ConfigError;

/// Sample rates the Opus codec accepts
pub const OPUS_SAMPLE_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

/// Packet durations (ms) the Opus codec accepts as a single frame
pub const OPUS_PACKET_DURATIONS_MS: [u32; 7] = [10, 20, 40, 60, 80, 100, 120];

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VoiceConfig {
    /// Codec sample rate; every packet is mono at this rate
    pub sample_rate: u32,
    /// Duration of one packet in milliseconds
    pub ms_per_packet: u32,
    /// Number of encoded packets staged between drains
    pub ring_capacity: usize,
    pub opus: OpusConfig,
    pub tap: TapConfig,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            ms_per_packet: DEFAULT_MS_PER_PACKET,
            ring_capacity: MAX_AUDIO_BUFFER_ARRAY_SIZE,
            opus: OpusConfig::voice(),
            tap: TapConfig::default(),
        }
    }
}

impl VoiceConfig {
    /// Samples in one PCM packet
    pub fn frame_count(&self) -> usize {
        OpusConfig::frame_size_from_ms(self.sample_rate, self.ms_per_packet)
    }

    /// Bytes in one 16-bit mono PCM packet
    pub fn bytes_per_packet(&self) -> usize {
        self.frame_count() * std::mem::size_of::<i16>()
    }

    /// Check that the codec can run with these settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !OPUS_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(ConfigError::Invalid(format!(
                "sample_rate {} not one of {:?}",
                self.sample_rate, OPUS_SAMPLE_RATES
            )));
        }
        if !OPUS_PACKET_DURATIONS_MS.contains(&self.ms_per_packet) {
            return Err(ConfigError::Invalid(format!(
                "ms_per_packet {} not one of {:?}",
                self.ms_per_packet, OPUS_PACKET_DURATIONS_MS
            )));
        }
        if self.ring_capacity == 0 {
            return Err(ConfigError::Invalid("ring_capacity must be at least 1".into()));
        }
        if self.opus.packet_loss_perc > 100 {
            return Err(ConfigError::Invalid(format!(
                "packet_loss_perc {} exceeds 100",
                self.opus.packet_loss_perc
            )));
        }
        self.tap.validate()
    }

    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the per-user config directory, falling back to defaults
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/voice-pipe/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "voice-pipe").map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Opus application profile
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OpusApplication {
    Voice,
    Music,
    LowLatency,
}

/// Encoder settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpusConfig {
    pub application: OpusApplication,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    pub vbr: bool,
    /// Constrained VBR, only meaningful with `vbr`
    pub cvbr: bool,
    /// In-band forward error correction
    pub fec: bool,
    pub packet_loss_perc: u8,
}

impl Default for OpusConfig {
    fn default() -> Self {
        Self::voice()
    }
}

impl OpusConfig {
    pub fn voice() -> Self {
        Self {
            application: OpusApplication::Voice,
            bitrate: DEFAULT_BITRATE,
            vbr: true,
            cvbr: true,
            fec: true,
            packet_loss_perc: 10,
        }
    }

    pub fn music() -> Self {
        Self {
            application: OpusApplication::Music,
            bitrate: 64_000,
            vbr: true,
            cvbr: false,
            fec: false,
            packet_loss_perc: 0,
        }
    }

    pub fn low_latency() -> Self {
        Self {
            application: OpusApplication::LowLatency,
            bitrate: DEFAULT_BITRATE,
            vbr: false,
            cvbr: false,
            fec: false,
            packet_loss_perc: 0,
        }
    }

    /// Samples per channel in a frame of `ms` milliseconds
    pub fn frame_size_from_ms(sample_rate: u32, ms: u32) -> usize {
        (sample_rate as u64 * ms as u64 / 1000) as usize
    }
}

/// Where the demo tap pulls audio from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TapSource {
    /// Synthetic sine tone
    Sine,
    /// Default input device (requires the `device` feature)
    Device,
}

/// Audio tap settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TapConfig {
    pub source: TapSource,
    /// Mix rate of the synthetic tap
    pub mix_rate: u32,
    pub channels: u16,
    pub tone_hz: f32,
    /// Smallest callback block, in frames
    pub min_block: usize,
    /// Largest callback block, in frames
    pub max_block: usize,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            source: TapSource::Sine,
            mix_rate: 44_100,
            channels: 2,
            tone_hz: 440.0,
            min_block: 128,
            max_block: 1024,
        }
    }
}

impl TapConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.mix_rate == 0 {
            return Err(ConfigError::Invalid("tap.mix_rate must be non-zero".into()));
        }
        if self.channels == 0 {
            return Err(ConfigError::Invalid("tap.channels must be non-zero".into()));
        }
        if self.min_block == 0 || self.min_block > self.max_block {
            return Err(ConfigError::Invalid(format!(
                "tap block range {}..={} is empty",
                self.min_block, self.max_block
            )));
        }
        Ok(())
    }
}
