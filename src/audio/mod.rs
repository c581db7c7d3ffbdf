//! Audio subsystem module

pub mod accumulator;
#[cfg(feature = "device")]
pub mod device;
pub mod resampler;
pub mod ring;
pub mod tap;
pub mod upmix;

pub use accumulator::{FrameAccumulator, PcmPacket};
#[cfg(feature = "device")]
pub use device::DeviceTap;
pub use resampler::Resampler;
pub use ring::{EncodedPacket, PacketRing};
pub use tap::{AudioFrame, FrameSink, SineTap};
pub use upmix::{to_stereo_float, StereoFrame};
