//! Mono PCM to stereo float conversion for playback

use super::accumulator::I16_SCALE;

/// One stereo frame: `[left, right]`
pub type StereoFrame = [f32; 2];

/// Convert 16-bit mono PCM to center-panned stereo float.
///
/// Each sample is scaled to `-1.0..1.0` and copied to both channels. Returns
/// an empty vector if `pcm` holds fewer than `frame_count` samples; extra
/// samples beyond `frame_count` are ignored.
pub fn to_stereo_float(pcm: &[i16], frame_count: usize) -> Vec<StereoFrame> {
    let mut out = Vec::with_capacity(frame_count);
    if upmix_into(pcm, frame_count, &mut out) {
        out
    } else {
        Vec::new()
    }
}

/// Same as [`to_stereo_float`] but appends to a reusable buffer.
///
/// Returns `false` without touching `out` if `pcm` is too short.
pub fn upmix_into(pcm: &[i16], frame_count: usize, out: &mut Vec<StereoFrame>) -> bool {
    if pcm.len() < frame_count {
        return false;
    }
    out.extend(pcm[..frame_count].iter().map(|&s| {
        let v = s as f32 / I16_SCALE;
        [v, v]
    }));
    true
}
