//! Location-driven stereo rendering
//!
//! Maps a [`SoundLocation`] to per-ear gains and applies them to the mono
//! down-mix. The pan position is the azimuth `atan2(y, x)` scaled by 1/π
//! and clamped to `[−1, 1]`; both gains additionally scale with the
//! distance attenuation `1/(1 + 0.1 r)` over the horizontal distance and
//! with the estimate confidence, so an uncertain location collapses
//! toward silence rather than jumping around the stereo field. Rendered
//! samples are clipped to the 16-bit range.

use crate::types::{f32_to_pcm, pcm_to_f32, SoundLocation};

/// Per-ear linear gains derived from pan position, distance attenuation
/// and confidence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoGains {
    pub left: f32,
    pub right: f32,
}

/// Renders the mono down-mix into a spatialised stereo pair
#[derive(Debug, Default)]
pub struct StereoPanner;

impl StereoPanner {
    pub fn new() -> Self {
        Self
    }

    /// Gains for one location estimate
    pub fn gains(&self, location: &SoundLocation) -> StereoGains {
        let azimuth = location.y.atan2(location.x);
        let pan = (azimuth / std::f32::consts::PI).clamp(-1.0, 1.0);

        let distance = location.horizontal_distance();
        let attenuation = (1.0 / (1.0 + 0.1 * distance)).clamp(0.1, 1.0);

        let scale = attenuation * location.confidence;

        StereoGains {
            left: ((1.0 - pan) / 2.0 + 0.5) * scale,
            right: ((1.0 + pan) / 2.0 + 0.5) * scale,
        }
    }

    /// Fill `stereo` with the panned mono signal, interleaved L/R.
    /// `stereo` must hold `2 * mono.len()` samples.
    pub fn render(&self, mono: &[i16], location: &SoundLocation, stereo: &mut [i16]) {
        debug_assert_eq!(stereo.len(), mono.len() * 2);
        let gains = self.gains(location);
        for (i, &sample) in mono.iter().enumerate() {
            let s = pcm_to_f32(sample);
            stereo[i * 2] = f32_to_pcm(s * gains.left);
            stereo[i * 2 + 1] = f32_to_pcm(s * gains.right);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_ahead_is_centred() {
        let panner = StereoPanner::new();
        let gains = panner.gains(&SoundLocation::new(1.0, 0.0, 0.0, 1.0));
        assert!((gains.left - gains.right).abs() < 1e-6);
        assert!(gains.left > 0.0);
    }

    #[test]
    fn test_right_bias_grows_with_azimuth() {
        // Moving the source from dead ahead toward +y swings the pan
        // right: the gain difference grows strictly.
        let panner = StereoPanner::new();
        let mut previous = f32::NEG_INFINITY;
        for &y in &[0.0f32, 0.25, 0.5, 0.75, 1.0] {
            let gains = panner.gains(&SoundLocation::new(1.0, y, 0.0, 1.0));
            let diff = gains.right - gains.left;
            assert!(diff > previous, "difference regressed at y = {y}: {diff}");
            previous = diff;
        }
    }

    #[test]
    fn test_left_right_symmetry() {
        let panner = StereoPanner::new();
        let right = panner.gains(&SoundLocation::new(0.8, 0.6, 0.0, 1.0));
        let left = panner.gains(&SoundLocation::new(0.8, -0.6, 0.0, 1.0));
        assert!((right.right - left.left).abs() < 1e-6);
        assert!((right.left - left.right).abs() < 1e-6);
    }

    #[test]
    fn test_source_behind_pans_hard() {
        // atan2(0, -1) is π, so a source dead behind maps to full pan
        let panner = StereoPanner::new();
        let gains = panner.gains(&SoundLocation::new(-1.0, 0.0, 0.0, 1.0));
        assert!((gains.right - 3.0 * gains.left).abs() < 1e-6);
    }

    #[test]
    fn test_zero_confidence_mutes() {
        let panner = StereoPanner::new();
        let gains = panner.gains(&SoundLocation::new(0.5, 0.5, 0.0, 0.0));
        assert_eq!(gains.left, 0.0);
        assert_eq!(gains.right, 0.0);
    }

    #[test]
    fn test_distance_attenuates() {
        let panner = StereoPanner::new();
        let near = panner.gains(&SoundLocation::new(0.0, 0.1, 0.0, 1.0));
        let far = panner.gains(&SoundLocation::new(0.0, 5.0, 0.0, 1.0));
        assert!(far.left < near.left);
        assert!(far.right < near.right);
    }

    #[test]
    fn test_render_interleaves_and_clips() {
        let panner = StereoPanner::new();
        let mono = [16384i16; 4];
        let mut stereo = [0i16; 8];
        // Source at +y: pan 0.5, right ear louder
        panner.render(&mono, &SoundLocation::new(0.0, 1.0, 0.0, 1.0), &mut stereo);
        for frame in stereo.chunks(2) {
            assert!(frame[1] > frame[0]);
            assert!(frame[0] > 0);
        }

        // A full-scale sample with the above-unity right gain must clip
        // instead of wrapping
        let loud = [32767i16; 2];
        let mut out = [0i16; 4];
        panner.render(&loud, &SoundLocation::new(0.0, 1.0, 0.0, 1.0), &mut out);
        assert_eq!(out[1], 32767);
        assert_eq!(out[3], 32767);
    }
}
