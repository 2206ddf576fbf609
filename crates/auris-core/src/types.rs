//! Common types for the auris processing pipeline
//!
//! Fundamental types shared by every subsystem: microphone geometry,
//! location estimates, and the 16-bit PCM conversions used at the edges
//! of the float DSP core.

/// Hard upper bound on array size supported by the pipeline
pub const MAX_MICROPHONES: usize = 16;

/// Hard upper bound on the per-block sample count
pub const MAX_BLOCK_SAMPLES: usize = 8192;

/// Default capture and processing rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Speed of sound in air at room temperature, m/s
pub const SPEED_OF_SOUND: f32 = 343.0;

/// Position of one microphone in metres, relative to the array centre
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MicPosition {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl MicPosition {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another microphone
    pub fn distance(&self, other: &Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Default circular layout: microphone `i` of `n` sits on a ring of radius
/// `radius` metres in the z = 0 plane.
pub fn circular_layout(n: usize, radius: f32) -> Vec<MicPosition> {
    (0..n)
        .map(|i| {
            let angle = 2.0 * std::f32::consts::PI * i as f32 / n as f32;
            MicPosition::new(radius * angle.cos(), radius * angle.sin(), 0.0)
        })
        .collect()
}

/// Best estimate of the dominant source position for one processed block
///
/// `confidence` is the mean normalised cross-correlation peak over all
/// microphone pairs, in `[0, 1]` for any physical signal. A below-threshold
/// or degenerate solve yields the origin with the computed confidence.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SoundLocation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub confidence: f32,
}

impl SoundLocation {
    pub fn new(x: f32, y: f32, z: f32, confidence: f32) -> Self {
        Self { x, y, z, confidence }
    }

    /// The origin with a given confidence, the "no usable estimate" value
    pub fn origin(confidence: f32) -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, confidence }
    }

    /// Azimuth in radians, measured from +x toward +y
    pub fn azimuth(&self) -> f32 {
        self.y.atan2(self.x)
    }

    /// Distance from the array centre in the horizontal plane
    pub fn horizontal_distance(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

/// Convert one 16-bit PCM sample to float in `[-1, 1)`
#[inline]
pub fn pcm_to_f32(s: i16) -> f32 {
    s as f32 / 32768.0
}

/// Convert a float sample back to 16-bit PCM, clamping to full scale.
/// Rounds to nearest with ties away from zero.
#[inline]
pub fn f32_to_pcm(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// RMS level of a PCM slice as a float in `[0, 1]`
pub fn pcm_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let f = pcm_to_f32(s) as f64;
            f * f
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circular_layout_radius() {
        let positions = circular_layout(8, 0.015);
        assert_eq!(positions.len(), 8);
        for p in &positions {
            let r = (p.x * p.x + p.y * p.y).sqrt();
            assert!((r - 0.015).abs() < 1e-6);
            assert_eq!(p.z, 0.0);
        }
        // Mic 0 sits on the +x axis
        assert!((positions[0].x - 0.015).abs() < 1e-6);
        assert!(positions[0].y.abs() < 1e-6);
    }

    #[test]
    fn test_pcm_roundtrip_extremes() {
        assert_eq!(f32_to_pcm(1.0), 32767);
        assert_eq!(f32_to_pcm(-1.0), -32767);
        assert_eq!(f32_to_pcm(2.0), 32767);
        assert_eq!(f32_to_pcm(0.0), 0);
        assert!((pcm_to_f32(16384) - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_pcm_conversion_rounds_symmetrically() {
        // 0.5 scales to 16383.5 exactly; ties round away from zero
        assert_eq!(f32_to_pcm(0.5), 16384);
        assert_eq!(f32_to_pcm(-0.5), -16384);
    }

    #[test]
    fn test_rms_of_square_wave() {
        let samples: Vec<i16> = (0..64)
            .map(|i| if i % 2 == 0 { 16384 } else { -16384 })
            .collect();
        let rms = pcm_rms(&samples);
        assert!((rms - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_location_azimuth() {
        let loc = SoundLocation::new(1.0, 1.0, 0.0, 1.0);
        assert!((loc.azimuth() - std::f32::consts::FRAC_PI_4).abs() < 1e-6);
        assert!((loc.horizontal_distance() - 2.0_f32.sqrt()).abs() < 1e-6);
    }
}
