//! Time-difference-of-arrival source localisation
//!
//! One [`SoundLocation`] per processed block. For every channel the delay
//! against channel 0 is found by a normalised cross-correlation scan over
//! a bounded lag range; the peak value doubles as that channel's
//! confidence. The per-pair range differences then feed the linearised
//! trilateration system, one equation per pair with
//! `(dx_i, dy_i, dz_i) = pos_i − pos_0` and `Δd_i = τ*_i · c / fs`:
//!
//! ```text
//! 2·dx_i·x + 2·dy_i·y + 2·dz_i·z = Δd_i² − (dx_i² + dy_i² + dz_i²)
//! ```
//!
//! The first three usable pairs form a 3×3 system solved by Gaussian
//! elimination with partial pivoting. A pivot below `1e-10` marks the
//! geometry degenerate and the origin is published with the block
//! confidence; coplanar arrays zero the z column, so they always take
//! the degenerate path. Below the confidence gate, or with fewer than
//! four microphones, no solve is attempted.

use crate::error::{AurisError, AurisResult};
use crate::types::{pcm_to_f32, MicPosition, SoundLocation, SPEED_OF_SOUND};

/// Hard ceiling on the correlation scan range
const MAX_DELAY_SAMPLES: usize = 1000;

/// Pivot threshold below which the linear system counts as degenerate
const PIVOT_EPSILON: f32 = 1e-10;

/// Localiser tuning
#[derive(Debug, Clone)]
pub struct LocalizerConfig {
    pub num_microphones: usize,
    pub mic_positions: Vec<MicPosition>,
    pub sample_rate: u32,
    /// Speed of sound in m/s; non-positive values fall back to the default
    pub speed_of_sound: f32,
    /// Minimum samples per channel required to attempt an estimate
    pub correlation_window_size: usize,
    /// Below this mean confidence the origin is reported
    pub min_confidence_threshold: f32,
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            num_microphones: 0,
            mic_positions: Vec::new(),
            sample_rate: crate::types::DEFAULT_SAMPLE_RATE,
            speed_of_sound: SPEED_OF_SOUND,
            correlation_window_size: 1024,
            min_confidence_threshold: 0.3,
        }
    }
}

/// Per-channel delay and confidence relative to channel 0
///
/// Channel 0 always carries delay 0 and confidence 1.
#[derive(Debug, Clone, Default)]
pub struct DelayVector {
    /// Delay in seconds for each channel
    pub delays: Vec<f32>,
    /// Peak normalised correlation for each channel, in `[-1, 1]`
    pub confidences: Vec<f32>,
}

/// Block-wise TDOA localiser
pub struct Localizer {
    num_microphones: usize,
    positions: Vec<MicPosition>,
    sample_rate: u32,
    speed_of_sound: f32,
    correlation_window_size: usize,
    min_confidence_threshold: f32,

    max_delay: usize,
    delay_vector: DelayVector,
}

impl Localizer {
    pub fn new(config: LocalizerConfig) -> AurisResult<Self> {
        if config.num_microphones == 0 {
            return Err(AurisError::InvalidParam(
                "localizer needs at least one microphone".to_string(),
            ));
        }
        if config.mic_positions.len() != config.num_microphones {
            return Err(AurisError::InvalidParam(format!(
                "{} positions for {} microphones",
                config.mic_positions.len(),
                config.num_microphones
            )));
        }
        if config.sample_rate == 0 {
            return Err(AurisError::InvalidParam("sample_rate must be > 0".to_string()));
        }
        if config.correlation_window_size == 0 {
            return Err(AurisError::InvalidParam(
                "correlation_window_size must be > 0".to_string(),
            ));
        }
        let speed_of_sound = if config.speed_of_sound > 0.0 {
            config.speed_of_sound
        } else {
            SPEED_OF_SOUND
        };

        let mut localizer = Self {
            num_microphones: config.num_microphones,
            positions: config.mic_positions,
            sample_rate: config.sample_rate,
            speed_of_sound,
            correlation_window_size: config.correlation_window_size,
            min_confidence_threshold: config.min_confidence_threshold,
            max_delay: 0,
            delay_vector: DelayVector {
                delays: vec![0.0; config.num_microphones],
                confidences: vec![0.0; config.num_microphones],
            },
        };
        localizer.max_delay = localizer.compute_max_delay();
        Ok(localizer)
    }

    /// Replace the microphone geometry; the count must match the array.
    pub fn set_mic_positions(&mut self, positions: &[MicPosition]) -> AurisResult<()> {
        if positions.len() != self.num_microphones {
            return Err(AurisError::InvalidParam(format!(
                "{} positions for {} microphones",
                positions.len(),
                self.num_microphones
            )));
        }
        self.positions.clear();
        self.positions.extend_from_slice(positions);
        self.max_delay = self.compute_max_delay();
        Ok(())
    }

    /// Delays and confidences from the most recent block
    pub fn delay_vector(&self) -> &DelayVector {
        &self.delay_vector
    }

    /// Correlation scan bound: the largest physically possible inter-mic
    /// delay with headroom, capped at [`MAX_DELAY_SAMPLES`].
    fn compute_max_delay(&self) -> usize {
        let mut max_distance = 0.0f32;
        for i in 0..self.positions.len() {
            for j in (i + 1)..self.positions.len() {
                max_distance = max_distance.max(self.positions[i].distance(&self.positions[j]));
            }
        }
        let bound =
            (2.0 * max_distance * self.sample_rate as f32 / self.speed_of_sound).ceil() as usize;
        bound.clamp(1, MAX_DELAY_SAMPLES)
    }

    /// Estimate the source location from one aligned block.
    ///
    /// `channels[i]` holds channel `i`'s samples; all channels must be
    /// present and sample-aligned. Returns the origin with the computed
    /// confidence whenever no usable estimate exists.
    pub fn process(&mut self, channels: &[Vec<i16>]) -> AurisResult<SoundLocation> {
        if channels.len() != self.num_microphones {
            return Err(AurisError::InvalidParam(format!(
                "{} channels for {} microphones",
                channels.len(),
                self.num_microphones
            )));
        }
        let samples = channels[0].len();
        if samples < self.correlation_window_size {
            return Ok(SoundLocation::origin(0.0));
        }

        let reference = &channels[0];
        self.delay_vector.delays[0] = 0.0;
        self.delay_vector.confidences[0] = 1.0;
        for i in 1..self.num_microphones {
            let (delay, confidence) = estimate_delay(reference, &channels[i], self.max_delay);
            self.delay_vector.delays[i] = delay as f32 / self.sample_rate as f32;
            self.delay_vector.confidences[i] = confidence;
        }

        let mean_confidence = self.delay_vector.confidences.iter().sum::<f32>()
            / self.num_microphones as f32;
        if mean_confidence < self.min_confidence_threshold {
            return Ok(SoundLocation::origin(mean_confidence));
        }

        // Three unknowns need three independent pairs
        if self.num_microphones < 4 {
            return Ok(SoundLocation::origin(0.0));
        }

        Ok(self.trilaterate(mean_confidence))
    }

    /// Build the linearised system from the first three usable pairs and
    /// solve it. Degenerate geometry yields the origin with the block
    /// confidence.
    fn trilaterate(&self, confidence: f32) -> SoundLocation {
        let p0 = self.positions[0];

        let mut system = [[0.0f32; 4]; 3];
        let mut equations = 0;
        for i in 1..self.num_microphones {
            if equations == 3 {
                break;
            }
            let pi = self.positions[i];
            let dx = pi.x - p0.x;
            let dy = pi.y - p0.y;
            let dz = pi.z - p0.z;
            let distance_diff = self.delay_vector.delays[i] * self.speed_of_sound;

            system[equations][0] = 2.0 * dx;
            system[equations][1] = 2.0 * dy;
            system[equations][2] = 2.0 * dz;
            system[equations][3] = distance_diff * distance_diff - (dx * dx + dy * dy + dz * dz);
            equations += 1;
        }
        if equations < 3 {
            return SoundLocation::origin(0.0);
        }

        match solve_3x3(&mut system) {
            Some([x, y, z]) => SoundLocation::new(x, y, z, confidence),
            None => SoundLocation::origin(confidence),
        }
    }
}

/// Scan the lag range for the best normalised correlation.
/// Returns `(delay_samples, peak_correlation)`.
fn estimate_delay(reference: &[i16], target: &[i16], max_delay: usize) -> (i32, f32) {
    let mut best_delay = 0i32;
    let mut best_correlation = -1.0f32;
    let max_delay = max_delay as i32;

    for delay in -max_delay..=max_delay {
        let correlation = cross_correlate(reference, target, delay);
        if correlation > best_correlation {
            best_correlation = correlation;
            best_delay = delay;
        }
    }
    (best_delay, best_correlation)
}

/// Normalised cross-correlation of `target` against `reference` at one lag:
/// `Σ ref[n]·tgt[n+τ] / √(Σ ref² · Σ tgt²)` over the overlapping region.
fn cross_correlate(reference: &[i16], target: &[i16], delay: i32) -> f32 {
    let len = reference.len().min(target.len());
    let lag = delay.unsigned_abs() as usize;
    if lag >= len {
        return 0.0;
    }

    let mut correlation = 0.0f32;
    let mut energy_ref = 0.0f32;
    let mut energy_tgt = 0.0f32;
    for i in 0..len - lag {
        let (ri, ti) = if delay >= 0 { (i, i + lag) } else { (i + lag, i) };
        let r = pcm_to_f32(reference[ri]);
        let t = pcm_to_f32(target[ti]);
        correlation += r * t;
        energy_ref += r * r;
        energy_tgt += t * t;
    }

    let denominator = (energy_ref * energy_tgt).sqrt();
    if denominator > 0.0 {
        correlation / denominator
    } else {
        0.0
    }
}

/// In-place Gaussian elimination with partial pivoting on an augmented
/// 3×4 system. Returns `None` when a pivot falls below the threshold.
fn solve_3x3(a: &mut [[f32; 4]; 3]) -> Option<[f32; 3]> {
    for i in 0..3 {
        let mut pivot_row = i;
        for j in (i + 1)..3 {
            if a[j][i].abs() > a[pivot_row][i].abs() {
                pivot_row = j;
            }
        }
        if pivot_row != i {
            a.swap(i, pivot_row);
        }
        if a[i][i].abs() < PIVOT_EPSILON {
            return None;
        }
        for j in (i + 1)..3 {
            let factor = a[j][i] / a[i][i];
            for k in i..4 {
                a[j][k] -= factor * a[i][k];
            }
        }
    }

    let mut x = [0.0f32; 3];
    for i in (0..3).rev() {
        x[i] = a[i][3];
        for j in (i + 1)..3 {
            x[i] -= a[i][j] * x[j];
        }
        x[i] /= a[i][i];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::f32_to_pcm;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn square_array() -> Vec<MicPosition> {
        vec![
            MicPosition::new(0.015, 0.015, 0.0),
            MicPosition::new(-0.015, 0.015, 0.0),
            MicPosition::new(-0.015, -0.015, 0.0),
            MicPosition::new(0.015, -0.015, 0.0),
        ]
    }

    fn localizer_for(positions: Vec<MicPosition>, threshold: f32) -> Localizer {
        let n = positions.len();
        Localizer::new(LocalizerConfig {
            num_microphones: n,
            mic_positions: positions,
            sample_rate: 16_000,
            min_confidence_threshold: threshold,
            ..Default::default()
        })
        .unwrap()
    }

    /// Per-mic 1 kHz tone with the fractional delay a source at `src`
    /// would impose, relative to the first microphone.
    fn delayed_tone(positions: &[MicPosition], src: (f32, f32, f32), len: usize) -> Vec<Vec<i16>> {
        let fs = 16_000.0f32;
        let freq = 1000.0f32;
        let source = MicPosition::new(src.0, src.1, src.2);
        let r0 = positions[0].distance(&source);
        positions
            .iter()
            .map(|p| {
                let delay = (p.distance(&source) - r0) / SPEED_OF_SOUND * fs;
                (0..len)
                    .map(|n| {
                        let t = (n as f32 - delay) / fs;
                        f32_to_pcm(0.5 * (2.0 * std::f32::consts::PI * freq * t).sin())
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_cross_correlation_finds_known_delay() {
        let mut rng = StdRng::seed_from_u64(3);
        let base: Vec<i16> = (0..2048).map(|_| rng.gen_range(-8000..8000)).collect();
        // Target lags the reference by 5 samples
        let mut target = vec![0i16; 2048];
        target[5..].copy_from_slice(&base[..2043]);

        let (delay, confidence) = estimate_delay(&base, &target, 20);
        assert_eq!(delay, 5);
        assert!(confidence > 0.9);
    }

    #[test]
    fn test_confidence_bounded() {
        let mut rng = StdRng::seed_from_u64(11);
        let channels: Vec<Vec<i16>> = (0..4)
            .map(|_| (0..1024).map(|_| rng.gen_range(-20000..20000)).collect())
            .collect();
        let mut localizer = localizer_for(square_array(), 0.0);
        let location = localizer.process(&channels).unwrap();

        assert!(location.confidence.abs() <= 1.0);
        for &c in &localizer.delay_vector().confidences {
            assert!(c.abs() <= 1.0 + 1e-6);
        }
        assert_eq!(localizer.delay_vector().delays[0], 0.0);
        assert_eq!(localizer.delay_vector().confidences[0], 1.0);
    }

    #[test]
    fn test_uncorrelated_noise_gated_to_origin() {
        let mut rng = StdRng::seed_from_u64(29);
        let channels: Vec<Vec<i16>> = (0..4)
            .map(|_| (0..1024).map(|_| rng.gen_range(-20000..20000)).collect())
            .collect();
        let mut localizer = localizer_for(square_array(), 0.5);
        let location = localizer.process(&channels).unwrap();

        // Independent noise correlates near zero; the gate must trip
        assert!(location.confidence < 0.5);
        assert_eq!((location.x, location.y, location.z), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_short_block_yields_origin() {
        let channels: Vec<Vec<i16>> = (0..4).map(|_| vec![0i16; 256]).collect();
        let mut localizer = localizer_for(square_array(), 0.3);
        let location = localizer.process(&channels).unwrap();
        assert_eq!(location, SoundLocation::origin(0.0));
    }

    #[test]
    fn test_too_few_microphones_yields_origin() {
        let positions = vec![
            MicPosition::new(0.015, 0.0, 0.0),
            MicPosition::new(-0.015, 0.0, 0.0),
        ];
        let channels = delayed_tone(&positions, (1.0, 0.0, 0.0), 1024);
        let mut localizer = localizer_for(positions, 0.3);
        let location = localizer.process(&channels).unwrap();
        assert_eq!((location.x, location.y, location.z), (0.0, 0.0, 0.0));
        assert_eq!(location.confidence, 0.0);
    }

    fn tetrahedral_array() -> Vec<MicPosition> {
        vec![
            MicPosition::new(0.0, 0.0, 0.0),
            MicPosition::new(0.1, 0.0, 0.0),
            MicPosition::new(0.0, 0.1, 0.0),
            MicPosition::new(0.0, 0.0, 0.1),
        ]
    }

    fn shared_noise(len: usize, seed: u64) -> Vec<i16> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len).map(|_| rng.gen_range(-20000..20000)).collect()
    }

    #[test]
    fn test_planar_array_is_degenerate() {
        // Coplanar microphones zero the z column of the trilateration
        // system; the pivot check must report the origin while keeping
        // the measured confidence.
        let positions = square_array();
        let channels = delayed_tone(&positions, (1.0, 0.0, 0.0), 1024);
        let mut localizer = localizer_for(positions, 0.3);
        let location = localizer.process(&channels).unwrap();

        assert_eq!((location.x, location.y, location.z), (0.0, 0.0, 0.0));
        assert!(location.confidence >= 0.3, "confidence {}", location.confidence);
    }

    #[test]
    fn test_equidistant_source_solves_linear_system() {
        // Identical channels give zero delay on every pair, so each
        // equation reads 2(p_i − p_0)·X = −|p_i − p_0|². For this
        // geometry the unique solution is (−0.05, −0.05, −0.05).
        let base = shared_noise(1024, 17);
        let channels: Vec<Vec<i16>> = (0..4).map(|_| base.clone()).collect();
        let mut localizer = localizer_for(tetrahedral_array(), 0.3);
        let location = localizer.process(&channels).unwrap();

        assert!((location.confidence - 1.0).abs() < 1e-3);
        assert!((location.x + 0.05).abs() < 1e-4, "x = {}", location.x);
        assert!((location.y + 0.05).abs() < 1e-4, "y = {}", location.y);
        assert!((location.z + 0.05).abs() < 1e-4, "z = {}", location.z);
    }

    #[test]
    fn test_shifted_channel_feeds_distance_difference() {
        // Channel 1 lags the reference by 3 samples. With Δd = 3·c/fs
        // the first equation becomes 0.2·x = Δd² − 0.01; the remaining
        // pairs stay at zero delay.
        let base = shared_noise(1024, 23);
        let mut lagged = vec![0i16; 1024];
        lagged[3..].copy_from_slice(&base[..1021]);
        let channels = vec![base.clone(), lagged, base.clone(), base];

        let mut localizer = localizer_for(tetrahedral_array(), 0.3);
        let location = localizer.process(&channels).unwrap();

        let distance_diff = 3.0 * SPEED_OF_SOUND / 16_000.0;
        let expected_x = (distance_diff * distance_diff - 0.01) / 0.2;
        assert!((location.x - expected_x).abs() < 1e-3, "x = {}", location.x);
        assert!((location.y + 0.05).abs() < 1e-3, "y = {}", location.y);
        assert!((location.z + 0.05).abs() < 1e-3, "z = {}", location.z);
    }

    #[test]
    fn test_channel_count_mismatch_is_invalid() {
        let channels: Vec<Vec<i16>> = (0..3).map(|_| vec![0i16; 1024]).collect();
        let mut localizer = localizer_for(square_array(), 0.3);
        assert!(matches!(
            localizer.process(&channels),
            Err(AurisError::InvalidParam(_))
        ));
    }

    #[test]
    fn test_set_mic_positions_validates_count() {
        let mut localizer = localizer_for(square_array(), 0.3);
        let too_few = vec![MicPosition::default(); 3];
        assert!(localizer.set_mic_positions(&too_few).is_err());
        let ok = vec![MicPosition::default(); 4];
        assert!(localizer.set_mic_positions(&ok).is_ok());
    }
}
