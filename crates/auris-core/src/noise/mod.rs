//! Short-time Fourier noise suppression
//!
//! Streaming spectral subtraction over windowed overlapping frames. Each
//! channel owns one [`NoiseReducer`]: samples accumulate until a full
//! frame is available, the frame is windowed and transformed, per-bin
//! gains derived from the learned noise profile scale the spectrum, and
//! the inverse transform is overlap-added with the retained tail.
//!
//! # Windowing
//!
//! Analysis and synthesis use a matched root-Hann pair: the square root
//! of `0.5 (1 − cos(2π i / (F−1)))` on both sides, so the effective
//! analysis×synthesis product is the Hann window, which overlap-adds to
//! a constant at the default 50% overlap. Windowing the full Hann on
//! both sides would amplitude-modulate the output, since Hann squared
//! has no constant-overlap-add property at this hop.
//!
//! # Gain rule
//!
//! With profile bin `N_k`, magnitude `M_k` and a posteriori SNR
//! `ρ_k = M_k / (N_k + ε)`:
//!
//! ```text
//! g_k = 1 − α · N_k / M_k   if ρ_k > θ
//! g_k = β                   otherwise
//! g_k clamped to [β, 1]
//! ```
//!
//! Until the profile is ready the spectrum passes through untouched.

mod profile;

pub use profile::NoiseProfile;

use std::str::FromStr;
use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::error::{AurisError, AurisResult};
use crate::types::{f32_to_pcm, pcm_to_f32};

/// Denominator guard for the SNR ratio
const EPSILON: f32 = 1e-10;

/// Supported suppression algorithms
///
/// The configuration names an algorithm as a string; unknown names are
/// rejected when the reducer is built, never at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseAlgorithm {
    SpectralSubtraction,
}

impl FromStr for NoiseAlgorithm {
    type Err = AurisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spectral_subtraction" => Ok(NoiseAlgorithm::SpectralSubtraction),
            other => Err(AurisError::InvalidParam(format!(
                "unknown noise reduction algorithm '{other}'"
            ))),
        }
    }
}

/// Tuning for one [`NoiseReducer`]
#[derive(Debug, Clone)]
pub struct NoiseReducerConfig {
    /// FFT frame size; must be a power of two
    pub frame_size: usize,
    /// Samples shared between successive frames; hop = frame_size − overlap
    pub overlap: usize,
    /// Oversubtraction factor α
    pub alpha: f32,
    /// Spectral floor β; also the lower gain clamp
    pub beta: f32,
    /// SNR gate θ below which the floor gain applies
    pub noise_threshold: f32,
    /// Algorithm name, parsed on construction
    pub algorithm: String,
}

impl Default for NoiseReducerConfig {
    fn default() -> Self {
        Self {
            frame_size: 1024,
            overlap: 512,
            alpha: 2.0,
            beta: 0.1,
            noise_threshold: 0.05,
            algorithm: "spectral_subtraction".to_string(),
        }
    }
}

/// Streaming per-channel STFT state: the accumulation buffer, its fill
/// position, and the overlap tail carried between frames.
struct StftState {
    input: Vec<f32>,
    pos: usize,
    tail: Vec<f32>,
}

/// Single-channel spectral-subtraction noise reducer
pub struct NoiseReducer {
    frame_size: usize,
    hop: usize,
    overlap: usize,
    alpha: f32,
    beta: f32,
    threshold: f32,
    algorithm: NoiseAlgorithm,

    window: Vec<f32>,
    fft: Arc<dyn RealToComplex<f32>>,
    ifft: Arc<dyn ComplexToReal<f32>>,

    profile: NoiseProfile,
    state: StftState,

    // Scratch, allocated once
    frame: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    synth: Vec<f32>,
    gains: Vec<f32>,
}

impl NoiseReducer {
    /// Build a reducer, validating frame geometry and the algorithm name.
    pub fn new(config: &NoiseReducerConfig) -> AurisResult<Self> {
        if !config.frame_size.is_power_of_two() || config.frame_size < 2 {
            return Err(AurisError::InvalidParam(format!(
                "frame_size = {} must be a power of two",
                config.frame_size
            )));
        }
        if config.overlap >= config.frame_size {
            return Err(AurisError::InvalidParam(format!(
                "overlap = {} must be smaller than frame_size = {}",
                config.overlap, config.frame_size
            )));
        }
        let algorithm = config.algorithm.parse::<NoiseAlgorithm>()?;

        let frame_size = config.frame_size;
        let hop = frame_size - config.overlap;
        let num_bins = frame_size / 2 + 1;

        // Matched root-Hann pair: product of analysis and synthesis
        // windows is the Hann window.
        let window: Vec<f32> = (0..frame_size)
            .map(|i| {
                let hann = 0.5
                    * (1.0
                        - (2.0 * std::f32::consts::PI * i as f32 / (frame_size - 1) as f32).cos());
                hann.sqrt()
            })
            .collect();

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(frame_size);
        let ifft = planner.plan_fft_inverse(frame_size);

        Ok(Self {
            frame_size,
            hop,
            overlap: config.overlap,
            alpha: config.alpha,
            beta: config.beta,
            threshold: config.noise_threshold,
            algorithm,
            window,
            fft,
            ifft,
            profile: NoiseProfile::new(num_bins),
            state: StftState {
                input: vec![0.0; frame_size],
                pos: 0,
                tail: vec![0.0; config.overlap],
            },
            frame: vec![0.0; frame_size],
            spectrum: vec![Complex::new(0.0, 0.0); num_bins],
            synth: vec![0.0; frame_size],
            gains: vec![1.0; num_bins],
        })
    }

    /// Samples of delay between input and reconstructed output
    pub fn latency_samples(&self) -> usize {
        self.frame_size - self.hop
    }

    /// Adjust the SNR gate while running
    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    pub fn profile(&self) -> &NoiseProfile {
        &self.profile
    }

    /// Forget the learned noise profile; the reducer passes audio through
    /// until retrained.
    pub fn reset_profile(&mut self) {
        self.profile.reset();
    }

    /// Gains applied to the most recent frame, one per bin. Diagnostic.
    pub fn gains(&self) -> &[f32] {
        &self.gains
    }

    /// Learn the noise profile from a capture of background noise.
    ///
    /// Frames of `frame_size` samples are taken at a stride of half a
    /// frame and their magnitude spectra averaged. Fewer than
    /// `frame_size` samples accumulate nothing and leave any existing
    /// profile untouched.
    pub fn update_noise_profile(&mut self, samples: &[i16]) -> AurisResult<()> {
        if samples.len() < self.frame_size {
            return Ok(());
        }

        self.profile.begin_training();
        let stride = self.frame_size / 2;
        let mut offset = 0;
        while offset + self.frame_size <= samples.len() {
            for (i, slot) in self.frame.iter_mut().enumerate() {
                *slot = pcm_to_f32(samples[offset + i]) * self.window[i];
            }
            self.fft
                .process(&mut self.frame, &mut self.spectrum)
                .map_err(|e| AurisError::InvalidParam(format!("fft: {e}")))?;
            let magnitudes: Vec<f32> = self.spectrum.iter().map(|c| c.norm()).collect();
            self.profile.accumulate(&magnitudes);
            offset += stride;
        }
        self.profile.finish_training();
        log::debug!(
            "Noise profile trained over {} samples",
            samples.len()
        );
        Ok(())
    }

    /// Process a block of samples in place.
    ///
    /// Output lags input by `latency_samples()`; positions for which no
    /// reconstructed audio exists yet keep their original samples.
    pub fn process(&mut self, samples: &mut [i16]) -> AurisResult<()> {
        let mut read = 0;
        let mut write = 0;

        while read < samples.len() {
            let to_copy = (samples.len() - read).min(self.frame_size - self.state.pos);
            for i in 0..to_copy {
                self.state.input[self.state.pos + i] = pcm_to_f32(samples[read + i]);
            }
            self.state.pos += to_copy;
            read += to_copy;

            if self.state.pos == self.frame_size {
                self.process_frame()?;

                let emit = self.hop.min(samples.len() - write);
                for i in 0..emit {
                    samples[write + i] = f32_to_pcm(self.synth[i]);
                }
                write += emit;

                self.state.input.copy_within(self.hop.., 0);
                self.state.pos -= self.hop;
            }
        }
        Ok(())
    }

    /// Analyse, scale and resynthesise the frame at the head of the
    /// accumulation buffer. Leaves `hop` finished samples at the front of
    /// `synth` and retains the new overlap tail.
    fn process_frame(&mut self) -> AurisResult<()> {
        for i in 0..self.frame_size {
            self.frame[i] = self.state.input[i] * self.window[i];
        }
        self.fft
            .process(&mut self.frame, &mut self.spectrum)
            .map_err(|e| AurisError::InvalidParam(format!("fft: {e}")))?;

        if self.profile.is_ready() {
            match self.algorithm {
                NoiseAlgorithm::SpectralSubtraction => self.apply_spectral_subtraction(),
            }
        }

        // Real inverse transform requires purely real DC and Nyquist bins
        self.spectrum[0].im = 0.0;
        let last = self.spectrum.len() - 1;
        self.spectrum[last].im = 0.0;

        self.ifft
            .process(&mut self.spectrum, &mut self.synth)
            .map_err(|e| AurisError::InvalidParam(format!("ifft: {e}")))?;

        // The inverse transform is unnormalised
        let scale = 1.0 / self.frame_size as f32;
        for i in 0..self.frame_size {
            self.synth[i] = self.synth[i] * scale * self.window[i];
        }
        for i in 0..self.overlap {
            self.synth[i] += self.state.tail[i];
        }
        self.state.tail.copy_from_slice(&self.synth[self.hop..]);
        Ok(())
    }

    /// Scale each bin by the subtraction gain. Multiplying the complex
    /// bin by a real gain preserves the phase without a polar round trip.
    fn apply_spectral_subtraction(&mut self) {
        let noise = self.profile.bins();
        for (k, bin) in self.spectrum.iter_mut().enumerate() {
            let magnitude = bin.norm();
            let snr = magnitude / (noise[k] + EPSILON);

            let gain = if snr > self.threshold {
                1.0 - self.alpha * (noise[k] / magnitude)
            } else {
                self.beta
            };
            let gain = gain.max(self.beta).min(1.0);

            self.gains[k] = gain;
            *bin *= gain;
        }
    }
}
