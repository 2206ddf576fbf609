//! Pipeline configuration
//!
//! The configuration surface consumed by [`crate::pipeline::Pipeline`]:
//! array geometry, sample rates, noise-reduction tuning and output gain.
//! Files are YAML, loaded through the generic helpers in [`io`].
//!
//! Defaults match the shipped reference tuning for an 8-element circular
//! array at 16 kHz; `validate()` must pass before the pipeline will accept
//! a configuration.

mod io;

pub use io::{load_config, save_config};

use serde::{Deserialize, Serialize};

use crate::error::{AurisError, AurisResult};
use crate::types::{circular_layout, MicPosition, MAX_BLOCK_SAMPLES, MAX_MICROPHONES};

/// Top-level configuration for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrayConfig {
    /// Number of microphones in the array (1-16)
    pub num_microphones: usize,
    /// Radial spacing of the default circular layout, in millimetres
    pub mic_spacing: f32,
    /// Capture and processing sample rate in Hz
    pub sample_rate: u32,
    /// Samples per capture block, per channel
    pub dma_buffer_size: usize,
    /// Skip spectral noise suppression entirely when false
    pub noise_reduction_enable: bool,
    /// SNR gate for the spectral-subtraction gain rule
    pub noise_threshold: f32,
    /// Noise-reduction algorithm name (parsed at pipeline init)
    pub algorithm: String,
    /// Post-gain applied by the sink, 0.0-1.0
    pub volume: f32,
    /// Localiser gate: below this mean confidence the origin is reported
    pub min_confidence_threshold: f32,
    /// Explicit microphone positions in metres; overrides the circular
    /// layout when present. Must contain exactly `num_microphones` entries.
    pub mic_positions: Option<Vec<[f32; 3]>>,
    /// Capture device name, or None for the system default
    pub input_device: Option<String>,
    /// Playback device name, or None for the system default
    pub output_device: Option<String>,
}

impl Default for ArrayConfig {
    fn default() -> Self {
        Self {
            num_microphones: 8,
            mic_spacing: 15.0,
            sample_rate: crate::types::DEFAULT_SAMPLE_RATE,
            dma_buffer_size: 1024,
            noise_reduction_enable: true,
            noise_threshold: 0.05,
            algorithm: "spectral_subtraction".to_string(),
            volume: 0.8,
            min_confidence_threshold: 0.3,
            mic_positions: None,
            input_device: None,
            output_device: None,
        }
    }
}

impl ArrayConfig {
    /// Validate every field against its documented range
    pub fn validate(&self) -> AurisResult<()> {
        if self.num_microphones < 1 || self.num_microphones > MAX_MICROPHONES {
            return Err(AurisError::Config(format!(
                "num_microphones = {} out of range 1-{}",
                self.num_microphones, MAX_MICROPHONES
            )));
        }
        if self.mic_spacing <= 0.0 {
            return Err(AurisError::Config(format!(
                "mic_spacing = {} must be > 0",
                self.mic_spacing
            )));
        }
        if self.sample_rate == 0 {
            return Err(AurisError::Config("sample_rate must be > 0".to_string()));
        }
        if self.dma_buffer_size < 1 || self.dma_buffer_size > MAX_BLOCK_SAMPLES {
            return Err(AurisError::Config(format!(
                "dma_buffer_size = {} out of range 1-{}",
                self.dma_buffer_size, MAX_BLOCK_SAMPLES
            )));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(AurisError::Config(format!(
                "volume = {} out of range 0.0-1.0",
                self.volume
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence_threshold) {
            return Err(AurisError::Config(format!(
                "min_confidence_threshold = {} out of range 0.0-1.0",
                self.min_confidence_threshold
            )));
        }
        if let Some(positions) = &self.mic_positions {
            if positions.len() != self.num_microphones {
                return Err(AurisError::Config(format!(
                    "mic_positions has {} entries for {} microphones",
                    positions.len(),
                    self.num_microphones
                )));
            }
        }
        Ok(())
    }

    /// Microphone geometry in metres: the explicit override when present,
    /// otherwise the default circular layout derived from `mic_spacing`.
    pub fn mic_positions(&self) -> Vec<MicPosition> {
        match &self.mic_positions {
            Some(explicit) => explicit
                .iter()
                .map(|p| MicPosition::new(p[0], p[1], p[2]))
                .collect(),
            None => circular_layout(self.num_microphones, self.mic_spacing / 1000.0),
        }
    }

    /// Log the effective configuration, one line per field
    pub fn log_summary(&self) {
        log::info!("Configuration:");
        log::info!("  Microphones: {}", self.num_microphones);
        log::info!("  Mic spacing: {:.1} mm", self.mic_spacing);
        log::info!("  Sample rate: {} Hz", self.sample_rate);
        log::info!("  Block size: {} samples", self.dma_buffer_size);
        log::info!(
            "  Noise reduction: {} (threshold {:.3}, algorithm {})",
            if self.noise_reduction_enable { "enabled" } else { "disabled" },
            self.noise_threshold,
            self.algorithm
        );
        log::info!("  Volume: {:.2}", self.volume);
        log::info!(
            "  Min confidence: {:.2}",
            self.min_confidence_threshold
        );
        match &self.mic_positions {
            Some(_) => log::info!("  Geometry: explicit positions"),
            None => log::info!("  Geometry: circular layout"),
        }
    }
}
