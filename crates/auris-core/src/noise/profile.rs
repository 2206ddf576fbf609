//! Learned noise magnitude profile
//!
//! Holds the per-bin mean magnitude spectrum of the background noise,
//! estimated over a training pass. The profile moves once from empty to
//! ready and stays ready until an explicit reset; the gain rule in the
//! reducer only engages while it is ready.

/// Mean noise magnitude per frequency bin `[0, frame_size/2]`
#[derive(Debug, Clone)]
pub struct NoiseProfile {
    bins: Vec<f32>,
    accumulated_frames: u32,
    ready: bool,
}

impl NoiseProfile {
    pub fn new(num_bins: usize) -> Self {
        Self {
            bins: vec![0.0; num_bins],
            accumulated_frames: 0,
            ready: false,
        }
    }

    /// Begin a fresh estimate, discarding any previous profile
    pub fn begin_training(&mut self) {
        self.bins.fill(0.0);
        self.accumulated_frames = 0;
        self.ready = false;
    }

    /// Add one frame's magnitude spectrum to the running sum
    pub fn accumulate(&mut self, magnitudes: &[f32]) {
        debug_assert_eq!(magnitudes.len(), self.bins.len());
        for (bin, &m) in self.bins.iter_mut().zip(magnitudes) {
            *bin += m;
        }
        self.accumulated_frames += 1;
    }

    /// Divide the sum down to the mean and mark the profile ready.
    /// A training pass that accumulated nothing leaves the profile empty.
    pub fn finish_training(&mut self) {
        if self.accumulated_frames == 0 {
            return;
        }
        let scale = 1.0 / self.accumulated_frames as f32;
        for bin in &mut self.bins {
            *bin *= scale;
        }
        self.ready = true;
    }

    /// Forget the learned profile entirely
    pub fn reset(&mut self) {
        self.bins.fill(0.0);
        self.accumulated_frames = 0;
        self.ready = false;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn bins(&self) -> &[f32] {
        &self.bins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_over_frames() {
        let mut profile = NoiseProfile::new(4);
        profile.begin_training();
        profile.accumulate(&[1.0, 2.0, 3.0, 4.0]);
        profile.accumulate(&[3.0, 2.0, 1.0, 0.0]);
        profile.finish_training();

        assert!(profile.is_ready());
        assert_eq!(profile.bins(), &[2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_empty_training_not_ready() {
        let mut profile = NoiseProfile::new(4);
        profile.begin_training();
        profile.finish_training();
        assert!(!profile.is_ready());
    }

    #[test]
    fn test_reset_clears_ready() {
        let mut profile = NoiseProfile::new(2);
        profile.begin_training();
        profile.accumulate(&[1.0, 1.0]);
        profile.finish_training();
        assert!(profile.is_ready());

        profile.reset();
        assert!(!profile.is_ready());
        assert_eq!(profile.bins(), &[0.0, 0.0]);
    }
}
