//! Configuration types for a modulation session.

use crate::error::VoxmodError;
use std::time::Duration;

/// Default session sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
/// Default analysis frame size in samples.
pub const DEFAULT_FRAME_SIZE: usize = 1024;
/// Default analysis overlap ratio (frame / hop).
pub const DEFAULT_OVERLAP_RATIO: usize = 4;

/// Configuration for a modulation session.
///
/// All values are validated by [`SessionConfig::validate`] before a session
/// starts; invalid values surface as [`VoxmodError::Config`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sample rate in Hz. Immutable for the lifetime of a session.
    pub sample_rate: u32,
    /// Analysis frame size in samples (power of two).
    pub frame_size: usize,
    /// Overlap ratio; hop size is `frame_size / overlap_ratio`.
    pub overlap_ratio: usize,
    /// Input device specification (name or index). None uses system default.
    pub input_device: Option<String>,
    /// Output device specification (name or index). None uses system default.
    pub output_device: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            overlap_ratio: DEFAULT_OVERLAP_RATIO,
            input_device: None,
            output_device: None,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size;
        self
    }

    pub fn with_overlap_ratio(mut self, overlap_ratio: usize) -> Self {
        self.overlap_ratio = overlap_ratio;
        self
    }

    pub fn with_input_device(mut self, device: impl Into<String>) -> Self {
        self.input_device = Some(device.into());
        self
    }

    pub fn with_output_device(mut self, device: impl Into<String>) -> Self {
        self.output_device = Some(device.into());
        self
    }

    /// Samples advanced per analysis tick.
    pub fn hop_size(&self) -> usize {
        self.frame_size / self.overlap_ratio
    }

    /// Number of spectral bins produced by the real FFT.
    pub fn bins(&self) -> usize {
        self.frame_size / 2 + 1
    }

    /// Wall-clock duration of one analysis frame. Used as the bound on
    /// blocking buffer operations and on shutdown join latency.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_size as f64 / self.sample_rate as f64)
    }

    /// Checks rate, frame size, and overlap constraints.
    pub fn validate(&self) -> Result<(), VoxmodError> {
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(VoxmodError::Config(format!(
                "sample rate {} outside 8000..=192000",
                self.sample_rate
            )));
        }
        if !self.frame_size.is_power_of_two() || !(256..=8192).contains(&self.frame_size) {
            return Err(VoxmodError::Config(format!(
                "frame size {} must be a power of two in 256..=8192",
                self.frame_size
            )));
        }
        if self.overlap_ratio < 4 {
            return Err(VoxmodError::Config(format!(
                "overlap ratio {} must be at least 4",
                self.overlap_ratio
            )));
        }
        if self.frame_size % self.overlap_ratio != 0 {
            return Err(VoxmodError::Config(format!(
                "overlap ratio {} must divide frame size {}",
                self.overlap_ratio, self.frame_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.hop_size(), 256);
        assert_eq!(config.bins(), 513);
    }

    #[test]
    fn rejects_bad_frame_size() {
        assert!(SessionConfig::new().with_frame_size(1000).validate().is_err());
        assert!(SessionConfig::new().with_frame_size(128).validate().is_err());
        assert!(SessionConfig::new().with_frame_size(2048).validate().is_ok());
    }

    #[test]
    fn rejects_bad_sample_rate() {
        assert!(SessionConfig::new().with_sample_rate(4000).validate().is_err());
        assert!(SessionConfig::new().with_sample_rate(48_000).validate().is_ok());
    }

    #[test]
    fn rejects_bad_overlap() {
        assert!(SessionConfig::new().with_overlap_ratio(2).validate().is_err());
        assert!(SessionConfig::new().with_overlap_ratio(8).validate().is_ok());
    }
}
