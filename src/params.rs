//! Lock-free modulation parameter publication.
//!
//! The control surface publishes whole parameter snapshots; the processor
//! stage loads one snapshot per hop. Uses atomic pointer swapping via
//! `ArcSwap` so the audio path never takes a lock and never observes a torn
//! snapshot.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::VoxmodError;

pub const PITCH_FACTOR_RANGE: (f32, f32) = (0.25, 4.0);
pub const SPEED_FACTOR_RANGE: (f32, f32) = (0.5, 2.0);
pub const INTENSITY_RANGE: (f32, f32) = (0.0, 1.0);

/// Modulation settings applied by the processor stage.
///
/// Plain value type; cheap to copy into the audio thread. Out-of-range
/// values are clamped at publication, never on the audio path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulationParams {
    /// Multiplier applied to per-bin phase advance.
    pub pitch_factor: f32,
    /// Ratio of synthesis hop to analysis hop.
    pub speed_factor: f32,
    /// Echo mix level; 0 bypasses the delay line.
    pub echo_intensity: f32,
    /// Echo tap distance in samples. Clamped to one second at publish.
    pub echo_delay_samples: u32,
    /// Reverb wet level; 0 bypasses the convolution.
    pub reverb_intensity: f32,
}

impl Default for ModulationParams {
    fn default() -> Self {
        Self::defaults_for(crate::config::DEFAULT_SAMPLE_RATE)
    }
}

impl ModulationParams {
    /// Neutral settings for the given session rate: unity pitch and speed,
    /// effects off, echo tap at half a second.
    pub fn defaults_for(sample_rate: u32) -> Self {
        Self {
            pitch_factor: 1.0,
            speed_factor: 1.0,
            echo_intensity: 0.0,
            echo_delay_samples: sample_rate / 2,
            reverb_intensity: 0.0,
        }
    }

    fn is_finite(&self) -> bool {
        self.pitch_factor.is_finite()
            && self.speed_factor.is_finite()
            && self.echo_intensity.is_finite()
            && self.reverb_intensity.is_finite()
    }

    /// Returns a copy with every field clamped to its valid range.
    pub fn clamped(&self, sample_rate: u32) -> Self {
        Self {
            pitch_factor: self.pitch_factor.clamp(PITCH_FACTOR_RANGE.0, PITCH_FACTOR_RANGE.1),
            speed_factor: self.speed_factor.clamp(SPEED_FACTOR_RANGE.0, SPEED_FACTOR_RANGE.1),
            echo_intensity: self.echo_intensity.clamp(INTENSITY_RANGE.0, INTENSITY_RANGE.1),
            echo_delay_samples: self.echo_delay_samples.min(sample_rate),
            reverb_intensity: self
                .reverb_intensity
                .clamp(INTENSITY_RANGE.0, INTENSITY_RANGE.1),
        }
    }
}

/// A published snapshot: parameters plus a monotone version counter.
#[derive(Debug, Clone, Copy)]
pub struct ParamSnapshot {
    pub params: ModulationParams,
    pub version: u64,
}

/// One-writer, one-reader parameter channel.
///
/// Writers swap in a whole new snapshot; the processor stage loads the
/// current snapshot once per hop. Reads and writes are lock-free and the
/// reader always sees a consistent snapshot.
pub struct ParamChannel {
    snapshot: ArcSwap<ParamSnapshot>,
    version: AtomicU64,
    sample_rate: u32,
}

impl ParamChannel {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(ParamSnapshot {
                params: ModulationParams::defaults_for(sample_rate),
                version: 0,
            }),
            version: AtomicU64::new(0),
            sample_rate,
        }
    }

    /// Validates and publishes a new snapshot.
    ///
    /// Non-finite values are rejected and never reach the audio path;
    /// finite out-of-range values are clamped. Returns the new version.
    pub fn publish(&self, params: ModulationParams) -> Result<u64, VoxmodError> {
        if !params.is_finite() {
            return Err(VoxmodError::Config(
                "modulation parameters must be finite".into(),
            ));
        }
        let params = params.clamped(self.sample_rate);
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        self.snapshot.store(Arc::new(ParamSnapshot { params, version }));
        Ok(version)
    }

    /// Loads the current snapshot (lock-free, allocation-free).
    #[inline]
    pub fn load(&self) -> Arc<ParamSnapshot> {
        self.snapshot.load_full()
    }

    /// Version of the most recently published snapshot.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_clamps_out_of_range_values() {
        let channel = ParamChannel::new(44_100);
        let wild = ModulationParams {
            pitch_factor: 100.0,
            speed_factor: 0.01,
            echo_intensity: -2.0,
            echo_delay_samples: 1_000_000,
            reverb_intensity: 7.0,
        };
        channel.publish(wild).unwrap();
        let snap = channel.load();
        assert_eq!(snap.params.pitch_factor, 4.0);
        assert_eq!(snap.params.speed_factor, 0.5);
        assert_eq!(snap.params.echo_intensity, 0.0);
        assert_eq!(snap.params.echo_delay_samples, 44_100);
        assert_eq!(snap.params.reverb_intensity, 1.0);
    }

    #[test]
    fn publish_increments_version() {
        let channel = ParamChannel::new(44_100);
        assert_eq!(channel.load().version, 0);
        let v1 = channel.publish(ModulationParams::defaults_for(44_100)).unwrap();
        let v2 = channel.publish(ModulationParams::defaults_for(44_100)).unwrap();
        assert_eq!(v1, 1);
        assert_eq!(v2, 2);
        assert_eq!(channel.load().version, 2);
        assert_eq!(channel.version(), 2);
    }

    #[test]
    fn publish_rejects_non_finite() {
        let channel = ParamChannel::new(44_100);
        let mut params = ModulationParams::defaults_for(44_100);
        params.pitch_factor = f32::NAN;
        assert!(channel.publish(params).is_err());
        // Rejected snapshot must not become visible.
        assert_eq!(channel.load().version, 0);
        assert!(channel.load().params.pitch_factor.is_finite());
    }

    #[test]
    fn defaults_track_sample_rate() {
        let params = ModulationParams::defaults_for(48_000);
        assert_eq!(params.echo_delay_samples, 24_000);
        assert_eq!(params.pitch_factor, 1.0);
    }
}
