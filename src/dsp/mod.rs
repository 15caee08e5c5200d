//! Low-level DSP primitives.

pub mod agc;
pub mod vocoder;
pub mod window;

pub use agc::Agc;
pub use vocoder::PhaseVocoder;
pub use window::{hann, overlap_norm};

/// Flush-to-zero: clamps denormal-range values to 0.0.
///
/// Used on recirculating effect state so feedback tails decay to true
/// silence instead of lingering in denormal territory.
#[inline]
pub fn ftz(value: f32, threshold: f32) -> f32 {
    if value.abs() < threshold {
        0.0
    } else {
        value
    }
}
