//! Post-vocoder effects tail.

pub mod echo;
pub mod reverb;

pub use echo::Echo;
pub use reverb::FirReverb;

/// Intensities below this bypass an effect entirely.
pub const BYPASS_THRESHOLD: f32 = 1e-4;
