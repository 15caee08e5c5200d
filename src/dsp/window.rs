//! Analysis/synthesis windows and overlap-add normalization.

use std::f32::consts::TAU;

/// Hann window: `0.5 * (1 - cos(2π·i / (size - 1)))`.
pub fn hann(size: usize) -> Vec<f32> {
    let denom = (size - 1) as f32;
    (0..size)
        .map(|i| 0.5 * (1.0 - (TAU * i as f32 / denom).cos()))
        .collect()
}

/// Per-offset overlap-add normalizer for double (analysis + synthesis)
/// windowing: `norm[i] = Σ_k w[i + k·hop]²` for `i` in `0..hop`.
///
/// Emitted samples are divided by this table so that overlapped squared
/// windows sum to unity regardless of the overlap ratio. The table also
/// absorbs the slight ripple of the symmetric Hann at hop offsets.
pub fn overlap_norm(window: &[f32], hop: usize) -> Vec<f32> {
    let mut norm = vec![0.0f32; hop];
    for (offset, slot) in norm.iter_mut().enumerate() {
        let mut sum = 0.0;
        let mut i = offset;
        while i < window.len() {
            sum += window[i] * window[i];
            i += hop;
        }
        *slot = sum;
    }
    norm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_is_symmetric_with_zero_endpoints() {
        let w = hann(1024);
        assert!(w[0].abs() < 1e-6);
        assert!(w[1023].abs() < 1e-6);
        for i in 0..512 {
            assert!((w[i] - w[1023 - i]).abs() < 1e-5, "asymmetry at {i}");
        }
        assert!((w[511] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn overlap_norm_is_positive_and_near_constant() {
        let w = hann(1024);
        let norm = overlap_norm(&w, 256);
        // Squared Hann at 4x overlap sums to roughly 3/2 everywhere.
        for (i, &n) in norm.iter().enumerate() {
            assert!(n > 1.0, "degenerate normalizer at offset {i}: {n}");
            assert!((n - 1.5).abs() < 0.05, "unexpected sum at offset {i}: {n}");
        }
    }

    #[test]
    fn overlap_norm_handles_higher_ratios() {
        let w = hann(1024);
        let norm = overlap_norm(&w, 128);
        for &n in &norm {
            assert!((n - 3.0).abs() < 0.1);
        }
    }
}
