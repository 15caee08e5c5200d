//! Short FIR reverb.
//!
//! Convolves the signal with a fixed impulse response of decaying
//! pseudo-random taps, roughly 100 ms long. The response is generated from
//! a seeded xorshift so every session hears the same room.

use crate::effects::BYPASS_THRESHOLD;

const TAP_SEED: u32 = 0x9E37_79B9;
const DECAY_RATE: f32 = 5.0;

#[derive(Clone)]
pub struct FirReverb {
    taps: Vec<f32>,
    history: Vec<f32>,
    write_pos: usize,
}

impl FirReverb {
    pub fn new(sample_rate: u32) -> Self {
        let len = (sample_rate as f32 * 0.1) as usize;
        Self {
            taps: impulse_response(len),
            history: vec![0.0; len],
            write_pos: 0,
        }
    }

    /// Processes one block in place:
    /// `y[n] = (1 - intensity)·x[n] + intensity·Σ h[k]·x[n-k]`.
    /// Identity when `intensity` is below the bypass threshold (history
    /// still follows the signal so a later re-enable has a warm tail).
    pub fn process_block(&mut self, block: &mut [f32], intensity: f32) {
        let len = self.history.len();

        if intensity < BYPASS_THRESHOLD {
            for &sample in block.iter() {
                self.history[self.write_pos] = sample;
                self.write_pos = (self.write_pos + 1) % len;
            }
            return;
        }

        let dry = 1.0 - intensity;
        for sample in block.iter_mut() {
            self.history[self.write_pos] = *sample;
            let mut wet = 0.0;
            for (k, &tap) in self.taps.iter().enumerate() {
                let pos = if self.write_pos >= k {
                    self.write_pos - k
                } else {
                    len - (k - self.write_pos)
                };
                wet += tap * self.history[pos];
            }
            self.write_pos = (self.write_pos + 1) % len;
            *sample = dry * *sample + intensity * wet;
        }
    }

    pub fn clear(&mut self) {
        self.history.fill(0.0);
        self.write_pos = 0;
    }
}

/// Decaying pseudo-random taps, normalized to unit energy.
fn impulse_response(len: usize) -> Vec<f32> {
    let mut state = TAP_SEED;
    let mut taps: Vec<f32> = (0..len)
        .map(|k| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let uniform = state as f32 / u32::MAX as f32 * 2.0 - 1.0;
            let envelope = (-DECAY_RATE * k as f32 / len as f32).exp();
            uniform * envelope
        })
        .collect();
    let energy = taps.iter().map(|t| t * t).sum::<f32>().sqrt();
    for tap in taps.iter_mut() {
        *tap /= energy;
    }
    taps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_is_deterministic_and_normalized() {
        let a = impulse_response(4410);
        let b = impulse_response(4410);
        assert_eq!(a, b);
        let energy = a.iter().map(|t| t * t).sum::<f32>();
        assert!((energy - 1.0).abs() < 1e-3);
    }

    #[test]
    fn impulse_reveals_the_tap_pattern() {
        let mut reverb = FirReverb::new(44_100);
        let taps = impulse_response(4410);
        let mut signal = vec![0.0f32; 4410];
        signal[0] = 1.0;

        for chunk in signal.chunks_mut(256) {
            reverb.process_block(chunk, 0.5);
        }

        assert!((signal[0] - (0.5 + 0.5 * taps[0])).abs() < 1e-5);
        for n in 1..4410 {
            assert!(
                (signal[n] - 0.5 * taps[n]).abs() < 1e-5,
                "tap mismatch at {n}"
            );
        }
    }

    #[test]
    fn zero_intensity_is_identity() {
        let mut reverb = FirReverb::new(44_100);
        let original: Vec<f32> = (0..2048).map(|i| (i as f32 * 0.02).sin()).collect();
        let mut signal = original.clone();
        for chunk in signal.chunks_mut(256) {
            reverb.process_block(chunk, 0.0);
        }
        assert_eq!(signal, original);
    }

    #[test]
    fn tail_decays() {
        let taps = impulse_response(4410);
        let head: f32 = taps[..441].iter().map(|t| t * t).sum();
        let tail: f32 = taps[3969..].iter().map(|t| t * t).sum();
        assert!(head > tail * 100.0);
    }
}
