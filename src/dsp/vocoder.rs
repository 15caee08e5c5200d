//! Streaming phase vocoder.
//!
//! Consumes hop-sized blocks of mono audio and produces hop-sized blocks of
//! pitch-shifted audio at a fixed latency of one frame minus one hop.
//! Analysis is a sliding Hann-windowed real FFT; synthesis re-derives each
//! bin's true instantaneous frequency from its unwrapped phase delta, scales
//! it by the pitch factor, moves the magnitude to the pitch-scaled target
//! bin, and resynthesizes by accumulated-phase inverse FFT with normalized
//! overlap-add.

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use std::f32::consts::TAU;
use std::sync::Arc;

use crate::dsp::window::{hann, overlap_norm};
use crate::error::VoxmodError;

/// Bins quieter than this neither move phase state nor reach synthesis;
/// accumulating phase from numerical noise injects audible hiss.
const MAG_EPSILON: f32 = 1e-9;

pub struct PhaseVocoder {
    frame_size: usize,
    hop_size: usize,
    bins: usize,

    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    forward_scratch: Vec<Complex<f32>>,
    inverse_scratch: Vec<Complex<f32>>,

    window: Vec<f32>,
    ola_norm: Vec<f32>,

    input_history: Vec<f32>,
    windowed: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    resynth: Vec<f32>,

    prev_phase: Vec<f32>,
    phase_accum: Vec<f32>,
    synth_mag: Vec<f32>,
    synth_freq: Vec<f32>,
    output_accum: Vec<f32>,
}

impl PhaseVocoder {
    pub fn new(frame_size: usize, overlap_ratio: usize) -> Result<Self, VoxmodError> {
        if !frame_size.is_power_of_two() {
            return Err(VoxmodError::Config(format!(
                "frame size {frame_size} must be a power of two"
            )));
        }
        if overlap_ratio < 4 || frame_size % overlap_ratio != 0 {
            return Err(VoxmodError::Config(format!(
                "overlap ratio {overlap_ratio} must be >= 4 and divide frame size {frame_size}"
            )));
        }

        let hop_size = frame_size / overlap_ratio;
        let bins = frame_size / 2 + 1;

        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(frame_size);
        let inverse = planner.plan_fft_inverse(frame_size);
        let forward_scratch = forward.make_scratch_vec();
        let inverse_scratch = inverse.make_scratch_vec();

        let window = hann(frame_size);
        let ola_norm = overlap_norm(&window, hop_size);

        Ok(Self {
            frame_size,
            hop_size,
            bins,
            forward,
            inverse,
            forward_scratch,
            inverse_scratch,
            window,
            ola_norm,
            input_history: vec![0.0; frame_size],
            windowed: vec![0.0; frame_size],
            spectrum: vec![Complex::new(0.0, 0.0); bins],
            resynth: vec![0.0; frame_size],
            prev_phase: vec![0.0; bins],
            phase_accum: vec![0.0; bins],
            synth_mag: vec![0.0; bins],
            synth_freq: vec![0.0; bins],
            output_accum: vec![0.0; frame_size],
        })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Fixed processing latency in samples.
    pub fn latency(&self) -> usize {
        self.frame_size - self.hop_size
    }

    /// Clears all analysis/synthesis state without touching the FFT plans.
    pub fn reset(&mut self) {
        self.input_history.fill(0.0);
        self.prev_phase.fill(0.0);
        self.phase_accum.fill(0.0);
        self.output_accum.fill(0.0);
    }

    /// Advances the stream by one hop.
    ///
    /// `input` supplies the next `hop_size` samples; `output` receives the
    /// next `hop_size` processed samples. Steady state performs no
    /// allocation.
    pub fn process_hop(
        &mut self,
        input: &[f32],
        pitch: f32,
        speed: f32,
        output: &mut [f32],
    ) -> Result<(), VoxmodError> {
        let frame = self.frame_size;
        let hop = self.hop_size;
        debug_assert_eq!(input.len(), hop);
        debug_assert_eq!(output.len(), hop);

        // Slide the analysis frame forward by one hop.
        self.input_history.copy_within(hop.., 0);
        self.input_history[frame - hop..].copy_from_slice(input);

        for i in 0..frame {
            self.windowed[i] = self.input_history[i] * self.window[i];
        }
        self.forward
            .process_with_scratch(
                &mut self.windowed,
                &mut self.spectrum,
                &mut self.forward_scratch,
            )
            .map_err(|e| VoxmodError::Internal(format!("forward FFT: {e}")))?;

        self.shift_bins(pitch, speed);

        self.inverse
            .process_with_scratch(
                &mut self.spectrum,
                &mut self.resynth,
                &mut self.inverse_scratch,
            )
            .map_err(|e| VoxmodError::Internal(format!("inverse FFT: {e}")))?;

        // Synthesis window + overlap-add; the inverse FFT is unnormalized.
        let fft_scale = 1.0 / frame as f32;
        for i in 0..frame {
            self.output_accum[i] += self.resynth[i] * self.window[i] * fft_scale;
        }

        for i in 0..hop {
            output[i] = self.output_accum[i] / self.ola_norm[i];
        }
        self.output_accum.copy_within(hop.., 0);
        self.output_accum[frame - hop..].fill(0.0);

        Ok(())
    }

    /// Per-bin pitch shift: unwrap each bin's phase delta to its true
    /// instantaneous frequency, scale by `pitch`, and accumulate synthesis
    /// phase at the pitch-scaled target bin. The synthesis hop is the
    /// analysis hop scaled by `speed`.
    fn shift_bins(&mut self, pitch: f32, speed: f32) {
        let n = self.frame_size as f32;
        let hop = self.hop_size as f32;
        let synthesis_hop = hop * speed;

        self.synth_mag.fill(0.0);
        self.synth_freq.fill(0.0);

        for k in 0..self.bins {
            let (mag, phase) = self.spectrum[k].to_polar();
            let delta = phase - self.prev_phase[k];
            self.prev_phase[k] = phase;
            if mag < MAG_EPSILON {
                continue;
            }

            // Remove 2π jumps, then the expected advance of bin k over one
            // hop; the remainder is this bin's frequency deviation.
            let wrapped = delta - TAU * (delta / TAU).round();
            let expected = TAU * k as f32 * hop / n;
            let mut deviation = wrapped - expected;
            deviation -= TAU * (deviation / TAU).round();
            let omega = TAU * k as f32 / n + deviation / hop;

            let target = (k as f32 * pitch).round() as usize;
            if target >= self.bins {
                continue;
            }
            self.synth_mag[target] += mag;
            self.synth_freq[target] = omega * pitch;
        }

        for k in 0..self.bins {
            let mag = self.synth_mag[k];
            if mag < MAG_EPSILON {
                self.spectrum[k] = Complex::new(0.0, 0.0);
                continue;
            }
            // Keep the accumulator wrapped so high bins do not lose
            // precision as the running phase grows.
            let accum = self.phase_accum[k] + self.synth_freq[k] * synthesis_hop;
            self.phase_accum[k] = accum - TAU * (accum / TAU).round();
            let (sin, cos) = self.phase_accum[k].sin_cos();
            self.spectrum[k] = Complex::new(mag * cos, mag * sin);
        }

        // The real inverse transform requires purely real DC and Nyquist.
        self.spectrum[0].im = 0.0;
        self.spectrum[self.bins - 1].im = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: usize = 1024;
    const OVERLAP: usize = 4;
    const HOP: usize = FRAME / OVERLAP;

    fn run_vocoder(input: &[f32], pitch: f32, speed: f32) -> Vec<f32> {
        let mut vocoder = PhaseVocoder::new(FRAME, OVERLAP).unwrap();
        let mut output = vec![0.0; input.len()];
        let mut block = [0.0f32; HOP];
        for (in_chunk, out_chunk) in input
            .chunks_exact(HOP)
            .zip(output.chunks_exact_mut(HOP))
        {
            vocoder
                .process_hop(in_chunk, pitch, speed, &mut block)
                .unwrap();
            out_chunk.copy_from_slice(&block);
        }
        output
    }

    fn sine(len: usize, freq: f32, sample_rate: f32, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|n| amplitude * (TAU * freq * n as f32 / sample_rate).sin())
            .collect()
    }

    /// Windowed FFT peak of `samples`, in Hz.
    fn dominant_frequency(samples: &[f32], sample_rate: f32) -> f32 {
        let len = samples.len();
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(len);
        let mut buf: Vec<f32> = samples
            .iter()
            .enumerate()
            .map(|(i, &s)| s * 0.5 * (1.0 - (TAU * i as f32 / (len - 1) as f32).cos()))
            .collect();
        let mut spectrum = fft.make_output_vec();
        fft.process(&mut buf, &mut spectrum).unwrap();
        let peak = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
            .map(|(i, _)| i)
            .unwrap();
        peak as f32 * sample_rate / len as f32
    }

    #[test]
    fn silence_in_silence_out() {
        let output = run_vocoder(&vec![0.0; 48_000], 1.0, 1.0);
        assert!(output.iter().all(|y| y.abs() < 1e-6));
    }

    #[test]
    fn unity_passthrough_reconstructs_input() {
        let input = sine(16_384, 441.0, 44_100.0, 0.5);
        let output = run_vocoder(&input, 1.0, 1.0);
        let latency = FRAME - HOP;
        // Skip warm-up: the first frame of output involves zero-padded
        // history.
        for n in 2 * FRAME..12_000 {
            let err = (output[n + latency] - input[n]).abs();
            assert!(err < 1e-3, "sample {n}: error {err}");
        }
    }

    #[test]
    fn impulse_lands_at_fixed_latency() {
        let mut input = vec![0.0; 4 * FRAME];
        input[0] = 1.0;
        let output = run_vocoder(&input, 1.0, 1.0);
        let (peak_idx, peak) = output
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .unwrap();
        assert!(
            (peak_idx as isize - FRAME as isize).unsigned_abs() <= HOP,
            "peak at {peak_idx}"
        );
        assert!(peak.abs() >= 0.9, "peak magnitude {peak}");
    }

    #[test]
    fn pitch_two_doubles_a_440_tone() {
        let input = sine(6 * 4096, 440.0, 44_100.0, 0.5);
        let output = run_vocoder(&input, 2.0, 1.0);
        let tail = &output[output.len() - 8192..];
        let freq = dominant_frequency(tail, 44_100.0);
        assert!((870.0..=890.0).contains(&freq), "dominant at {freq} Hz");
    }

    #[test]
    fn pitch_shift_tracks_factor_after_warmup() {
        // Dominant bin must land within one analysis bin of p·f once at
        // least 2·FRAME/HOP frames have flowed.
        let sample_rate = 44_100.0;
        let input = sine(6 * 4096, 500.0, sample_rate, 0.5);
        let output = run_vocoder(&input, 1.5, 1.0);
        let tail = &output[output.len() - 8192..];
        let freq = dominant_frequency(tail, sample_rate);
        let bin_width = sample_rate / FRAME as f32;
        assert!(
            (freq - 750.0).abs() <= bin_width,
            "dominant at {freq} Hz, expected 750 ± {bin_width}"
        );
    }

    #[test]
    fn round_trip_restores_dominant_bin() {
        let sample_rate = 44_100.0;
        let input = sine(6 * 4096, 440.0, sample_rate, 0.5);
        let up = run_vocoder(&input, 1.5, 1.0);
        let down = run_vocoder(&up, 1.0 / 1.5, 1.0);
        let tail = &down[down.len() - 8192..];
        let freq = dominant_frequency(tail, sample_rate);
        let bin_width = sample_rate / FRAME as f32;
        assert!(
            (freq - 440.0).abs() <= bin_width,
            "round trip landed at {freq} Hz"
        );
    }

    #[test]
    fn reset_clears_stream_state() {
        let mut vocoder = PhaseVocoder::new(FRAME, OVERLAP).unwrap();
        let mut block = [0.0f32; HOP];
        let loud = [0.5f32; HOP];
        for _ in 0..16 {
            vocoder.process_hop(&loud, 1.3, 1.0, &mut block).unwrap();
        }
        vocoder.reset();
        let quiet = [0.0f32; HOP];
        for _ in 0..OVERLAP {
            vocoder.process_hop(&quiet, 1.3, 1.0, &mut block).unwrap();
        }
        assert!(block.iter().all(|y| y.abs() < 1e-6));
    }

    #[test]
    fn rejects_bad_geometry() {
        assert!(PhaseVocoder::new(1000, 4).is_err());
        assert!(PhaseVocoder::new(1024, 2).is_err());
        assert!(PhaseVocoder::new(1024, 3).is_err());
    }
}
