//! Pipeline telemetry.
//!
//! All counters are atomic so stages can record from the audio threads
//! without locks or allocation; readers (the CLI, tests) observe them from
//! any thread.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

/// Per-hop weight of the DSP-load average is 1/2^SHIFT; at a 256-sample hop
/// and 44.1 kHz this smooths over roughly a tenth of a second.
const LOAD_SMOOTHING_SHIFT: u32 = 4;

/// Lifecycle of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StageState {
    Idle = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

/// Atomic cell holding one stage's current state.
pub struct StageStateCell {
    state: AtomicU8,
}

impl Default for StageStateCell {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(StageState::Idle as u8),
        }
    }
}

impl StageStateCell {
    pub fn set(&self, state: StageState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn get(&self) -> StageState {
        match self.state.load(Ordering::Acquire) {
            0 => StageState::Idle,
            1 => StageState::Running,
            2 => StageState::Draining,
            _ => StageState::Stopped,
        }
    }
}

/// Aggregated pipeline metrics. All fields atomic for cross-thread access.
///
/// DSP load is tracked as a running average of nanoseconds spent processing
/// each hop, kept entirely in integer arithmetic so the audio thread never
/// touches floats or locks for bookkeeping. The load ratio is derived on
/// the reader side against the hop's wall-clock duration.
#[derive(Default)]
pub struct PipelineMetrics {
    /// Wall-clock nanoseconds one hop of audio spans. Set once at start.
    hop_time_ns: AtomicU64,
    /// Running average of nanoseconds spent processing one hop.
    smoothed_busy_ns: AtomicU64,
    /// Consumer-side ring timeouts; affected blocks were silence-filled.
    pub underruns: AtomicU64,
    /// Producer-side ring timeouts; affected samples were dropped.
    pub overruns: AtomicU64,
    /// Hops processed by the processor stage.
    pub hops_processed: AtomicU64,
    pub capture_state: StageStateCell,
    pub process_state: StageStateCell,
    pub playback_state: StageStateCell,
}

impl PipelineMetrics {
    /// Fixes the hop duration the load ratio is measured against.
    pub fn set_hop_time(&self, hop: Duration) {
        self.hop_time_ns
            .store(hop.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Records one processed hop: folds the time it took into the running
    /// busy average and bumps the hop counter. Only the processor stage
    /// calls this.
    pub fn record_hop(&self, busy: Duration) {
        let busy_ns = busy.as_nanos() as u64;
        let old = self.smoothed_busy_ns.load(Ordering::Relaxed);
        let new = old - (old >> LOAD_SMOOTHING_SHIFT) + (busy_ns >> LOAD_SMOOTHING_SHIFT);
        self.smoothed_busy_ns.store(new, Ordering::Relaxed);
        self.hops_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Smoothed ratio of processing time to hop time. 1.0 means the
    /// processor is using all the time one hop of audio spans; 0.0 until a
    /// hop time has been set.
    pub fn dsp_load(&self) -> f32 {
        let hop_ns = self.hop_time_ns.load(Ordering::Relaxed);
        if hop_ns == 0 {
            return 0.0;
        }
        self.smoothed_busy_ns.load(Ordering::Relaxed) as f32 / hop_ns as f32
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn hops_processed(&self) -> u64 {
        self.hops_processed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsp_load_converges_toward_busy_ratio() {
        let metrics = PipelineMetrics::default();
        metrics.set_hop_time(Duration::from_micros(1000));
        for _ in 0..64 {
            metrics.record_hop(Duration::from_micros(500));
        }
        let load = metrics.dsp_load();
        assert!((load - 0.5).abs() < 0.05, "load {load}");
        assert_eq!(metrics.hops_processed(), 64);
    }

    #[test]
    fn dsp_load_is_zero_until_hop_time_set() {
        let metrics = PipelineMetrics::default();
        metrics.record_hop(Duration::from_micros(500));
        assert_eq!(metrics.dsp_load(), 0.0);
    }

    #[test]
    fn dsp_load_decays_when_hops_get_cheaper() {
        let metrics = PipelineMetrics::default();
        metrics.set_hop_time(Duration::from_micros(1000));
        for _ in 0..64 {
            metrics.record_hop(Duration::from_micros(900));
        }
        for _ in 0..64 {
            metrics.record_hop(Duration::from_micros(100));
        }
        let load = metrics.dsp_load();
        assert!((load - 0.1).abs() < 0.05, "load {load}");
    }

    #[test]
    fn stage_state_round_trips() {
        let cell = StageStateCell::default();
        assert_eq!(cell.get(), StageState::Idle);
        cell.set(StageState::Running);
        assert_eq!(cell.get(), StageState::Running);
        cell.set(StageState::Draining);
        assert_eq!(cell.get(), StageState::Draining);
        cell.set(StageState::Stopped);
        assert_eq!(cell.get(), StageState::Stopped);
    }
}
