//! Three-stage modulation pipeline: capture, process, playback.
//!
//! A [`Session`] owns the parameter channel, telemetry, and the three stage
//! threads; stages communicate only through bounded SPSC rings plus a shared
//! running flag. Every blocking call is bounded by one frame of audio, so
//! shutdown join latency is bounded by one frame.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::{FrameSink, FrameSource};
use crate::config::SessionConfig;
use crate::dsp::{Agc, PhaseVocoder};
use crate::effects::{Echo, FirReverb};
use crate::error::VoxmodError;
use crate::params::{ModulationParams, ParamChannel};
use crate::ring::{sample_ring, RingConsumer, RingProducer};
use crate::telemetry::{PipelineMetrics, StageState};

/// The processor stage's DSP chain: vocoder, echo, reverb, gain control.
///
/// Single-threaded; the pipeline gives it exclusive ownership. Also usable
/// standalone for offline processing in tests and benchmarks.
pub struct ProcessorChain {
    vocoder: PhaseVocoder,
    echo: Echo,
    reverb: FirReverb,
    agc: Agc,
}

impl ProcessorChain {
    pub fn new(config: &SessionConfig) -> Result<Self, VoxmodError> {
        Ok(Self {
            vocoder: PhaseVocoder::new(config.frame_size, config.overlap_ratio)?,
            echo: Echo::new(config.sample_rate),
            reverb: FirReverb::new(config.sample_rate),
            agc: Agc::new(),
        })
    }

    pub fn hop_size(&self) -> usize {
        self.vocoder.hop_size()
    }

    /// Runs one hop through the whole chain under the given settings.
    pub fn process_hop(
        &mut self,
        input: &[f32],
        params: &ModulationParams,
        output: &mut [f32],
    ) -> Result<(), VoxmodError> {
        self.vocoder
            .process_hop(input, params.pitch_factor, params.speed_factor, output)?;
        self.echo.process_block(
            output,
            params.echo_delay_samples as usize,
            params.echo_intensity,
        );
        self.reverb.process_block(output, params.reverb_intensity);
        self.agc.process_block(output);
        Ok(())
    }
}

/// A running modulation session.
///
/// Owns all pipeline state; dropping or stopping the session clears the
/// running flag, joins the stages, and only then may the caller release the
/// device streams, so resources unwind in reverse start order.
pub struct Session {
    running: Arc<AtomicBool>,
    params: Arc<ParamChannel>,
    metrics: Arc<PipelineMetrics>,
    handles: Vec<JoinHandle<()>>,
    error_rx: Receiver<VoxmodError>,
}

impl Session {
    /// Validates the configuration, builds the DSP chain, and spawns the
    /// three stage threads.
    ///
    /// `running` is the shared stop flag; device handles opened with the
    /// same flag unblock their pending reads and writes when the session
    /// stops.
    pub fn start(
        config: SessionConfig,
        input: Box<dyn FrameSource>,
        output: Box<dyn FrameSink>,
        running: Arc<AtomicBool>,
    ) -> Result<Self, VoxmodError> {
        config.validate()?;

        let frame_size = config.frame_size;
        let hop_size = config.hop_size();
        let timeout = config.frame_duration();

        // Build the chain before spawning anything so FFT planning failures
        // surface to the caller.
        let chain = ProcessorChain::new(&config)?;

        let params = Arc::new(ParamChannel::new(config.sample_rate));
        let metrics = Arc::new(PipelineMetrics::default());
        metrics.set_hop_time(config.frame_duration() / config.overlap_ratio as u32);

        let capacity = (8 * frame_size).next_power_of_two();
        let (in_tx, in_rx) = sample_ring(capacity);
        let (out_tx, out_rx) = sample_ring(capacity);
        let (err_tx, err_rx) = bounded(3);

        running.store(true, Ordering::Release);

        let mut handles = Vec::with_capacity(3);
        {
            let running = Arc::clone(&running);
            let metrics = Arc::clone(&metrics);
            let err_tx = err_tx.clone();
            handles.push(
                thread::Builder::new()
                    .name("capture".into())
                    .spawn(move || {
                        capture_stage(input, in_tx, running, metrics, err_tx, frame_size, timeout)
                    })
                    .expect("failed to spawn capture stage"),
            );
        }
        {
            let running = Arc::clone(&running);
            let metrics = Arc::clone(&metrics);
            let params = Arc::clone(&params);
            let err_tx = err_tx.clone();
            handles.push(
                thread::Builder::new()
                    .name("process".into())
                    .spawn(move || {
                        process_stage(chain, in_rx, out_tx, params, running, metrics, err_tx, timeout)
                    })
                    .expect("failed to spawn process stage"),
            );
        }
        {
            let running = Arc::clone(&running);
            let metrics = Arc::clone(&metrics);
            handles.push(
                thread::Builder::new()
                    .name("playback".into())
                    .spawn(move || {
                        playback_stage(output, out_rx, running, metrics, err_tx, frame_size, timeout)
                    })
                    .expect("failed to spawn playback stage"),
            );
        }

        Ok(Self {
            running,
            params,
            metrics,
            handles,
            error_rx: err_rx,
        })
    }

    /// Channel the control surface publishes parameter snapshots to.
    pub fn params(&self) -> Arc<ParamChannel> {
        Arc::clone(&self.params)
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// False once the session has stopped or any stage recorded an error.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops the pipeline and joins all stages.
    ///
    /// Returns the first error any stage observed, if one occurred.
    pub fn stop(mut self) -> Result<(), VoxmodError> {
        self.running.store(false, Ordering::Release);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        match self.error_rx.try_recv() {
            Ok(err) => Err(err),
            Err(_) => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Records a mid-stream error unless the session was already stopping, in
/// which case unblocked device calls are benign.
fn record_error(
    err: VoxmodError,
    running: &AtomicBool,
    err_tx: &Sender<VoxmodError>,
) {
    if running.swap(false, Ordering::AcqRel) {
        let _ = err_tx.try_send(err);
    }
}

fn capture_stage(
    mut input: Box<dyn FrameSource>,
    mut tx: RingProducer,
    running: Arc<AtomicBool>,
    metrics: Arc<PipelineMetrics>,
    err_tx: Sender<VoxmodError>,
    frame_size: usize,
    timeout: Duration,
) {
    metrics.capture_state.set(StageState::Running);
    let mut frame = vec![0.0f32; frame_size];

    while running.load(Ordering::Acquire) {
        match input.read(&mut frame) {
            Ok(()) => {
                // Producer-side overrun policy: drop what did not fit.
                if tx.write(&frame, timeout).is_err() {
                    metrics.overruns.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => {
                metrics.capture_state.set(StageState::Draining);
                record_error(err, &running, &err_tx);
                break;
            }
        }
    }

    metrics.capture_state.set(StageState::Draining);
    metrics.capture_state.set(StageState::Stopped);
}

#[allow(clippy::too_many_arguments)]
fn process_stage(
    mut chain: ProcessorChain,
    mut rx: RingConsumer,
    mut tx: RingProducer,
    params: Arc<ParamChannel>,
    running: Arc<AtomicBool>,
    metrics: Arc<PipelineMetrics>,
    err_tx: Sender<VoxmodError>,
    timeout: Duration,
) {
    let hop_size = chain.hop_size();
    metrics.process_state.set(StageState::Running);
    let mut in_block = vec![0.0f32; hop_size];
    let mut out_block = vec![0.0f32; hop_size];
    let mut warmed = false;

    while running.load(Ordering::Acquire) {
        match rx.read(&mut in_block, timeout) {
            Ok(()) => warmed = true,
            // Consumer-side underrun policy: the ring zero-filled the tail,
            // so process the block as silence. Startup is not starvation.
            Err(_) => {
                if warmed {
                    metrics.underruns.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        let snapshot = params.load();
        let started = Instant::now();
        let result = chain.process_hop(&in_block, &snapshot.params, &mut out_block);

        if let Err(err) = result {
            metrics.process_state.set(StageState::Draining);
            record_error(err, &running, &err_tx);
            break;
        }
        metrics.record_hop(started.elapsed());

        if tx.write(&out_block, timeout).is_err() {
            metrics.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Finish whole hops still queued so playback can drain them.
    metrics.process_state.set(StageState::Draining);
    while rx.len() >= hop_size {
        if rx.read(&mut in_block, Duration::ZERO).is_err() {
            break;
        }
        let snapshot = params.load();
        if chain
            .process_hop(&in_block, &snapshot.params, &mut out_block)
            .is_err()
        {
            break;
        }
        if tx.write(&out_block, Duration::ZERO).is_err() {
            break;
        }
    }
    metrics.process_state.set(StageState::Stopped);
}

fn playback_stage(
    mut output: Box<dyn FrameSink>,
    mut rx: RingConsumer,
    running: Arc<AtomicBool>,
    metrics: Arc<PipelineMetrics>,
    err_tx: Sender<VoxmodError>,
    frame_size: usize,
    timeout: Duration,
) {
    metrics.playback_state.set(StageState::Running);
    let mut frame = vec![0.0f32; frame_size];
    let mut warmed = false;

    while running.load(Ordering::Acquire) {
        match rx.read(&mut frame, timeout) {
            Ok(()) => warmed = true,
            Err(_) => {
                if warmed {
                    metrics.underruns.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        if let Err(err) = output.write(&frame) {
            metrics.playback_state.set(StageState::Draining);
            record_error(err, &running, &err_tx);
            break;
        }
    }

    // Push out whatever processed audio is still queued.
    metrics.playback_state.set(StageState::Draining);
    while !rx.is_empty() {
        let n = rx.len().min(frame.len());
        frame[..n].fill(0.0);
        if rx.read(&mut frame[..n], Duration::ZERO).is_err() {
            break;
        }
        if output.write(&frame[..n]).is_err() {
            break;
        }
    }
    metrics.playback_state.set(StageState::Stopped);
}
