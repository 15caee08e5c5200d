//! Audio device enumeration and stream plumbing.
//!
//! Adapts cpal's callback-driven streams to the blocking frame interface the
//! pipeline stages consume. The callbacks only push to or pop from a
//! lock-free ring; the blocking side polls with a short sleep, observing the
//! session's running flag so shutdown unblocks pending calls.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::VoxmodError;

const POLL_INTERVAL: Duration = Duration::from_micros(250);

/// Blocking source of fixed-size mono frames.
pub trait FrameSource: Send {
    /// Fills `frame` completely or returns an error. Stopping the session
    /// unblocks a pending read with an error the capture stage treats as
    /// benign.
    fn read(&mut self, frame: &mut [f32]) -> Result<(), VoxmodError>;
}

/// Blocking sink for fixed-size mono frames.
pub trait FrameSink: Send {
    fn write(&mut self, frame: &[f32]) -> Result<(), VoxmodError>;
}

/// Information about an available audio device.
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub index: usize,
    pub is_default: bool,
}

/// Lists all available input audio devices.
pub fn list_input_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let Ok(devices) = host.input_devices() else {
        return Vec::new();
    };
    collect_device_info(devices, default_name)
}

/// Lists all available output audio devices.
pub fn list_output_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let Ok(devices) = host.output_devices() else {
        return Vec::new();
    };
    collect_device_info(devices, default_name)
}

fn collect_device_info<I>(devices: I, default_name: Option<String>) -> Vec<AudioDeviceInfo>
where
    I: Iterator<Item = Device>,
{
    devices
        .enumerate()
        .map(|(index, device)| {
            let name = device.name().unwrap_or_else(|_| "<Unknown>".to_string());
            let is_default = Some(&name) == default_name.as_ref();
            AudioDeviceInfo {
                name,
                index,
                is_default,
            }
        })
        .collect()
}

/// Resolves a user-supplied input device spec (list position or name).
pub fn find_input_device(spec: &str) -> Option<Device> {
    let host = cpal::default_host();
    let devices = host.input_devices().ok()?;
    resolve_device(devices, spec)
}

/// Resolves a user-supplied output device spec (list position or name).
pub fn find_output_device(spec: &str) -> Option<Device> {
    let host = cpal::default_host();
    let devices = host.output_devices().ok()?;
    resolve_device(devices, spec)
}

/// A numeric spec selects by enumeration position (the numbers
/// `--list-devices` prints). Anything else is matched against device names:
/// an exact match wins over the first case-insensitive substring match, so
/// "USB Mic" and "USB Mic 2" stay distinguishable.
fn resolve_device<I>(devices: I, spec: &str) -> Option<Device>
where
    I: Iterator<Item = Device>,
{
    let devices: Vec<Device> = devices.collect();
    if let Ok(position) = spec.parse::<usize>() {
        return devices.into_iter().nth(position);
    }

    let names: Vec<Option<String>> = devices.iter().map(|d| d.name().ok()).collect();
    let exact = names.iter().position(|n| n.as_deref() == Some(spec));
    let fuzzy = || {
        let wanted = spec.to_lowercase();
        names.iter().position(|n| {
            n.as_ref()
                .map(|name| name.to_lowercase().contains(&wanted))
                .unwrap_or(false)
        })
    };
    let position = exact.or_else(fuzzy)?;
    devices.into_iter().nth(position)
}

/// Keeps a cpal stream alive. Streams are not `Send`, so this stays with
/// the thread that opened the session and is dropped only after the stages
/// have joined.
pub struct StreamGuard {
    _stream: cpal::Stream,
}

/// Capture half of an input stream; `Send`, handed to the capture stage.
pub struct CaptureHandle {
    ring: ringbuf::HeapCons<f32>,
    running: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
}

impl FrameSource for CaptureHandle {
    fn read(&mut self, frame: &mut [f32]) -> Result<(), VoxmodError> {
        let mut filled = self.ring.pop_slice(frame);
        while filled < frame.len() {
            if self.failed.load(Ordering::Acquire) {
                return Err(VoxmodError::DeviceIo("capture: input stream failed".into()));
            }
            if !self.running.load(Ordering::Acquire) {
                return Err(VoxmodError::DeviceIo(
                    "capture: input stream stopped".into(),
                ));
            }
            thread::sleep(POLL_INTERVAL);
            filled += self.ring.pop_slice(&mut frame[filled..]);
        }
        Ok(())
    }
}

/// Playback half of an output stream; `Send`, handed to the playback stage.
pub struct PlaybackHandle {
    ring: ringbuf::HeapProd<f32>,
    running: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
}

impl FrameSink for PlaybackHandle {
    fn write(&mut self, frame: &[f32]) -> Result<(), VoxmodError> {
        let mut written = self.ring.push_slice(frame);
        while written < frame.len() {
            if self.failed.load(Ordering::Acquire) {
                return Err(VoxmodError::DeviceIo(
                    "playback: output stream failed".into(),
                ));
            }
            if !self.running.load(Ordering::Acquire) {
                return Err(VoxmodError::DeviceIo(
                    "playback: output stream stopped".into(),
                ));
            }
            thread::sleep(POLL_INTERVAL);
            written += self.ring.push_slice(&frame[written..]);
        }
        Ok(())
    }
}

/// Opens the input device at the requested rate and returns the stream
/// guard plus the blocking capture handle.
///
/// The stream callback downmixes interleaved channels to mono and pushes
/// into the ring; overflow drops samples (the stage-level counters account
/// for starvation downstream).
pub fn open_input(
    spec: Option<&str>,
    sample_rate: u32,
    frame_size: usize,
    running: Arc<AtomicBool>,
) -> Result<(StreamGuard, CaptureHandle), VoxmodError> {
    let device = match spec {
        Some(spec) => find_input_device(spec)
            .ok_or_else(|| VoxmodError::DeviceOpen(format!("input device '{spec}' not found")))?,
        None => cpal::default_host()
            .default_input_device()
            .ok_or_else(|| VoxmodError::DeviceOpen("no default input device".into()))?,
    };

    let default_config = device
        .default_input_config()
        .map_err(|e| VoxmodError::DeviceOpen(format!("input config: {e}")))?;
    let channels = default_config.channels() as usize;
    let config = StreamConfig {
        channels: channels as u16,
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let capacity = (8 * frame_size).next_power_of_two();
    let (mut prod, cons) = HeapRb::<f32>::new(capacity).split();
    let failed = Arc::new(AtomicBool::new(false));
    let failed_cb = Arc::clone(&failed);

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for chunk in data.chunks_exact(channels) {
                    let mono = chunk.iter().sum::<f32>() / channels as f32;
                    if prod.try_push(mono).is_err() {
                        break;
                    }
                }
            },
            move |err| {
                log::error!("input stream error: {err}");
                failed_cb.store(true, Ordering::Release);
            },
            None,
        )
        .map_err(|e| VoxmodError::DeviceOpen(format!("input stream: {e}")))?;
    stream
        .play()
        .map_err(|e| VoxmodError::DeviceOpen(format!("input stream start: {e}")))?;

    Ok((
        StreamGuard { _stream: stream },
        CaptureHandle {
            ring: cons,
            running,
            failed,
        },
    ))
}

/// Opens the output device at the requested rate and returns the stream
/// guard plus the blocking playback handle.
///
/// The stream callback pops mono samples and fans them out across the
/// device's channels; an empty ring plays silence.
pub fn open_output(
    spec: Option<&str>,
    sample_rate: u32,
    frame_size: usize,
    running: Arc<AtomicBool>,
) -> Result<(StreamGuard, PlaybackHandle), VoxmodError> {
    let device = match spec {
        Some(spec) => find_output_device(spec)
            .ok_or_else(|| VoxmodError::DeviceOpen(format!("output device '{spec}' not found")))?,
        None => cpal::default_host()
            .default_output_device()
            .ok_or_else(|| VoxmodError::DeviceOpen("no default output device".into()))?,
    };

    let default_config = device
        .default_output_config()
        .map_err(|e| VoxmodError::DeviceOpen(format!("output config: {e}")))?;
    let channels = default_config.channels() as usize;
    let config = StreamConfig {
        channels: channels as u16,
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let capacity = (8 * frame_size).next_power_of_two();
    let (prod, mut cons) = HeapRb::<f32>::new(capacity).split();
    let failed = Arc::new(AtomicBool::new(false));
    let failed_cb = Arc::clone(&failed);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for chunk in data.chunks_exact_mut(channels) {
                    let mono = cons.try_pop().unwrap_or(0.0);
                    for slot in chunk {
                        *slot = mono;
                    }
                }
            },
            move |err| {
                log::error!("output stream error: {err}");
                failed_cb.store(true, Ordering::Release);
            },
            None,
        )
        .map_err(|e| VoxmodError::DeviceOpen(format!("output stream: {e}")))?;
    stream
        .play()
        .map_err(|e| VoxmodError::DeviceOpen(format!("output stream start: {e}")))?;

    Ok((
        StreamGuard { _stream: stream },
        PlaybackHandle {
            ring: prod,
            running,
            failed,
        },
    ))
}
