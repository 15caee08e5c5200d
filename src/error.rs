//! Error types for the voxmod audio engine.

use std::fmt;

/// Errors that can occur while configuring or running a modulation session.
#[derive(Debug)]
pub enum VoxmodError {
    /// Invalid sample rate, frame size, or parameter value.
    Config(String),
    /// The audio backend refused to open the requested device or format.
    DeviceOpen(String),
    /// A device read or write failed mid-stream. The message names the stage.
    DeviceIo(String),
    /// A ring-buffer operation exceeded its deadline (starvation).
    Timeout,
    /// FFT planning or allocation failure at session init.
    Internal(String),
}

impl fmt::Display for VoxmodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoxmodError::Config(msg) => {
                write!(f, "invalid configuration: {msg}")
            }
            VoxmodError::DeviceOpen(msg) => {
                write!(f, "failed to open audio device: {msg}")
            }
            VoxmodError::DeviceIo(msg) => {
                write!(f, "device I/O error: {msg}")
            }
            VoxmodError::Timeout => {
                write!(f, "ring buffer operation timed out")
            }
            VoxmodError::Internal(msg) => {
                write!(f, "internal error: {msg}")
            }
        }
    }
}

impl std::error::Error for VoxmodError {}

impl VoxmodError {
    /// Process exit code for the CLI: 1 on device open failure, 2 on runtime
    /// I/O failure, 3 on invalid configuration.
    pub fn exit_code(&self) -> i32 {
        match self {
            VoxmodError::Config(_) => 3,
            VoxmodError::DeviceOpen(_) => 1,
            VoxmodError::DeviceIo(_) | VoxmodError::Timeout | VoxmodError::Internal(_) => 2,
        }
    }
}
