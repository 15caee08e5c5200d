//! Bounded SPSC sample queues between pipeline stages.
//!
//! Thin blocking layer over a lock-free ring: progress is made with
//! `push_slice`/`pop_slice`, and a short poll-sleep bounded by the caller's
//! deadline provides the blocking semantics. One producer, one consumer per
//! queue; FIFO with no loss while the producer stays within capacity.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::VoxmodError;

/// Sleep granularity of the blocking poll loop.
const POLL_INTERVAL: Duration = Duration::from_micros(250);

/// Write half of a sample queue. Owned by exactly one stage.
pub struct RingProducer {
    inner: HeapProd<f32>,
}

/// Read half of a sample queue. Owned by exactly one stage.
pub struct RingConsumer {
    inner: HeapCons<f32>,
}

/// Creates a bounded SPSC sample queue.
///
/// Capacity must be a power of two and should exceed the largest single
/// transfer by at least one frame so a briefly stalled stage cannot
/// deadlock its peer.
pub fn sample_ring(capacity: usize) -> (RingProducer, RingConsumer) {
    debug_assert!(capacity.is_power_of_two());
    let (prod, cons) = HeapRb::<f32>::new(capacity).split();
    (RingProducer { inner: prod }, RingConsumer { inner: cons })
}

impl RingProducer {
    /// Writes all of `src`, blocking up to `timeout`.
    ///
    /// On timeout the samples not yet transferred are dropped and
    /// [`VoxmodError::Timeout`] is returned; everything already pushed
    /// remains in FIFO order.
    pub fn write(&mut self, src: &[f32], timeout: Duration) -> Result<(), VoxmodError> {
        let deadline = Instant::now() + timeout;
        let mut written = self.inner.push_slice(src);
        while written < src.len() {
            if Instant::now() >= deadline {
                return Err(VoxmodError::Timeout);
            }
            thread::sleep(POLL_INTERVAL);
            written += self.inner.push_slice(&src[written..]);
        }
        Ok(())
    }

    /// Number of samples that can be written without blocking.
    pub fn free_len(&self) -> usize {
        self.inner.vacant_len()
    }
}

impl RingConsumer {
    /// Fills all of `dst`, blocking up to `timeout`.
    ///
    /// On timeout the unfilled tail of `dst` is zeroed (silence) and
    /// [`VoxmodError::Timeout`] is returned, so the caller may still use
    /// the block and count the underrun.
    pub fn read(&mut self, dst: &mut [f32], timeout: Duration) -> Result<(), VoxmodError> {
        let deadline = Instant::now() + timeout;
        let mut filled = self.inner.pop_slice(dst);
        while filled < dst.len() {
            if Instant::now() >= deadline {
                dst[filled..].fill(0.0);
                return Err(VoxmodError::Timeout);
            }
            thread::sleep(POLL_INTERVAL);
            filled += self.inner.pop_slice(&mut dst[filled..]);
        }
        Ok(())
    }

    /// Number of samples available without blocking.
    pub fn len(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
