//! Core audio data types
//!
//! Defines the stream format description, the time-stamped buffer unit, and
//! the per-input FIFO the alignment loop scans and prunes.
//!
//! **Format:**
//! - A frame is the smallest unit the format can address
//!   (`bytes_per_frame` bytes carrying `frame_length` samples).
//! - Linear PCM has `frame_length == 1` and meaningful sub-frame byte math;
//!   compressed pass-through formats only align on frame boundaries.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Immutable per-mixer stream configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Bytes per addressable frame
    pub bytes_per_frame: u32,

    /// Samples per addressable frame (1 for linear PCM)
    pub frame_length: u32,

    /// Sample rate in Hz
    pub rate: u32,

    /// False for compressed/pass-through formats
    pub is_linear: bool,
}

impl AudioFormat {
    /// Byte size of a block holding `nb_samples` samples.
    pub fn block_bytes(&self, nb_samples: u32) -> usize {
        (nb_samples as u64 * self.bytes_per_frame as u64 / self.frame_length as u64) as usize
    }

    /// Byte offset corresponding to a microsecond interval from a buffer's
    /// start. Truncating, in this exact division order: callers that need a
    /// frame-aligned offset round the result themselves.
    pub fn bytes_for_interval(&self, interval_us: i64) -> i64 {
        interval_us * self.bytes_per_frame as i64 * self.rate as i64
            / self.frame_length as i64
            / 1_000_000
    }
}

/// A unit of queued audio: payload bytes stamped with a presentation time.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Presentation time of the first sample, microseconds
    pub pts: i64,

    /// Duration covered by the payload, microseconds
    pub length: i64,

    /// Number of samples in the payload
    pub nb_samples: u32,

    /// Raw sample bytes, owned by whichever queue currently holds the buffer
    pub payload: Vec<u8>,
}

impl AudioBuffer {
    /// Build a buffer whose `length` is derived from the sample count, so
    /// `length == nb_samples * 1e6 / rate` holds by construction (truncating,
    /// which downstream ±1 us tolerances absorb).
    pub fn new(pts: i64, nb_samples: u32, rate: u32, payload: Vec<u8>) -> Self {
        debug_assert!(rate > 0, "sample rate must be non-zero");
        Self {
            pts,
            length: nb_samples as i64 * 1_000_000 / rate as i64,
            nb_samples,
            payload,
        }
    }

    /// End presentation time (one past the last covered microsecond).
    pub fn end(&self) -> i64 {
        self.pts + self.length
    }
}

/// Ordered FIFO of time-stamped buffers for one input stream.
///
/// Producers append at the tail; the alignment loop reads and prunes from
/// the head. Popping a buffer frees it once the caller drops it.
#[derive(Debug, Default)]
pub struct BufferQueue {
    bufs: VecDeque<AudioBuffer>,
}

impl BufferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail. O(1).
    pub fn push(&mut self, buf: AudioBuffer) {
        self.bufs.push_back(buf);
    }

    /// Remove and return the head buffer.
    pub fn pop(&mut self) -> Option<AudioBuffer> {
        self.bufs.pop_front()
    }

    /// The oldest queued buffer, if any.
    pub fn head(&self) -> Option<&AudioBuffer> {
        self.bufs.front()
    }

    /// Iterate head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &AudioBuffer> {
        self.bufs.iter()
    }

    /// Drop the `n` oldest buffers.
    pub fn drop_first(&mut self, n: usize) {
        for _ in 0..n.min(self.bufs.len()) {
            self.bufs.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.bufs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bufs.is_empty()
    }

    /// Free every queued buffer.
    pub fn clear(&mut self) {
        self.bufs.clear();
    }
}
