//! Per-input stream state
//!
//! Each input owns a [`BufferQueue`] plus the producer-controlled flags and
//! the byte cursor the alignment loop reconciles every tick.

use crate::buffer::BufferQueue;

/// One input stream as the mixer sees it.
///
/// `begin` is a non-owning cursor into the head buffer's payload: the next
/// byte the kernel will consume. It must be cleared to `None` whenever the
/// head buffer is dropped, since the offset is meaningless for the next
/// buffer in line.
#[derive(Debug, Default)]
pub struct InputState {
    /// Queued buffers, oldest first
    pub queue: BufferQueue,

    /// Byte offset into the head buffer's payload; `None` when unanchored
    pub begin: Option<usize>,

    /// Producer signalled a fatal stream error; the queue is left untouched
    pub error: bool,

    /// Producer paused the stream
    pub paused: bool,

    /// Derived per tick: `error || paused`. Kernels skip invalid inputs.
    pub is_invalid: bool,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Point-in-time view of one input, for host diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSnapshot {
    /// Buffers currently queued
    pub queued: usize,

    /// Byte cursor into the head buffer, if anchored
    pub cursor: Option<usize>,

    pub error: bool,
    pub paused: bool,
}
