//! # mixout
//!
//! Audio output mixing core: the scheduling and alignment engine that
//! assembles fixed-size output blocks from N independent streams of
//! time-stamped sample buffers and hands them to a downstream play-out
//! pipeline.
//!
//! **Purpose:** pick a common start date across live inputs, validate each
//! input's buffer chain over the target interval, prune stale and
//! non-contiguous data, keep per-input byte cursors honest, and drive a
//! pluggable mix kernel, without ever blocking on producers.
//!
//! **Architecture:** a shared [`Aout`](mixer::Aout) context (inputs, output
//! FIFO, clock, kernel binding) driven by an external scheduler through
//! [`run`](mixer::Aout::run); producers enqueue concurrently under the
//! input-FIFO lock; kernels are resolved from a format-keyed
//! [`KernelRegistry`](kernel::KernelRegistry).

pub mod buffer;
pub mod clock;
pub mod error;
pub mod input;
pub mod kernel;
pub mod mixer;
pub mod output;

pub use buffer::{AudioBuffer, AudioFormat, BufferQueue};
pub use clock::{Clock, Date, ManualClock, MonotonicClock};
pub use error::{Error, Result};
pub use input::{InputSnapshot, InputState};
pub use kernel::{FloatKernel, KernelRegistry, MixKernel, PassthroughKernel};
pub use mixer::{Aout, MixerConfig};
pub use output::OutputFifo;
