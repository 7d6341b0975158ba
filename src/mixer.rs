//! The mixer core: temporal alignment, admission control, and the driver
//!
//! Every tick, [`Aout::run`] tries to assemble one output-sized block from
//! the queued input buffers:
//!
//! 1. read the output FIFO's end date as the start of the target interval
//!    (resetting it if play-out fell behind the wall clock);
//! 2. if unanchored, discover a start date from the latest head PTS across
//!    all live inputs, trashing anything already in the past;
//! 3. check every live input for contiguous coverage of the interval,
//!    dropping pre-gap buffers and reconciling each input's byte cursor;
//! 4. hand a destination block to the attached mix kernel and push the
//!    result downstream.
//!
//! Any shortfall ends the tick with nothing emitted and no producer
//! blocking; the enclosing scheduler re-invokes `run` when more data may
//! have arrived.
//!
//! # Locking
//!
//! Three locks, always in this order: the mixer lock (gain + kernel
//! binding, held for the whole of every entry point), the input-FIFO lock
//! (queues and cursors, shared with producers), and the output-FIFO lock
//! (end date + produced blocks). The output lock is never held while
//! taking the input lock.

use crate::buffer::{AudioBuffer, AudioFormat};
use crate::clock::{Clock, MonotonicClock};
use crate::error::{Error, Result};
use crate::input::{InputSnapshot, InputState};
use crate::kernel::{KernelRegistry, MixKernel};
use crate::output::OutputFifo;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

/// Static mixer configuration, host-provided.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixerConfig {
    /// Stream format shared by every input and the output
    pub format: AudioFormat,

    /// Samples per assembled output block
    pub nb_samples_per_block: u32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat {
                bytes_per_frame: 8,
                frame_length: 1,
                rate: 48_000,
                is_linear: true,
            },
            nb_samples_per_block: 1024,
        }
    }
}

/// The live kernel binding, created by `attach` and dropped by `detach`.
struct Mixer {
    kernel: Box<dyn MixKernel>,
    /// Captured from the kernel at attach time
    allocates_output: bool,
    /// Live copy of the gain, what the kernel actually applies
    gain: f32,
}

/// Everything guarded by the mixer lock.
struct MixerSlot {
    /// Authoritative gain; survives detach and seeds the next attach
    gain: f32,
    binding: Option<Mixer>,
}

/// The audio output context: inputs, output FIFO, clock, and the mixer
/// binding slot.
///
/// Shared as `Arc<Aout>` between producers (enqueue side), the driving
/// thread (`run`), and the play-out consumer (drain side). Entry points
/// serialize on the internal mixer lock, so concurrent callers are safe and
/// simply queue up.
///
/// # Examples
///
/// ```ignore
/// let aout = Arc::new(Aout::new(MixerConfig::default()));
/// let input = aout.add_input();
/// aout.attach()?;
///
/// // Producer side, typically another thread:
/// aout.push_buffer(input, decoded_block)?;
///
/// // Scheduler side:
/// aout.run();
/// while let Some(block) = aout.pop_output() {
///     device.play(block);
/// }
/// ```
pub struct Aout {
    format: AudioFormat,
    nb_samples: u32,
    clock: Arc<dyn Clock>,
    registry: KernelRegistry,
    slot: Mutex<MixerSlot>,
    inputs: Mutex<Vec<InputState>>,
    output: Mutex<OutputFifo>,
}

impl Aout {
    /// Context on the process-anchored monotonic clock with the default
    /// kernel registry.
    pub fn new(config: MixerConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Context on a caller-supplied clock. Buffer PTS values must come from
    /// the same timebase.
    pub fn with_clock(config: MixerConfig, clock: Arc<dyn Clock>) -> Self {
        debug_assert!(config.nb_samples_per_block > 0);
        Self {
            format: config.format,
            nb_samples: config.nb_samples_per_block,
            clock,
            registry: KernelRegistry::with_defaults(),
            slot: Mutex::new(MixerSlot {
                gain: 1.0,
                binding: None,
            }),
            inputs: Mutex::new(Vec::new()),
            output: Mutex::new(OutputFifo::new(config.format.rate)),
        }
    }

    /// Replace the kernel registry. Must happen before `attach`, which is
    /// why it takes `&mut self`: configure first, then share.
    pub fn set_registry(&mut self, registry: KernelRegistry) {
        self.registry = registry;
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Resolve a mix kernel for the configured format and publish the
    /// binding.
    ///
    /// Attaching while already attached is a programming error and panics.
    /// On `Error::NoKernel` the system is left unbound and `attach` may be
    /// retried.
    pub fn attach(&self) -> Result<()> {
        let mut slot = self.slot.lock().unwrap();
        assert!(slot.binding.is_none(), "mixer already attached");

        let Some(kernel) = self.registry.resolve(&self.format) else {
            error!("no suitable mix kernel");
            return Err(Error::NoKernel);
        };

        let allocates_output = kernel.allocates_output();
        slot.binding = Some(Mixer {
            kernel,
            allocates_output,
            gain: slot.gain,
        });
        debug!("mix kernel attached (allocates_output: {})", allocates_output);
        Ok(())
    }

    /// Drop the kernel binding. Idempotent; input FIFOs are left untouched.
    pub fn detach(&self) {
        let mut slot = self.slot.lock().unwrap();
        if slot.binding.take().is_some() {
            debug!("mix kernel detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.slot.lock().unwrap().binding.is_some()
    }

    /// Set the global gain on the context and, if attached, on the live
    /// mixer. No validation; callers clamp.
    pub fn set_gain(&self, gain: f32) {
        let mut slot = self.slot.lock().unwrap();
        slot.gain = gain;
        if let Some(mixer) = slot.binding.as_mut() {
            mixer.gain = gain;
        }
    }

    pub fn gain(&self) -> f32 {
        self.slot.lock().unwrap().gain
    }

    /// Assemble and emit as many blocks as the queued data allows, then
    /// return without blocking. Does not sleep; the enclosing scheduler is
    /// responsible for re-invocation.
    pub fn run(&self) {
        let mut slot = self.slot.lock().unwrap();
        while self.assemble_one(&mut slot) {}
    }

    // Producer surface -----------------------------------------------------

    /// Register a new input stream; returns its index.
    pub fn add_input(&self) -> usize {
        let mut inputs = self.inputs.lock().unwrap();
        inputs.push(InputState::new());
        inputs.len() - 1
    }

    pub fn nb_inputs(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }

    /// Producer enqueue. Buffers must arrive in PTS order per input;
    /// discontinuities are handled (dropped) by the alignment loop, not
    /// here.
    pub fn push_buffer(&self, input: usize, buf: AudioBuffer) -> Result<()> {
        let mut inputs = self.inputs.lock().unwrap();
        let state = inputs.get_mut(input).ok_or(Error::NoSuchInput(input))?;
        state.queue.push(buf);
        Ok(())
    }

    /// Pause or resume an input. Paused inputs are skipped by admission but
    /// their queues are left untouched.
    pub fn set_paused(&self, input: usize, paused: bool) -> Result<()> {
        let mut inputs = self.inputs.lock().unwrap();
        let state = inputs.get_mut(input).ok_or(Error::NoSuchInput(input))?;
        state.paused = paused;
        Ok(())
    }

    /// Mark an input errored (producer withdrawal) or clear the mark.
    /// Errored inputs are excluded from mixing and exempt from the
    /// detached-state cleanup.
    pub fn set_error(&self, input: usize, error: bool) -> Result<()> {
        let mut inputs = self.inputs.lock().unwrap();
        let state = inputs.get_mut(input).ok_or(Error::NoSuchInput(input))?;
        state.error = error;
        Ok(())
    }

    /// Per-input diagnostics view.
    pub fn snapshot(&self) -> Vec<InputSnapshot> {
        let inputs = self.inputs.lock().unwrap();
        inputs
            .iter()
            .map(|input| InputSnapshot {
                queued: input.queue.len(),
                cursor: input.begin,
                error: input.error,
                paused: input.paused,
            })
            .collect()
    }

    // Consumer surface -----------------------------------------------------

    /// Drain one produced block, oldest first.
    pub fn pop_output(&self) -> Option<AudioBuffer> {
        self.output.lock().unwrap().pop()
    }

    /// Produced blocks currently queued downstream.
    pub fn output_depth(&self) -> usize {
        self.output.lock().unwrap().len()
    }

    /// The output timeline's current end date (0 when unanchored).
    pub fn output_end_date(&self) -> i64 {
        self.output.lock().unwrap().end_date().get()
    }

    /// Host flush/seek hook: drain the output FIFO and re-anchor its date.
    pub fn set_output_date(&self, date: i64) {
        self.output.lock().unwrap().reset(date);
    }

    // Core -----------------------------------------------------------------

    /// One tick of the alignment loop. Returns true if a block was emitted.
    fn assemble_one(&self, slot: &mut MixerSlot) -> bool {
        let Some(mixer) = slot.binding.as_mut() else {
            // Unbound: keep memory flat while the mixer is absent by
            // freeing everything the producers queued, except on errored
            // inputs whose teardown is the producer's business.
            let mut inputs = self.inputs.lock().unwrap();
            for input in inputs.iter_mut() {
                if input.error {
                    continue;
                }
                input.queue.clear();
                input.begin = None;
            }
            return false;
        };

        let mut inputs = self.inputs.lock().unwrap();
        let now = self.clock.now();

        // Working copy of the output date; the FIFO's own date is only
        // advanced by the push at the end of the tick.
        let mut exact_start_date;
        let mut start_date;
        {
            let mut output = self.output.lock().unwrap();
            exact_start_date = output.end_date();
            start_date = exact_start_date.get();

            if start_date != 0 && start_date < now {
                // Play-out fell behind the wall clock, typically a user
                // pause or a stalled decoder. Restart from scratch instead
                // of chasing the deficit.
                warn!("output PTS is out of range ({}), clearing out", now - start_date);
                output.reset(0);
                exact_start_date.set(0);
                start_date = 0;
            }
        }

        if start_date == 0 {
            // Unanchored: adopt the latest head PTS across live inputs so
            // every one of them has data at or after the start.
            for input in inputs.iter_mut() {
                if input.error || input.paused {
                    continue;
                }

                loop {
                    match input.queue.head() {
                        Some(head) if head.pts < now => {
                            warn!("input PTS is out of range ({}), trashing", now - head.pts);
                            input.queue.pop();
                            input.begin = None;
                        }
                        _ => break,
                    }
                }

                let Some(head) = input.queue.head() else {
                    return false;
                };
                if start_date == 0 || start_date < head.pts {
                    exact_start_date.set(head.pts);
                    start_date = head.pts;
                }
            }
        }

        exact_start_date.increment(self.nb_samples);
        let end_date = exact_start_date.get();

        // Admission: every live input must cover [start_date, end_date)
        // with a contiguous chain, and linear cursors must agree with the
        // start date.
        let nb_inputs = inputs.len();
        let mut first_valid = 0usize;
        let mut feasible = true;

        for (i, input) in inputs.iter_mut().enumerate() {
            input.is_invalid = input.error || input.paused;
            if input.is_invalid {
                if first_valid == i {
                    first_valid += 1;
                }
                continue;
            }

            if input.queue.is_empty() {
                feasible = false;
                break;
            }

            // Whole buffers that ended before the interval are useless.
            // The -1 tolerance absorbs length derivation rounding.
            loop {
                match input.queue.head() {
                    Some(head) if head.end() < start_date - 1 => {
                        warn!(
                            "the mixer got a packet in the past ({})",
                            start_date - head.end()
                        );
                        input.queue.pop();
                        input.begin = None;
                    }
                    _ => break,
                }
            }
            if input.queue.is_empty() {
                feasible = false;
                break;
            }

            // Walk the chain until one buffer reaches end_date, dropping
            // everything before a hole and rescanning from the new head.
            let mut sufficient = true;
            loop {
                let head_end = match input.queue.head() {
                    Some(head) => head.end(),
                    None => {
                        sufficient = false;
                        break;
                    }
                };
                if head_end >= end_date {
                    break;
                }

                let mut prev_end = head_end;
                let mut drop_before = None;
                let mut covered = false;
                for (k, buf) in input.queue.iter().enumerate().skip(1) {
                    if buf.pts != prev_end {
                        warn!("buffer hole, dropping packets ({})", buf.pts - prev_end);
                        drop_before = Some(k);
                        break;
                    }
                    if buf.end() >= end_date {
                        covered = true;
                        break;
                    }
                    prev_end = buf.end();
                }

                if let Some(k) = drop_before {
                    input.queue.drop_first(k);
                    input.begin = None;
                    continue;
                }
                if covered {
                    break;
                }
                // Chain ran out before reaching end_date.
                sufficient = false;
                break;
            }
            if !sufficient {
                feasible = false;
                break;
            }

            if self.format.is_linear {
                let Some(head) = input.queue.head() else {
                    feasible = false;
                    break;
                };

                // Where the cursor should sit for the chosen start date.
                let ideal = self.format.bytes_for_interval(start_date - head.pts);
                let cursor = match input.begin {
                    Some(offset) => offset as i64,
                    None => {
                        input.begin = Some(0);
                        0
                    }
                };

                let bpf = self.format.bytes_per_frame as i64;
                if !(ideal + bpf > cursor && ideal < bpf + cursor) {
                    warn!("mixer start isn't output start ({})", ideal - cursor);

                    // Snap to a frame boundary.
                    let rounded = ideal / bpf * bpf;
                    if rounded < 0 {
                        // The head starts after the interval: the output
                        // clock is stale. Restart it and lose this tick;
                        // the next one rediscovers a start date.
                        self.output.lock().unwrap().reset(0);
                        feasible = false;
                        break;
                    }
                    input.begin = Some(rounded as usize);
                }
            }
        }

        if !feasible || first_valid == nb_inputs {
            return false;
        }

        let mut out = if mixer.allocates_output {
            let bytes = self.format.block_bytes(self.nb_samples);
            let Some(payload) = block_alloc(bytes) else {
                warn!("cannot allocate a {} byte output block", bytes);
                return false;
            };
            AudioBuffer {
                pts: 0,
                length: 0,
                nb_samples: self.nb_samples,
                payload,
            }
        } else {
            // The kernel mixes in place: the lead input's head buffer
            // becomes the destination.
            let lead = &mut inputs[first_valid];
            lead.begin = None;
            let Some(head) = lead.queue.pop() else {
                return false;
            };
            head
        };

        out.pts = start_date;
        out.length = end_date - start_date;
        mixer.kernel.mix(&mut inputs[..], mixer.gain, &mut out);

        drop(inputs);
        self.output_play(out);
        true
    }

    /// Downstream handoff, input lock already released.
    fn output_play(&self, buf: AudioBuffer) {
        self.output.lock().unwrap().push(buf);
    }
}

/// Fallible zero-filled block allocation; a shortfall costs one tick, not
/// the process.
fn block_alloc(bytes: usize) -> Option<Vec<u8>> {
    let mut payload = Vec::new();
    payload.try_reserve_exact(bytes).ok()?;
    payload.resize(bytes, 0);
    Some(payload)
}
