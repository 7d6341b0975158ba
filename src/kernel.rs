//! Mix kernels and the format-keyed kernel registry
//!
//! The alignment loop is format-agnostic: once it has admitted a tick, the
//! actual sample combination is delegated to a [`MixKernel`] resolved at
//! attach time. Kernels come in two flavours, advertised through
//! `allocates_output`:
//!
//! - allocating kernels write into a fresh zero-filled block the core
//!   allocates (the multi-input summing case);
//! - non-allocating kernels let the core promote the lead input's head
//!   buffer to the destination (the single-stream pass-through case).
//!
//! Resolution is a plain registry of factory closures tried newest-first,
//! the capability-based replacement for dynamic plug-in loading.

use crate::buffer::{AudioBuffer, AudioFormat};
use crate::input::InputState;

/// Format-specific sample combination, bound to the mixer at attach time.
///
/// `mix` reads from every input where `is_invalid` is false, starting at
/// that input's `begin` cursor, advances the cursors it consumes through
/// (clearing `begin` whenever it pops a head buffer), applies `gain`, and
/// writes into `out`. It must not block and must not fail: format
/// mismatches are configuration errors caught at attach time.
pub trait MixKernel: Send {
    /// True if the core should allocate the destination block; false to mix
    /// in place into the lead input's head buffer.
    fn allocates_output(&self) -> bool;

    fn mix(&mut self, inputs: &mut [InputState], gain: f32, out: &mut AudioBuffer);
}

/// Factory closure: `Some(kernel)` if this factory handles the format.
pub type KernelFactory = Box<dyn Fn(&AudioFormat) -> Option<Box<dyn MixKernel>> + Send + Sync>;

/// Ordered set of kernel factories, tried newest-first.
///
/// Hosts extend it with `register`; a later registration shadows earlier
/// ones for the formats it accepts.
pub struct KernelRegistry {
    factories: Vec<KernelFactory>,
}

impl KernelRegistry {
    /// An empty registry. `resolve` will fail for every format until a
    /// factory is registered.
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// Registry pre-loaded with the two reference kernels: float summing
    /// for linear formats, pass-through for compressed ones.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(|format: &AudioFormat| {
            (!format.is_linear).then(|| Box::new(PassthroughKernel) as Box<dyn MixKernel>)
        });
        registry.register(|format: &AudioFormat| {
            (format.is_linear && format.bytes_per_frame % 4 == 0)
                .then(|| Box::new(FloatKernel) as Box<dyn MixKernel>)
        });
        registry
    }

    pub fn register<F>(&mut self, factory: F)
    where
        F: Fn(&AudioFormat) -> Option<Box<dyn MixKernel>> + Send + Sync + 'static,
    {
        self.factories.push(Box::new(factory));
    }

    /// First kernel (newest registration first) that accepts the format.
    pub fn resolve(&self, format: &AudioFormat) -> Option<Box<dyn MixKernel>> {
        self.factories
            .iter()
            .rev()
            .find_map(|factory| factory(format))
    }
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Summing kernel for linear PCM whose frames are whole native-endian f32
/// lanes.
///
/// For each valid input it consumes exactly one output block's worth of
/// bytes, walking the buffer chain from the `begin` cursor, popping
/// exhausted buffers as it goes. Samples are accumulated into the
/// destination (which the core hands over zero-filled) and scaled by the
/// gain, so an input that runs dry mid-block contributes silence for the
/// remainder.
pub struct FloatKernel;

impl MixKernel for FloatKernel {
    fn allocates_output(&self) -> bool {
        true
    }

    fn mix(&mut self, inputs: &mut [InputState], gain: f32, out: &mut AudioBuffer) {
        let total = out.payload.len();

        for input in inputs.iter_mut().filter(|input| !input.is_invalid) {
            let mut dst_off = 0usize;
            while dst_off < total {
                let begin = input.begin.unwrap_or(0);
                let (taken, exhausted) = match input.queue.head() {
                    Some(head) => {
                        let avail = head.payload.len().saturating_sub(begin);
                        let take = avail.min(total - dst_off);
                        accumulate(
                            &mut out.payload[dst_off..dst_off + take],
                            &head.payload[begin..begin + take],
                            gain,
                        );
                        (take, take == avail)
                    }
                    None => break,
                };

                dst_off += taken;
                if exhausted {
                    input.queue.pop();
                    input.begin = None;
                } else {
                    input.begin = Some(begin + taken);
                }
            }
        }
    }
}

/// Add `gain * src` into `dst`, four bytes per f32 lane.
fn accumulate(dst: &mut [u8], src: &[u8], gain: f32) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let x = f32::from_ne_bytes([s[0], s[1], s[2], s[3]]);
        let acc = f32::from_ne_bytes([d[0], d[1], d[2], d[3]]);
        d.copy_from_slice(&(acc + gain * x).to_ne_bytes());
    }
}

/// Pass-through kernel for single-stream compressed formats.
///
/// The core already promoted the lead input's head buffer to the
/// destination, and gain does not apply to compressed payloads, so there is
/// nothing left to combine here.
pub struct PassthroughKernel;

impl MixKernel for PassthroughKernel {
    fn allocates_output(&self) -> bool {
        false
    }

    fn mix(&mut self, _inputs: &mut [InputState], _gain: f32, _out: &mut AudioBuffer) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AudioBuffer;

    fn linear_format() -> AudioFormat {
        AudioFormat {
            bytes_per_frame: 4,
            frame_length: 1,
            rate: 48_000,
            is_linear: true,
        }
    }

    fn samples_to_bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn bytes_to_samples(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn input_with(samples: &[f32], pts: i64) -> InputState {
        let mut input = InputState::new();
        input.queue.push(AudioBuffer::new(
            pts,
            samples.len() as u32,
            48_000,
            samples_to_bytes(samples),
        ));
        input
    }

    #[test]
    fn test_registry_resolves_defaults() {
        let registry = KernelRegistry::with_defaults();

        let linear = registry.resolve(&linear_format());
        assert!(linear.is_some());
        assert!(linear.unwrap().allocates_output());

        let compressed = AudioFormat {
            bytes_per_frame: 768,
            frame_length: 1536,
            rate: 48_000,
            is_linear: false,
        };
        let passthrough = registry.resolve(&compressed);
        assert!(passthrough.is_some());
        assert!(!passthrough.unwrap().allocates_output());
    }

    #[test]
    fn test_registry_rejects_odd_linear_framing() {
        let registry = KernelRegistry::with_defaults();
        let odd = AudioFormat {
            bytes_per_frame: 3,
            frame_length: 1,
            rate: 48_000,
            is_linear: true,
        };
        assert!(registry.resolve(&odd).is_none());
    }

    #[test]
    fn test_later_registration_shadows_defaults() {
        let mut registry = KernelRegistry::with_defaults();
        registry.register(|_| Some(Box::new(PassthroughKernel) as Box<dyn MixKernel>));

        let kernel = registry.resolve(&linear_format()).unwrap();
        assert!(!kernel.allocates_output());
    }

    #[test]
    fn test_float_kernel_sums_inputs_with_gain() {
        let mut inputs = vec![
            input_with(&[0.25, 0.25, 0.25, 0.25], 0),
            input_with(&[0.5, 0.5, 0.5, 0.5], 0),
        ];
        let mut out = AudioBuffer::new(0, 4, 48_000, vec![0; 16]);

        FloatKernel.mix(&mut inputs, 0.5, &mut out);

        assert_eq!(bytes_to_samples(&out.payload), vec![0.375; 4]);
        // Both heads fully consumed.
        assert!(inputs[0].queue.is_empty());
        assert!(inputs[1].queue.is_empty());
        assert_eq!(inputs[0].begin, None);
    }

    #[test]
    fn test_float_kernel_advances_cursor_on_partial_consume() {
        let mut inputs = vec![input_with(&[0.1; 8], 0)];
        let mut out = AudioBuffer::new(0, 4, 48_000, vec![0; 16]);

        FloatKernel.mix(&mut inputs, 1.0, &mut out);

        assert_eq!(inputs[0].queue.len(), 1);
        assert_eq!(inputs[0].begin, Some(16));
    }

    #[test]
    fn test_float_kernel_starts_at_begin_cursor() {
        let mut input = input_with(&[0.0, 0.0, 0.7, 0.7], 0);
        input.begin = Some(8);
        let mut inputs = vec![input];
        let mut out = AudioBuffer::new(0, 2, 48_000, vec![0; 8]);

        FloatKernel.mix(&mut inputs, 1.0, &mut out);

        assert_eq!(bytes_to_samples(&out.payload), vec![0.7, 0.7]);
        assert!(inputs[0].queue.is_empty());
    }

    #[test]
    fn test_float_kernel_skips_invalid_inputs() {
        let mut silent = input_with(&[0.9; 4], 0);
        silent.is_invalid = true;
        let mut inputs = vec![silent, input_with(&[0.2; 4], 0)];
        let mut out = AudioBuffer::new(0, 4, 48_000, vec![0; 16]);

        FloatKernel.mix(&mut inputs, 1.0, &mut out);

        assert_eq!(bytes_to_samples(&out.payload), vec![0.2; 4]);
        // The invalid input's queue is untouched.
        assert_eq!(inputs[0].queue.len(), 1);
    }

    #[test]
    fn test_float_kernel_zero_fills_on_underrun() {
        // Input covers half the block; the rest stays silent.
        let mut inputs = vec![input_with(&[0.3, 0.3], 0)];
        let mut out = AudioBuffer::new(0, 4, 48_000, vec![0; 16]);

        FloatKernel.mix(&mut inputs, 1.0, &mut out);

        assert_eq!(bytes_to_samples(&out.payload), vec![0.3, 0.3, 0.0, 0.0]);
    }

    #[test]
    fn test_float_kernel_crosses_buffer_boundary() {
        let mut input = input_with(&[0.1, 0.1], 0);
        input
            .queue
            .push(AudioBuffer::new(41, 2, 48_000, samples_to_bytes(&[0.4, 0.4])));
        let mut inputs = vec![input];
        let mut out = AudioBuffer::new(0, 4, 48_000, vec![0; 16]);

        FloatKernel.mix(&mut inputs, 1.0, &mut out);

        assert_eq!(bytes_to_samples(&out.payload), vec![0.1, 0.1, 0.4, 0.4]);
        assert!(inputs[0].queue.is_empty());
    }
}
