//! Shared fixtures for the mixer integration suites
//!
//! Everything runs on a `ManualClock` and mono f32 PCM at 48 kHz with
//! 1024-sample output blocks, the working format of the end-to-end
//! scenarios.

// Each suite pulls in the subset of fixtures it needs.
#![allow(dead_code)]

use mixout::{Aout, AudioBuffer, AudioFormat, Date, ManualClock, MixerConfig};
use std::sync::Arc;

pub const RATE: u32 = 48_000;
pub const BLOCK_SAMPLES: u32 = 1024;

pub fn mono_f32() -> MixerConfig {
    MixerConfig {
        format: AudioFormat {
            bytes_per_frame: 4,
            frame_length: 1,
            rate: RATE,
            is_linear: true,
        },
        nb_samples_per_block: BLOCK_SAMPLES,
    }
}

/// Fresh context on a manual clock starting at `now` microseconds.
pub fn new_aout(now: i64) -> (Arc<ManualClock>, Aout) {
    let clock = Arc::new(ManualClock::new(now));
    let aout = Aout::with_clock(mono_f32(), clock.clone());
    (clock, aout)
}

pub fn f32_payload(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
}

pub fn block_values(buf: &AudioBuffer) -> Vec<f32> {
    buf.payload
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// A buffer of `nb_samples` mono f32 frames all holding `value`, with the
/// length derived from the sample count.
pub fn pcm_block(pts: i64, nb_samples: u32, value: f32) -> AudioBuffer {
    AudioBuffer::new(
        pts,
        nb_samples,
        RATE,
        f32_payload(&vec![value; nb_samples as usize]),
    )
}

/// A gapless chain of `count` blocks the way a decoder stamps them: each
/// buffer's pts is the previous end, with lengths carried by the
/// sample-accurate date so the chain tiles the timeline exactly.
pub fn contiguous_run(start_pts: i64, count: usize, nb_samples: u32, value: f32) -> Vec<AudioBuffer> {
    let mut date = Date::new(RATE);
    date.set(start_pts);
    (0..count)
        .map(|_| {
            let pts = date.get();
            let length = date.increment(nb_samples) - pts;
            AudioBuffer {
                pts,
                length,
                nb_samples,
                payload: f32_payload(&vec![value; nb_samples as usize]),
            }
        })
        .collect()
}
