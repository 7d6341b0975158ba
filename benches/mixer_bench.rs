//! Mixer assembly throughput benchmark
//!
//! Measures how fast the alignment loop can drain pre-filled input queues
//! into output blocks. Assembly must run far faster than realtime so the
//! driving thread never becomes the bottleneck.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use mixout::{Aout, AudioBuffer, AudioFormat, Date, ManualClock, MixerConfig};
use std::sync::Arc;

const RATE: u32 = 48_000;
const BLOCK_SAMPLES: u32 = 1024;
const BLOCKS_PER_RUN: usize = 32;

fn stereo_f32() -> MixerConfig {
    MixerConfig {
        format: AudioFormat {
            bytes_per_frame: 8,
            frame_length: 1,
            rate: RATE,
            is_linear: true,
        },
        nb_samples_per_block: BLOCK_SAMPLES,
    }
}

fn filled_aout(nb_inputs: usize) -> Aout {
    let clock = Arc::new(ManualClock::new(0));
    let aout = Aout::with_clock(stereo_f32(), clock);
    aout.attach().expect("kernel");

    for _ in 0..nb_inputs {
        let input = aout.add_input();
        let mut date = Date::new(RATE);
        date.set(1_000_000);
        for _ in 0..BLOCKS_PER_RUN {
            let pts = date.get();
            let length = date.increment(BLOCK_SAMPLES) - pts;
            let payload: Vec<u8> = std::iter::repeat(0.1f32.to_ne_bytes())
                .take(BLOCK_SAMPLES as usize * 2)
                .flatten()
                .collect();
            aout.push_buffer(
                input,
                AudioBuffer {
                    pts,
                    length,
                    nb_samples: BLOCK_SAMPLES,
                    payload,
                },
            )
            .expect("input exists");
        }
    }
    aout
}

fn bench_assemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixer_throughput");

    for nb_inputs in [1usize, 2, 4] {
        group.bench_function(format!("assemble_{}_inputs", nb_inputs), |b| {
            b.iter_batched(
                || filled_aout(nb_inputs),
                |aout| {
                    aout.run();
                    assert_eq!(aout.output_depth(), BLOCKS_PER_RUN);
                    black_box(aout.pop_output());
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_assemble);
criterion_main!(benches);
