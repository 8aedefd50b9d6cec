//! ReplayGain Accumulator Performance Benchmark
//!
//! Measures RMS-histogram accumulation throughput against the real-time
//! budget Pre-DSP analysis runs under (one `push_frame` call per decoded
//! stereo frame, on the same thread as decode itself).
//!
//! **Goal:** Histogram accumulation should be negligible next to decode.
//! **Target:** >200x realtime.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use waver::predsp::replaygain::ReplayGainAccumulator;

fn bench_push_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("replaygain_push_frame");
    let seconds_of_audio = 10usize;
    let frame_count = 44_100 * seconds_of_audio;

    group.bench_function("silence_10s_stereo", |b| {
        b.iter(|| {
            let mut rg = ReplayGainAccumulator::new(44_100);
            for _ in 0..frame_count {
                rg.push_frame(black_box(0.0), black_box(0.0));
            }
            black_box(rg.target_gain_db());
        });
    });

    group.bench_function("full_scale_tone_10s_stereo", |b| {
        let max = i16::MAX as f64;
        b.iter(|| {
            let mut rg = ReplayGainAccumulator::new(44_100);
            for i in 0..frame_count {
                let v = if i % 2 == 0 { max } else { -max };
                rg.push_frame(black_box(v), black_box(v));
            }
            black_box(rg.target_gain_db());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_push_frame);
criterion_main!(benches);
