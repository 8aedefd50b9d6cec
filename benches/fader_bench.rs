//! Fade Renderer Performance Benchmark
//!
//! Measures linear fade-in/fade-out throughput against the real-time budget
//! the Output stage runs it under.
//!
//! **Goal:** Fade rendering should be trivial compared to mixing.
//! **Target:** >100x realtime.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use waver::dsp::fader::FadeRenderer;
use waver::model::fade_state::FadeState;
use waver::model::pcm_format::{PcmFormat, SampleType};

fn stereo_buffer(frames: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(frames * 8);
    for _ in 0..frames {
        data.extend_from_slice(&1.0f32.to_ne_bytes());
        data.extend_from_slice(&1.0f32.to_ne_bytes());
    }
    data
}

fn bench_fade_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("fade_render");
    let format = PcmFormat::new(44_100, 2, SampleType::F32);
    let seconds_of_audio = 10usize;
    let frame_count = 44_100 * seconds_of_audio;

    group.bench_function(BenchmarkId::new("fade_in", "10s_stereo_f32"), |b| {
        b.iter_batched(
            || (FadeState::fade_in(2.0), stereo_buffer(frame_count)),
            |(mut state, mut data)| {
                let outcome = FadeRenderer::render(black_box(&mut state), black_box(&mut data), &format);
                black_box(outcome);
            },
            criterion::BatchSize::LargeInput,
        );
    });

    group.bench_function(BenchmarkId::new("fade_out", "10s_stereo_f32"), |b| {
        b.iter_batched(
            || (FadeState::fade_out(2.0), stereo_buffer(frame_count)),
            |(mut state, mut data)| {
                let outcome = FadeRenderer::render(black_box(&mut state), black_box(&mut data), &format);
                black_box(outcome);
            },
            criterion::BatchSize::LargeInput,
        );
    });

    group.bench_function(BenchmarkId::new("no_fade_passthrough", "10s_stereo_f32"), |b| {
        b.iter_batched(
            || (FadeState::none(), stereo_buffer(frame_count)),
            |(mut state, mut data)| {
                let outcome = FadeRenderer::render(black_box(&mut state), black_box(&mut data), &format);
                black_box(outcome);
            },
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_fade_render);
criterion_main!(benches);
