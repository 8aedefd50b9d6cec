//! Biquad Filter Performance Benchmark
//!
//! Measures per-sample biquad processing throughput against the equalizer's
//! 10-band real-time budget.
//!
//! **Goal:** One band's `process_sample` call should be trivial compared to
//! the 44.1kHz sample clock it runs against.
//! **Target:** >50x realtime for a single band.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use waver::biquad::{biquad_coefficients, BiquadFilter, FilterType};

fn bench_single_band(c: &mut Criterion) {
    let mut group = c.benchmark_group("biquad_single_band");
    let sample_count = 44_100usize; // 1s @ 44.1kHz

    let shapes = [
        ("low_shelf", FilterType::LowShelf),
        ("band_shelf", FilterType::BandShelf),
        ("high_shelf", FilterType::HighShelf),
    ];

    for (name, shape) in shapes {
        let coefficients = biquad_coefficients(shape, 1000.0, 800.0, 44_100, 6.0);
        group.bench_function(BenchmarkId::new("process_sample", name), |b| {
            let mut filter = BiquadFilter::new(coefficients);
            b.iter(|| {
                for n in 0..sample_count {
                    let x = (n as f64 * 0.001).sin();
                    black_box(filter.process_sample(0, black_box(x)));
                }
            });
        });
    }

    group.finish();
}

fn bench_full_equalizer_chain(c: &mut Criterion) {
    // The 10-band equalizer runs 10 biquads per channel per sample; model
    // that directly rather than constructing the full Equalizer type, since
    // its band layout is an implementation detail this benchmark shouldn't
    // depend on.
    let mut group = c.benchmark_group("biquad_ten_band_chain");
    let sample_count = 44_100usize;
    let bands: Vec<BiquadFilter> = (0..10)
        .map(|_| BiquadFilter::new(biquad_coefficients(FilterType::BandShelf, 1000.0, 800.0, 44_100, 3.0)))
        .collect();

    group.bench_function("ten_bands_one_channel_one_second", |b| {
        b.iter_batched(
            || bands.clone(),
            |mut bands| {
                for n in 0..sample_count {
                    let mut sample = (n as f64 * 0.001).sin();
                    for band in bands.iter_mut() {
                        sample = band.process_sample(0, sample);
                    }
                    black_box(sample);
                }
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_single_band, bench_full_equalizer_chain);
criterion_main!(benches);
