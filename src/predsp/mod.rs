//! Pre-DSP chain: analysis stages that run before signal modification.
//! Observe and request; pass PCM through unchanged, beyond the normalization
//! needed for analysis itself (§4.4, glossary "Pre-DSP").

pub mod fade_detector;
pub mod replaygain;
pub mod stage;

pub use fade_detector::{FadeOutDetector, TransitionDecision};
pub use replaygain::ReplayGainAccumulator;
pub use stage::{PreDspMessage, PreDspStage};

use crate::model::pcm_format::{PcmFormat, SampleType};

/// Scale a raw sample, in its native representable range, into the int16
/// domain the analyzers reason about. Mirrors
/// `original_source/wp_equalizer/replaygaincalculator.cpp`'s and
/// `fadeoutdetector.cpp`'s per-sample rescale — both analyzers express
/// their silence/RMS thresholds in int16 units regardless of the track's
/// actual sample type (SPEC_FULL.md §4.4(a)).
pub fn normalize_to_i16_range(sample: f64, sample_type: SampleType) -> f64 {
    if sample_type == SampleType::I16 {
        return sample;
    }
    let (min, max) = sample_type.range();
    let range = max - min;
    if range == 0.0 {
        return sample;
    }
    let i16_min = i16::MIN as f64;
    let i16_max = i16::MAX as f64;
    ((sample - min) / range) * (i16_max - i16_min) + i16_min
}

/// Decode one interleaved frame's left/right samples (as `f64` in the
/// buffer's native sample type) out of raw PCM bytes at `frame_index`.
/// Mono sources duplicate the single channel into both positions.
pub fn read_frame_lr(data: &[u8], format: &PcmFormat, frame_index: usize) -> Option<(f64, f64)> {
    let frame_bytes = format.frame_bytes();
    let offset = frame_index * frame_bytes;
    if offset + frame_bytes > data.len() {
        return None;
    }
    let sample_bytes = format.sample_type.byte_width();
    let read_channel = |ch: usize| -> f64 {
        let start = offset + ch * sample_bytes;
        read_sample(&data[start..start + sample_bytes], format.sample_type)
    };
    if format.channels >= 2 {
        Some((read_channel(0), read_channel(1)))
    } else {
        let v = read_channel(0);
        Some((v, v))
    }
}

fn read_sample(bytes: &[u8], sample_type: SampleType) -> f64 {
    match sample_type {
        SampleType::I8 => bytes[0] as i8 as f64,
        SampleType::U8 => bytes[0] as f64,
        SampleType::I16 => i16::from_ne_bytes([bytes[0], bytes[1]]) as f64,
        SampleType::U16 => u16::from_ne_bytes([bytes[0], bytes[1]]) as f64,
        SampleType::I32 => i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        SampleType::U32 => u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        SampleType::F32 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
    }
}
