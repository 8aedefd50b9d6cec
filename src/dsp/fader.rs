//! Fade renderer (§4.7): linear fade-in/fade-out applied sample-by-sample
//! to a buffer in place, carrying a fractional frame counter across buffer
//! boundaries per the Open Question resolved in SPEC_FULL.md/§9.

use crate::model::fade_state::{FadeDirection, FadeState};
use crate::model::pcm_format::{PcmFormat, SampleType};

/// Deferred signal the Output stage must honor: when a fade-out reaches
/// zero, `Finished` is not emitted immediately but after a 50 ms flush
/// window, to let the already-written buffer drain cleanly (§4.7).
pub const FADE_OUT_FINISHED_DELAY_MS: u64 = 50;

/// Outcome of rendering a fade over one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FadeOutcome {
    /// Fade-in reached 100%; direction should become `None`.
    pub fade_in_completed: bool,
    /// Fade-out reached 0%; caller should schedule `Finished` after
    /// `FADE_OUT_FINISHED_DELAY_MS`.
    pub fade_out_completed: bool,
}

/// Stateless renderer: all mutable state lives in the `FadeState` passed in,
/// so a single renderer instance can serve every track's output stage.
pub struct FadeRenderer;

impl FadeRenderer {
    /// Render `state`'s fade over `data` (raw interleaved PCM of `format`),
    /// advancing `state` in place. Returns what completed during this call.
    pub fn render(state: &mut FadeState, data: &mut [u8], format: &PcmFormat) -> FadeOutcome {
        let mut outcome = FadeOutcome::default();
        if state.direction == FadeDirection::None {
            return outcome;
        }

        let frames_per_percent = frames_for_duration(state.seconds, format.sample_rate) / 100.0;
        let frame_bytes = format.frame_bytes();
        let sample_bytes = format.sample_type.byte_width();
        let (range_min, range_max) = format.sample_type.range();

        let mut offset = 0;
        while offset + frame_bytes <= data.len() {
            let multiplier = state.percent as f64 / 100.0;

            for ch in 0..format.channels as usize {
                let s = offset + ch * sample_bytes;
                let sample = read_sample(&data[s..s + sample_bytes], format.sample_type);
                let scaled = (sample * multiplier).clamp(range_min, range_max);
                write_sample(&mut data[s..s + sample_bytes], format.sample_type, scaled);
            }

            // §4.7: advance by 1/channel_count per sample consumed; a frame
            // consumes channel_count samples, so the counter advances by 1
            // per frame.
            state.frame_counter += 1.0;
            if frames_per_percent > 0.0 && state.frame_counter >= frames_per_percent {
                state.frame_counter -= frames_per_percent;
                match state.direction {
                    FadeDirection::In if state.percent < 100 => state.percent += 1,
                    FadeDirection::Out if state.percent > 0 => state.percent -= 1,
                    _ => {}
                }
            }

            offset += frame_bytes;
        }

        if state.direction == FadeDirection::In && state.percent >= 100 {
            state.direction = FadeDirection::None;
            outcome.fade_in_completed = true;
        } else if state.direction == FadeDirection::Out && state.percent == 0 {
            outcome.fade_out_completed = true;
        }

        outcome
    }
}

fn frames_for_duration(seconds: f64, sample_rate: u32) -> f64 {
    seconds * sample_rate as f64
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

fn write_sample(bytes: &mut [u8], sample_type: SampleType, value: f64) {
    match sample_type {
        SampleType::I8 => bytes[0] = (value.round() as i8) as u8,
        SampleType::U8 => bytes[0] = value.round() as u8,
        SampleType::I16 => bytes.copy_from_slice(&(value.round() as i16).to_ne_bytes()),
        SampleType::U16 => bytes.copy_from_slice(&(value.round() as u16).to_ne_bytes()),
        SampleType::I32 => bytes.copy_from_slice(&(value.round() as i32).to_ne_bytes()),
        SampleType::U32 => bytes.copy_from_slice(&(value.round() as u32).to_ne_bytes()),
        SampleType::F32 => bytes.copy_from_slice(&(value as f32).to_ne_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> PcmFormat {
        PcmFormat::new(1000, 2, SampleType::F32)
    }

    fn full_scale_buffer(frames: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(frames * 8);
        for _ in 0..frames {
            data.extend_from_slice(&1.0f32.to_ne_bytes());
            data.extend_from_slice(&1.0f32.to_ne_bytes());
        }
        data
    }

    fn read_first_sample(data: &[u8]) -> f32 {
        f32::from_ne_bytes([data[0], data[1], data[2], data[3]])
    }

    #[test]
    fn fade_in_starts_silent_and_completes_at_target() {
        let format = format();
        let mut state = FadeState::fade_in(1.0); // 1000 frames/sec, 1s -> 1000 frames total
        let mut data = full_scale_buffer(1000);
        let outcome = FadeRenderer::render(&mut state, &mut data, &format);
        assert!(outcome.fade_in_completed);
        assert_eq!(state.direction, FadeDirection::None);
        assert_eq!(state.percent, 100);
    }

    #[test]
    fn fade_out_reaches_zero_and_silences_samples() {
        let format = format();
        let mut state = FadeState::fade_out(1.0);
        let mut data = full_scale_buffer(1000);
        let outcome = FadeRenderer::render(&mut state, &mut data, &format);
        assert!(outcome.fade_out_completed);
        assert_eq!(state.percent, 0);
        // Property: once percent reaches 0, the trailing samples were scaled by 0.
        let tail = &data[data.len() - 8..];
        assert_eq!(read_first_sample(tail), 0.0);
    }

    #[test]
    fn percent_stays_within_bounds_and_monotone_toward_target() {
        let format = format();
        let mut state = FadeState::fade_in(1.0);
        let mut data = full_scale_buffer(250);
        let mut last = state.percent;
        for _ in 0..4 {
            FadeRenderer::render(&mut state, &mut data, &format);
            assert!(state.percent <= 100);
            assert!(state.percent >= last);
            last = state.percent;
        }
    }

    #[test]
    fn frame_counter_carries_across_small_buffers() {
        let format = format();
        // 10 frames/percent; feed buffers smaller than that repeatedly and
        // confirm percent still advances once the carried counter crosses.
        let mut state = FadeState::fade_in(0.1); // 100 frames total -> 1 frame/percent
        let mut data = full_scale_buffer(1);
        for _ in 0..5 {
            FadeRenderer::render(&mut state, &mut data, &format);
        }
        assert!(state.percent >= 5);
    }
}
