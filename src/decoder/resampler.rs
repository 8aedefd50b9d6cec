//! Sample rate conversion to the fixed device rate (§4.3's decoder output
//! feeds straight into the Output stage's device buffer, which needs a
//! single stable rate across tracks to mix current/previous during
//! crossfade). Grounded on the teacher's `audio/resampler.rs`
//! `StatefulResampler`: a `FastFixedIn` kept alive across calls so the
//! polyphase filter state carries over between chunks, plus a pass-through
//! variant when no conversion is needed.
//!
//! Unlike the teacher, chunking here is driven by whatever frame count
//! symphonia hands back per packet rather than a fixed decode-chunk
//! duration, so input is accumulated into `CHUNK_FRAMES`-sized windows
//! before each `process` call; a partial window is zero-padded and flushed
//! at end of stream.

use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};

use crate::error::{DecodeError, EngineError, Result};

/// All tracks are resampled to this rate before reaching the Output stage.
pub const TARGET_SAMPLE_RATE: u32 = 44_100;

/// Fixed input window size `FastFixedIn` is configured for.
const CHUNK_FRAMES: usize = 1024;

/// Converts interleaved PCM from a track's native sample rate to
/// [`TARGET_SAMPLE_RATE`], preserving resampler state across calls.
pub enum StreamResampler {
    PassThrough,
    Active {
        resampler: FastFixedIn<f32>,
        channels: usize,
        /// Interleaved input samples accumulated but not yet long enough
        /// for one `CHUNK_FRAMES` window.
        pending: Vec<f32>,
    },
}

impl StreamResampler {
    pub fn new(input_rate: u32, channels: usize) -> Result<Self> {
        if input_rate == TARGET_SAMPLE_RATE {
            return Ok(Self::PassThrough);
        }

        let resampler = FastFixedIn::<f32>::new(
            TARGET_SAMPLE_RATE as f64 / input_rate as f64,
            1.0,
            PolynomialDegree::Septic,
            CHUNK_FRAMES,
            channels,
        )
        .map_err(|e| {
            EngineError::Decode(DecodeError::Failed(format!(
                "resampler init {input_rate}Hz -> {TARGET_SAMPLE_RATE}Hz: {e}"
            )))
        })?;

        Ok(Self::Active {
            resampler,
            channels,
            pending: Vec::new(),
        })
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, Self::PassThrough)
    }

    /// Feeds interleaved input samples in, returning however many
    /// interleaved output samples are ready. Leftover input below one
    /// window is buffered for the next call.
    pub fn push(&mut self, interleaved: &[f32]) -> Result<Vec<f32>> {
        match self {
            Self::PassThrough => Ok(interleaved.to_vec()),
            Self::Active {
                resampler,
                channels,
                pending,
            } => {
                pending.extend_from_slice(interleaved);
                let channels = *channels;
                let window = CHUNK_FRAMES * channels;
                let mut out = Vec::new();
                while pending.len() >= window {
                    let chunk: Vec<f32> = pending.drain(..window).collect();
                    out.extend(run_chunk(resampler, &chunk, channels)?);
                }
                Ok(out)
            }
        }
    }

    /// Resamples any remaining buffered input at end of stream, zero-padding
    /// the final partial window (`FastFixedIn` requires exactly
    /// `CHUNK_FRAMES` input frames per call).
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        match self {
            Self::PassThrough => Ok(Vec::new()),
            Self::Active {
                resampler,
                channels,
                pending,
            } => {
                if pending.is_empty() {
                    return Ok(Vec::new());
                }
                let channels = *channels;
                let mut chunk = std::mem::take(pending);
                chunk.resize(CHUNK_FRAMES * channels, 0.0);
                run_chunk(resampler, &chunk, channels)
            }
        }
    }
}

fn run_chunk(resampler: &mut FastFixedIn<f32>, chunk: &[f32], channels: usize) -> Result<Vec<f32>> {
    let planar = deinterleave(chunk, channels);
    let resampled = resampler.process(&planar, None).map_err(|e| {
        EngineError::Decode(DecodeError::Failed(format!("resample failed: {e}")))
    })?;
    Ok(interleave(resampled))
}

fn deinterleave(data: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = data.len() / channels;
    let mut planar: Vec<Vec<f32>> = (0..channels).map(|_| Vec::with_capacity(frames)).collect();
    for frame in 0..frames {
        for (ch, plane) in planar.iter_mut().enumerate() {
            plane.push(data[frame * channels + ch]);
        }
    }
    planar
}

fn interleave(planar: Vec<Vec<f32>>) -> Vec<f32> {
    if planar.is_empty() {
        return Vec::new();
    }
    let frames = planar[0].len();
    let mut out = Vec::with_capacity(frames * planar.len());
    for frame in 0..frames {
        for plane in &planar {
            out.push(plane[frame]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_rate_is_pass_through() {
        let r = StreamResampler::new(TARGET_SAMPLE_RATE, 2).unwrap();
        assert!(r.is_pass_through());
    }

    #[test]
    fn pass_through_echoes_input_unchanged() {
        let mut r = StreamResampler::new(TARGET_SAMPLE_RATE, 2).unwrap();
        let input = vec![0.1f32, -0.2, 0.3, -0.4];
        assert_eq!(r.push(&input).unwrap(), input);
    }

    #[test]
    fn differing_rate_buffers_until_a_full_window_then_emits() {
        let mut r = StreamResampler::new(22_050, 2).unwrap();
        assert!(!r.is_pass_through());
        // Fewer than one window's worth of frames: nothing emitted yet.
        let small = vec![0.0f32; 100 * 2];
        assert!(r.push(&small).unwrap().is_empty());
        // Top up past one window: some output should now be available.
        let rest = vec![0.0f32; 2000 * 2];
        let out = r.push(&rest).unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn flush_drains_a_short_final_window() {
        let mut r = StreamResampler::new(48_000, 2).unwrap();
        let input = vec![0.1f32; 50 * 2];
        let _ = r.push(&input).unwrap();
        let flushed = r.flush().unwrap();
        assert!(!flushed.is_empty());
        // A second flush with nothing pending produces nothing.
        assert!(r.flush().unwrap().is_empty());
    }
}
