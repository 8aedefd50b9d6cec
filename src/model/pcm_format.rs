//! PCM format descriptor established by the decoder on its first output buffer.

use serde::{Deserialize, Serialize};

/// Sample encoding, mirroring the sample types the original IIR filter and
/// decoder code distinguish (§4.5, `original_source/wp_equalizer/iirfilter.h`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
}

impl SampleType {
    /// Size in bytes of one sample of this type.
    pub fn byte_width(self) -> usize {
        match self {
            SampleType::I8 | SampleType::U8 => 1,
            SampleType::I16 | SampleType::U16 => 2,
            SampleType::I32 | SampleType::U32 | SampleType::F32 => 4,
        }
    }

    /// `(min, max)` of the representable range, as `f64`, used for clamping
    /// after filtering (§4.5 "Saturation") and for ReplayGain/fade-detector
    /// normalization into the int16 domain (§4.4).
    pub fn range(self) -> (f64, f64) {
        match self {
            SampleType::I8 => (i8::MIN as f64, i8::MAX as f64),
            SampleType::U8 => (u8::MIN as f64, u8::MAX as f64),
            SampleType::I16 => (i16::MIN as f64, i16::MAX as f64),
            SampleType::U16 => (u16::MIN as f64, u16::MAX as f64),
            SampleType::I32 => (i32::MIN as f64, i32::MAX as f64),
            SampleType::U32 => (u32::MIN as f64, u32::MAX as f64),
            // Float PCM is conventionally normalized to [-1.0, 1.0].
            SampleType::F32 => (-1.0, 1.0),
        }
    }
}

/// Established once per track on the decoder's first output buffer; never
/// changes mid-track (§3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_type: SampleType,
}

impl PcmFormat {
    pub fn new(sample_rate: u32, channels: u16, sample_type: SampleType) -> Self {
        Self {
            sample_rate,
            channels,
            sample_type,
        }
    }

    /// Bytes per interleaved frame (all channels).
    pub fn frame_bytes(&self) -> usize {
        self.sample_type.byte_width() * self.channels as usize
    }

    /// Number of frames held by a byte buffer of this format.
    pub fn frame_count(&self, byte_len: usize) -> usize {
        byte_len / self.frame_bytes().max(1)
    }

    /// Convert a frame count to microseconds at this format's sample rate.
    pub fn frames_to_us(&self, frames: u64) -> u64 {
        frames * 1_000_000 / self.sample_rate.max(1) as u64
    }
}
