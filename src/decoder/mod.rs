//! Decoder stage (§4.3): wraps a [`ByteSource`](crate::source::ByteSource) in
//! a symphonia `MediaSource` adapter and decodes packets into
//! [`AudioBuffer`]s of interleaved stereo f32 PCM, matching the decode/decode
//! chunk shape of the teacher's `audio/decode.rs`.
//!
//! Per §4.3, decode always starts from the beginning of the stream (never a
//! compressed seek): gapless/crossfade timing is sample-accurate only if
//! every track is decoded start-to-finish, so seeking within a track is not
//! exposed here.

use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::decoder::resampler::{StreamResampler, TARGET_SAMPLE_RATE};
use crate::error::{DecodeError, EngineError, Result};
use crate::model::audio_buffer::AudioBuffer;
use crate::model::pcm_format::{PcmFormat, SampleType};
use crate::source::ByteSource;

pub mod resampler;

/// Adapts a [`ByteSource`] trait object to symphonia's `MediaSource`, which
/// requires `Read + Seek + Send + Sync` plus the two capability queries.
struct MediaSourceAdapter {
    inner: Box<dyn ByteSource>,
}

impl Read for MediaSourceAdapter {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner
            .read(buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }
}

impl Seek for MediaSourceAdapter {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match pos {
            SeekFrom::Start(offset) => {
                self.inner
                    .seek(offset)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
                Ok(offset)
            }
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "only SeekFrom::Start is supported by ByteSource",
            )),
        }
    }
}

// Safety: `ByteSource` requires `Send`; symphonia only calls these methods
// from a single decode thread at a time, so `Sync` is satisfied trivially.
unsafe impl Sync for MediaSourceAdapter {}

impl MediaSource for MediaSourceAdapter {
    fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }

    fn byte_len(&self) -> Option<u64> {
        self.inner.byte_len()
    }
}

/// Decodes one track's byte source into a stream of [`AudioBuffer`]s.
///
/// Output is always interleaved stereo f32 at [`TARGET_SAMPLE_RATE`] (§4.3
/// "Output: Stereo f32 samples"): mono is duplicated, anything wider is
/// averaged down, matching the teacher's `convert_to_stereo_f32_static`, and
/// every source rate is resampled to a single fixed rate (teacher's
/// `StatefulResampler`) so the Output stage can mix current/previous tracks
/// during crossfade without a rate mismatch.
pub struct TrackDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    source_sample_rate: u32,
    resampler: StreamResampler,
    finished: bool,
    /// Running output frame count, used to assign each emitted buffer a
    /// monotonically increasing `start_time_us` (§3 `AudioBuffer`).
    frames_emitted: AtomicU64,
}

impl TrackDecoder {
    pub fn new(url: &str, source: Box<dyn ByteSource>) -> Result<Self> {
        let adapter = MediaSourceAdapter { inner: source };
        let mss = MediaSourceStream::new(Box::new(adapter), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = url.rsplit('.').next() {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|_| EngineError::Decode(DecodeError::ProbeFailure))?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or(EngineError::Decode(DecodeError::NoAudioTracks))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let sample_rate = codec_params.sample_rate.unwrap_or(44_100);

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| {
                EngineError::Decode(DecodeError::UnsupportedFormat(format!("{e}")))
            })?;

        let resampler = StreamResampler::new(sample_rate, 2)?;

        Ok(Self {
            format,
            decoder,
            track_id,
            source_sample_rate: sample_rate,
            resampler,
            finished: false,
            frames_emitted: AtomicU64::new(0),
        })
    }

    pub fn format(&self) -> PcmFormat {
        PcmFormat::new(TARGET_SAMPLE_RATE, 2, SampleType::F32)
    }

    /// Decodes and returns the next buffer, or `None` at end of stream.
    ///
    /// Every packet's samples are pushed through the resampler before being
    /// emitted; a packet that lands short of one resampler window yields no
    /// buffer this call (its samples are buffered, not lost) and decoding
    /// continues. At end of stream the resampler's remaining partial window
    /// is flushed as one final buffer.
    pub fn decode_next(&mut self) -> Result<Option<Arc<AudioBuffer>>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.finished = true;
                    return self.flush_final_buffer();
                }
                Err(e) => {
                    return Err(EngineError::Decode(DecodeError::Failed(format!("{e}"))));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = self
                .decoder
                .decode(&packet)
                .map_err(|e| EngineError::Decode(DecodeError::Failed(format!("{e}"))))?;

            let samples = interleave_to_stereo_f32(&decoded);
            if samples.is_empty() {
                continue;
            }

            let resampled = self.resampler.push(&samples)?;
            if resampled.is_empty() {
                // Buffered inside the resampler, waiting for a full window.
                continue;
            }

            return Ok(Some(self.emit(resampled)));
        }
    }

    fn flush_final_buffer(&mut self) -> Result<Option<Arc<AudioBuffer>>> {
        let tail = self.resampler.flush()?;
        if tail.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.emit(tail)))
    }

    fn emit(&self, samples: Vec<f32>) -> Arc<AudioBuffer> {
        let frame_count = (samples.len() / 2) as u64;
        let format = self.format();
        let start_frame = self.frames_emitted.fetch_add(frame_count, Ordering::SeqCst);
        let start_time_us = format.frames_to_us(start_frame);

        let mut data = Vec::with_capacity(samples.len() * 4);
        for sample in samples {
            data.extend_from_slice(&sample.to_ne_bytes());
        }

        Arc::new(AudioBuffer::new(format, start_time_us, data))
    }

    /// The track's native sample rate before resampling (diagnostics only).
    pub fn source_sample_rate(&self) -> u32 {
        self.source_sample_rate
    }
}

fn interleave_to_stereo_f32(buffer: &AudioBufferRef) -> Vec<f32> {
    match buffer {
        AudioBufferRef::F32(buf) => {
            let channels = buf.spec().channels.count();
            let frames = buf.frames();
            let mut out = Vec::with_capacity(frames * 2);
            match channels {
                1 => {
                    let mono = buf.chan(0);
                    for &s in mono {
                        out.push(s);
                        out.push(s);
                    }
                }
                2 => {
                    let left = buf.chan(0);
                    let right = buf.chan(1);
                    for i in 0..frames {
                        out.push(left[i]);
                        out.push(right[i]);
                    }
                }
                _ => {
                    for frame in 0..frames {
                        let mut left_sum = 0.0f32;
                        let mut right_sum = 0.0f32;
                        for ch in 0..channels {
                            let s = buf.chan(ch)[frame];
                            if ch % 2 == 0 {
                                left_sum += s;
                            } else {
                                right_sum += s;
                            }
                        }
                        let half = (channels as f32 / 2.0).max(1.0);
                        out.push(left_sum / half);
                        out.push(right_sum / half);
                    }
                }
            }
            out
        }
        other => {
            // Symphonia decodes everything into its internal sample buffer
            // types; convert via its planar f32 copy path for non-f32 specs.
            let spec = *other.spec();
            let mut sample_buf =
                symphonia::core::audio::SampleBuffer::<f32>::new(other.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(other.clone());
            let channels = spec.channels.count();
            let interleaved = sample_buf.samples();
            if channels == 2 {
                interleaved.to_vec()
            } else if channels == 1 {
                let mut out = Vec::with_capacity(interleaved.len() * 2);
                for &s in interleaved {
                    out.push(s);
                    out.push(s);
                }
                out
            } else {
                let frames = interleaved.len() / channels;
                let mut out = Vec::with_capacity(frames * 2);
                for frame in 0..frames {
                    let mut left_sum = 0.0f32;
                    let mut right_sum = 0.0f32;
                    for ch in 0..channels {
                        let s = interleaved[frame * channels + ch];
                        if ch % 2 == 0 {
                            left_sum += s;
                        } else {
                            right_sum += s;
                        }
                    }
                    let half = (channels as f32 / 2.0).max(1.0);
                    out.push(left_sum / half);
                    out.push(right_sum / half);
                }
                out
            }
        }
    }
}
