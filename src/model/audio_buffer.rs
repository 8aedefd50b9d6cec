//! Owned PCM buffers passed stage-to-stage, plus the refcounted pool that
//! lets the Output stage fan out to N sinks and return buffers to the
//! decoder exactly once (§3 invariant, §5 "Buffer refcount map").

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{BufferError, Result};
use crate::model::pcm_format::PcmFormat;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// A block of contiguous PCM samples with a format descriptor and a start
/// timestamp, as described by the glossary's "Buffer" entry.
#[derive(Debug)]
pub struct AudioBuffer {
    pub id: u64,
    pub format: PcmFormat,
    pub start_time_us: u64,
    /// Raw interleaved PCM bytes in `format`'s encoding.
    pub data: Vec<u8>,
}

impl AudioBuffer {
    pub fn new(format: PcmFormat, start_time_us: u64, data: Vec<u8>) -> Self {
        Self {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            format,
            start_time_us,
            data,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.format.frame_count(self.data.len())
    }

    pub fn duration_us(&self) -> u64 {
        self.format.frames_to_us(self.frame_count() as u64)
    }

    pub fn end_time_us(&self) -> u64 {
        self.start_time_us + self.duration_us()
    }
}

/// A buffer in flight through the pipeline, with an explicit refcount
/// tracking how many output sinks still hold it. The decoder is the sole
/// allocator and the sole stage permitted to free a buffer, and only when
/// the count reaches zero exactly once (§3, §8 testable property).
pub struct RefcountedBuffer {
    inner: Mutex<RefcountedInner>,
}

struct RefcountedInner {
    buffer: Option<AudioBuffer>,
    outstanding: u32,
    freed: bool,
}

impl RefcountedBuffer {
    /// Wrap a freshly decoded buffer with `sink_count` outstanding
    /// references (one per fan-out output).
    pub fn new(buffer: AudioBuffer, sink_count: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RefcountedInner {
                buffer: Some(buffer),
                outstanding: sink_count,
                freed: false,
            }),
        })
    }

    pub fn format(&self) -> PcmFormat {
        self.inner.lock().buffer.as_ref().expect("buffer already freed").format
    }

    pub fn start_time_us(&self) -> u64 {
        self.inner.lock().buffer.as_ref().expect("buffer already freed").start_time_us
    }

    /// Run `f` over the buffer's raw bytes without releasing a reference.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.inner.lock();
        let buf = guard.buffer.as_ref().expect("buffer already freed");
        f(&buf.data)
    }

    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.inner.lock();
        let buf = guard.buffer.as_mut().expect("buffer already freed");
        f(&mut buf.data)
    }

    /// One consumer releases its reference; returns `true` exactly once,
    /// when the last reference is released and the buffer is freed back
    /// to the decoder.
    pub fn release(&self) -> Result<bool> {
        let mut guard = self.inner.lock();
        if guard.outstanding == 0 {
            return Err(BufferError::RefcountUnderflow.into());
        }
        guard.outstanding -= 1;
        if guard.outstanding == 0 {
            if guard.freed {
                return Err(BufferError::AlreadyReturned.into());
            }
            guard.freed = true;
            guard.buffer = None;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn outstanding(&self) -> u32 {
        self.inner.lock().outstanding
    }
}
